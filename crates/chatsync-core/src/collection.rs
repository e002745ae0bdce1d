//! Live collection engine
//!
//! A [`LiveCollection`] mirrors one remote ordered collection for one mounted
//! list view. It owns at most one subscription at a time, folds optimistic
//! local appends into the confirmed snapshots, and writes appends to the
//! store without blocking the caller.
//!
//! ## Lifecycle
//!
//! 1. `open(scope)` closes any previous subscription, then subscribes
//! 2. Snapshots and write outcomes are applied by `next_update()` / `drain()`
//! 3. `close(handle)` unsubscribes and discards state; repeated calls are no-ops
//!
//! Every open/close starts a new generation. Write outcomes carry the
//! generation they were issued in and are discarded if it is no longer
//! current; snapshot receivers are dropped on close so nothing stale is read.
//!
//! ## Usage
//!
//! ```ignore
//! let mut messages = LiveCollection::<Message>::new(remote, layout);
//! let handle = messages.open(Scope::messages("chat-1"));
//!
//! let msg = Message::new("chat-1", me, "hi");
//! let id = msg.id.clone();
//! messages.append_optimistic(msg);
//! messages.commit(&id)?;
//!
//! while let Some(update) = messages.next_update().await {
//!     render(messages.view());
//! }
//! messages.close(&handle);
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::reconcile::{Entry, FollowUp, ViewEntry, ViewState};
use crate::remote::{
    CollectionPath, Document, RemoteCollection, RemoteError, Snapshot, SubscriptionId,
};
use crate::scope::{CollectionLayout, Scope};

/// Status of a live collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    /// No scope open
    Closed,
    /// Subscribed, waiting for the first snapshot
    Connecting,
    /// At least one snapshot applied
    Live,
    /// Subscription could not be opened or was lost
    Failed,
}

/// Token identifying one `open` call
///
/// Closing with a handle from an earlier generation has no effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    scope: Scope,
    generation: u64,
}

impl SubscriptionHandle {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

/// What changed after applying one event
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionUpdate {
    /// A snapshot replaced the confirmed entries
    Snapshot {
        /// Optimistic entries reconciled away by this snapshot
        absorbed: usize,
        /// Rendered length afterwards
        len: usize,
    },
    /// A write reached the store
    WriteSucceeded { id: String },
    /// A write failed; the entry stays in the view with `failed` set
    WriteFailed { id: String, error: SyncError },
    /// The store closed the subscription
    SubscriptionEnded,
}

struct WriteOutcome {
    generation: u64,
    id: String,
    result: Result<(), RemoteError>,
}

struct ActiveSubscription {
    remote_id: SubscriptionId,
    snapshots: mpsc::UnboundedReceiver<Snapshot>,
    ended: bool,
}

enum Event {
    Snapshot(Option<Snapshot>),
    Outcome(WriteOutcome),
}

/// Ordered, deduplicated mirror of one remote collection
pub struct LiveCollection<E> {
    remote: Arc<dyn RemoteCollection>,
    layout: CollectionLayout,
    scope: Option<Scope>,
    generation: u64,
    subscription: Option<ActiveSubscription>,
    state: ViewState<E>,
    status: CollectionStatus,
    load_error: Option<SyncError>,
    outcome_tx: mpsc::UnboundedSender<WriteOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<WriteOutcome>,
    /// Writes spawned (any generation) whose outcome has not been received
    outstanding: usize,
}

impl<E: Entry> LiveCollection<E> {
    pub fn new(remote: Arc<dyn RemoteCollection>, layout: CollectionLayout) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Self {
            remote,
            layout,
            scope: None,
            generation: 0,
            subscription: None,
            state: ViewState::new(),
            status: CollectionStatus::Closed,
            load_error: None,
            outcome_tx,
            outcome_rx,
            outstanding: 0,
        }
    }

    /// Start mirroring `scope`, closing the current scope first
    ///
    /// Never fails: if the store refuses the subscription the view stays
    /// empty and the error is available from [`load_error`](Self::load_error).
    pub fn open(&mut self, scope: Scope) -> SubscriptionHandle {
        self.close_active();

        let handle = SubscriptionHandle {
            scope: scope.clone(),
            generation: self.generation,
        };

        match self.remote.subscribe(&scope.query(&self.layout)) {
            Ok(sub) => {
                info!("Opened {} ({:?})", scope, sub.id);
                self.subscription = Some(ActiveSubscription {
                    remote_id: sub.id,
                    snapshots: sub.snapshots,
                    ended: false,
                });
                self.status = CollectionStatus::Connecting;
            }
            Err(e) => {
                warn!("Failed to open {}: {}", scope, e);
                self.status = CollectionStatus::Failed;
                self.load_error = Some(e.into());
            }
        }

        self.scope = Some(scope);
        handle
    }

    /// Release the subscription opened with `handle`
    ///
    /// Idempotent: stale or already-closed handles are ignored.
    pub fn close(&mut self, handle: &SubscriptionHandle) {
        if self.scope.is_none() || handle.generation != self.generation {
            debug!("Ignoring close of stale handle for {}", handle.scope);
            return;
        }
        info!("Closing {}", handle.scope);
        self.close_active();
    }

    /// Close whatever scope is open
    pub fn close_current(&mut self) {
        if self.scope.is_some() {
            self.close_active();
        }
    }

    fn close_active(&mut self) {
        if let Some(sub) = self.subscription.take() {
            self.remote.unsubscribe(sub.remote_id);
        }
        self.generation += 1;
        self.scope = None;
        self.state.clear();
        self.status = CollectionStatus::Closed;
        self.load_error = None;
    }

    /// Insert a locally created entry before the store has confirmed it
    ///
    /// Returns `false` if no scope is open or the id is already known.
    pub fn append_optimistic(&mut self, entry: E) -> bool {
        if self.scope.is_none() {
            warn!("Optimistic append of '{}' with no open scope", entry.id());
            return false;
        }
        self.state.insert_provisional(entry)
    }

    /// Write a provisional entry to the store
    ///
    /// Spawns the write and returns immediately; the outcome is applied by
    /// `next_update`/`drain`. Calling again after a failure is the retry.
    /// Must be called from within a tokio runtime.
    pub fn commit(&mut self, id: &str) -> SyncResult<()> {
        if self.state.is_absorbed(id) {
            debug!("'{}' is already confirmed, nothing to commit", id);
            return Ok(());
        }
        if self.state.is_in_flight(id) {
            debug!("Write of '{}' already in flight", id);
            return Ok(());
        }
        let Some(scope) = self.scope.clone() else {
            return Err(SyncError::UnknownEntry(id.to_string()));
        };
        let entry = self
            .state
            .begin_write(id)
            .ok_or_else(|| SyncError::UnknownEntry(id.to_string()))?;

        let collection = scope.collection(&self.layout);
        let fields = entry.encode();
        let follow_up = entry.follow_up(&self.layout);
        let remote = Arc::clone(&self.remote);
        let tx = self.outcome_tx.clone();
        let generation = self.generation;
        let id = id.to_string();

        debug!("Committing '{}' to {}", id, collection);
        self.outstanding += 1;
        tokio::spawn(async move {
            let result = write_entry(remote.as_ref(), &collection, fields, follow_up).await;
            let _ = tx.send(WriteOutcome {
                generation,
                id,
                result,
            });
        });

        Ok(())
    }

    /// Remove a provisional entry, typically one whose write failed
    ///
    /// A write already in flight is not cancelled; if it lands, the entry
    /// comes back through the next snapshot.
    pub fn dismiss(&mut self, id: &str) -> SyncResult<E> {
        self.state
            .remove_provisional(id)
            .ok_or_else(|| SyncError::UnknownEntry(id.to_string()))
    }

    /// Wait for the next snapshot or write outcome and apply it
    ///
    /// Returns `None` once there is nothing left to wait for: no live
    /// subscription and no write in flight.
    pub async fn next_update(&mut self) -> Option<CollectionUpdate> {
        loop {
            let event = self.wait_event().await?;
            if let Some(update) = self.handle_event(event) {
                return Some(update);
            }
        }
    }

    /// Apply every event already delivered, without waiting
    ///
    /// Returns the number of updates applied.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.try_next_event() {
            if self.handle_event(event).is_some() {
                applied += 1;
            }
        }
        applied
    }

    /// Wait until no write is in flight, then apply everything delivered
    pub async fn settle(&mut self) {
        while self.outstanding > 0 {
            let Some(event) = self.wait_event().await else {
                break;
            };
            self.handle_event(event);
        }
        self.drain();
    }

    async fn wait_event(&mut self) -> Option<Event> {
        let listening = self.subscription.as_ref().is_some_and(|s| !s.ended);
        if !listening && self.outstanding == 0 {
            return None;
        }

        let snapshots = self
            .subscription
            .as_mut()
            .filter(|s| !s.ended)
            .map(|s| &mut s.snapshots);
        let outcomes = &mut self.outcome_rx;
        tokio::select! {
            snapshot = recv_snapshot(snapshots) => Some(Event::Snapshot(snapshot)),
            Some(outcome) = outcomes.recv() => Some(Event::Outcome(outcome)),
            else => None,
        }
    }

    fn try_next_event(&mut self) -> Option<Event> {
        if let Some(sub) = self.subscription.as_mut().filter(|s| !s.ended) {
            match sub.snapshots.try_recv() {
                Ok(snapshot) => return Some(Event::Snapshot(Some(snapshot))),
                Err(TryRecvError::Disconnected) => return Some(Event::Snapshot(None)),
                Err(TryRecvError::Empty) => {}
            }
        }
        self.outcome_rx.try_recv().ok().map(Event::Outcome)
    }

    fn handle_event(&mut self, event: Event) -> Option<CollectionUpdate> {
        match event {
            Event::Snapshot(Some(docs)) => Some(self.apply_snapshot(docs)),
            Event::Snapshot(None) => {
                if let Some(sub) = self.subscription.as_mut() {
                    sub.ended = true;
                }
                if let Some(scope) = &self.scope {
                    warn!("Subscription for {} ended by the store", scope);
                }
                self.status = CollectionStatus::Failed;
                Some(CollectionUpdate::SubscriptionEnded)
            }
            Event::Outcome(outcome) => self.apply_outcome(outcome),
        }
    }

    fn apply_snapshot(&mut self, docs: Snapshot) -> CollectionUpdate {
        let Some(scope) = self.scope.as_ref() else {
            return CollectionUpdate::Snapshot {
                absorbed: 0,
                len: 0,
            };
        };

        let entries: Vec<E> = docs
            .iter()
            .filter_map(|doc| match E::decode(doc, scope) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping document in {}: {}", scope, e);
                    None
                }
            })
            .collect();

        let absorbed = self.state.apply_snapshot(entries);
        self.status = CollectionStatus::Live;
        self.load_error = None;
        debug!(
            "Applied snapshot for {}: {} documents, {} absorbed",
            scope,
            docs.len(),
            absorbed
        );

        CollectionUpdate::Snapshot {
            absorbed,
            len: self.state.len(),
        }
    }

    fn apply_outcome(&mut self, outcome: WriteOutcome) -> Option<CollectionUpdate> {
        self.outstanding = self.outstanding.saturating_sub(1);

        if outcome.generation != self.generation {
            debug!("Discarding write outcome for '{}' from closed scope", outcome.id);
            return None;
        }

        match outcome.result {
            Ok(()) => {
                self.state
                    .finish_write(&outcome.id, Ok(()))
                    .then(|| CollectionUpdate::WriteSucceeded { id: outcome.id })
            }
            Err(e) => {
                warn!("Write of '{}' failed: {}", outcome.id, e);
                self.state
                    .finish_write(&outcome.id, Err(e.to_string()))
                    .then(|| CollectionUpdate::WriteFailed {
                        id: outcome.id,
                        error: e.into(),
                    })
            }
        }
    }

    /// The rendered list: newest first, no duplicate ids
    pub fn view(&self) -> Vec<ViewEntry<E>> {
        self.state.rendered()
    }

    pub fn scope(&self) -> Option<&Scope> {
        self.scope.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.scope.is_some()
    }

    pub fn status(&self) -> CollectionStatus {
        self.status
    }

    /// Why the current scope has no data, if opening it failed
    pub fn load_error(&self) -> Option<&SyncError> {
        self.load_error.as_ref()
    }

    /// Error of the last failed write of a provisional entry
    pub fn write_error(&self, id: &str) -> Option<&str> {
        self.state.write_error(id)
    }

    /// Number of entries not yet confirmed by a snapshot
    pub fn pending_count(&self) -> usize {
        self.state.pending_count()
    }

    /// Number of writes whose outcome has not been applied yet
    pub fn in_flight(&self) -> usize {
        self.outstanding
    }
}

impl<E> Drop for LiveCollection<E> {
    fn drop(&mut self) {
        if let Some(sub) = self.subscription.take() {
            self.remote.unsubscribe(sub.remote_id);
        }
    }
}

async fn recv_snapshot(rx: Option<&mut mpsc::UnboundedReceiver<Snapshot>>) -> Option<Snapshot> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Append a document, then apply its follow-up merge
///
/// A failed or skipped follow-up is logged but does not fail the append.
async fn write_entry(
    remote: &dyn RemoteCollection,
    collection: &CollectionPath,
    fields: Document,
    follow_up: Option<FollowUp>,
) -> Result<(), RemoteError> {
    remote.append(collection, fields).await?;

    let Some(follow_up) = follow_up else {
        return Ok(());
    };
    let FollowUp {
        collection: path,
        id,
        patch,
        precondition,
    } = follow_up;
    let result = match &precondition {
        Some(precondition) => remote.update_if(&path, &id, precondition, patch).await,
        None => remote.update(&path, &id, patch).await.map(|()| true),
    };
    match result {
        Ok(true) => {}
        Ok(false) => debug!("Follow-up of {}/{} skipped, stored value is newer", path, id),
        Err(e) => warn!("Follow-up update of {}/{} failed: {}", path, id, e),
    }
    Ok(())
}
