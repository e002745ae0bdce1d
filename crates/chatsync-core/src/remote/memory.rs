//! In-process document store
//!
//! Implements the [`RemoteCollection`] contract entirely in memory. Every
//! write re-evaluates the subscriptions on the touched collection and pushes
//! them a full snapshot, the same way the hosted store does. Used as the test
//! fake and as a local backend.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::{
    CollectionPath, Direction, Document, DocumentId, Precondition, Query, RemoteCollection,
    RemoteDocument, RemoteError, RemoteSubscription, Snapshot, SubscriptionId,
};

struct Subscriber {
    query: Query,
    tx: mpsc::UnboundedSender<Snapshot>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<CollectionPath, Vec<RemoteDocument>>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    next_subscription: u64,
    offline: bool,
}

impl Inner {
    fn snapshot(&self, query: &Query) -> Snapshot {
        let mut docs: Vec<RemoteDocument> = self
            .collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| query.filter.as_ref().map_or(true, |f| f.matches(&d.fields)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            // Documents lacking the ordering field are not part of the result
            docs.retain(|d| d.fields.contains_key(&order.field));
            docs.sort_by(|a, b| {
                let ord = a.fields[&order.field].order_cmp(&b.fields[&order.field]);
                let ord = match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                };
                ord.then_with(|| a.id.cmp(&b.id))
            });
        }

        docs
    }

    /// Merge fields into one document if the precondition holds
    fn merge(
        &mut self,
        collection: &CollectionPath,
        id: &DocumentId,
        precondition: Option<&Precondition>,
        fields: Document,
    ) -> Result<bool, RemoteError> {
        self.ensure_online()?;

        let doc = self
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| &d.id == id))
            .ok_or_else(|| RemoteError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        if precondition.is_some_and(|p| !p.holds(&doc.fields)) {
            debug!("Precondition failed for {}/{}", collection, id);
            return Ok(false);
        }
        doc.fields.extend(fields);
        self.notify(collection);

        Ok(true)
    }

    fn notify(&mut self, collection: &CollectionPath) {
        let mut closed = Vec::new();
        for (id, sub) in &self.subscribers {
            if &sub.query.collection != collection {
                continue;
            }
            if sub.tx.send(self.snapshot(&sub.query)).is_err() {
                closed.push(*id);
            }
        }
        for id in closed {
            debug!("Dropping subscription {:?}: receiver gone", id);
            self.subscribers.remove(&id);
        }
    }

    fn ensure_online(&self) -> Result<(), RemoteError> {
        if self.offline {
            Err(RemoteError::Unavailable("store is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

/// In-memory implementation of [`RemoteCollection`]
#[derive(Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate loss or recovery of connectivity
    ///
    /// While offline, subscribe/append/update fail with
    /// [`RemoteError::Unavailable`]. Existing subscriptions stay registered.
    pub fn set_online(&self, online: bool) {
        self.lock().offline = !online;
    }

    pub fn is_online(&self) -> bool {
        !self.lock().offline
    }

    /// Current documents of a collection, in insertion order
    pub fn documents(&self, collection: &CollectionPath) -> Vec<RemoteDocument> {
        self.lock()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Look up one document
    pub fn document(&self, collection: &CollectionPath, id: &DocumentId) -> Option<Document> {
        self.lock()
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| &d.id == id))
            .map(|d| d.fields.clone())
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteCollection for MemoryRemote {
    fn subscribe(&self, query: &Query) -> Result<RemoteSubscription, RemoteError> {
        let mut inner = self.lock();
        inner.ensure_online()?;

        inner.next_subscription += 1;
        let id = SubscriptionId(inner.next_subscription);
        let (tx, rx) = mpsc::unbounded_channel();

        // The store always emits the current state first
        let _ = tx.send(inner.snapshot(query));
        inner.subscribers.insert(
            id,
            Subscriber {
                query: query.clone(),
                tx,
            },
        );
        debug!("Subscribed {:?} to {}", id, query.collection);

        Ok(RemoteSubscription { id, snapshots: rx })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if self.lock().subscribers.remove(&id).is_some() {
            debug!("Unsubscribed {:?}", id);
        }
    }

    async fn append(
        &self,
        collection: &CollectionPath,
        fields: Document,
    ) -> Result<DocumentId, RemoteError> {
        let mut inner = self.lock();
        inner.ensure_online()?;

        let id = DocumentId::new(Uuid::new_v4().simple().to_string());
        inner
            .collections
            .entry(collection.clone())
            .or_default()
            .push(RemoteDocument {
                id: id.clone(),
                fields,
            });
        inner.notify(collection);

        Ok(id)
    }

    async fn update(
        &self,
        collection: &CollectionPath,
        id: &DocumentId,
        fields: Document,
    ) -> Result<(), RemoteError> {
        self.lock().merge(collection, id, None, fields).map(|_| ())
    }

    async fn update_if(
        &self,
        collection: &CollectionPath,
        id: &DocumentId,
        precondition: &Precondition,
        fields: Document,
    ) -> Result<bool, RemoteError> {
        self.lock().merge(collection, id, Some(precondition), fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Filter, Value};
    use chrono::{TimeZone, Utc};

    fn at(secs: i64) -> Value {
        Value::from(Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn fields(text: &str, secs: i64) -> Document {
        let mut doc = Document::new();
        doc.insert("text".to_string(), text.into());
        doc.insert("createdAt".to_string(), at(secs));
        doc
    }

    fn texts(snapshot: &Snapshot) -> Vec<String> {
        snapshot
            .iter()
            .map(|d| d.fields["text"].as_str().unwrap().to_string())
            .collect()
    }

    fn messages() -> CollectionPath {
        CollectionPath::root("messages")
    }

    #[tokio::test]
    async fn test_subscribe_emits_initial_snapshot() {
        let remote = MemoryRemote::new();
        remote.append(&messages(), fields("one", 1)).await.unwrap();

        let mut sub = remote.subscribe(&Query::new(messages())).unwrap();
        let first = sub.snapshots.recv().await.unwrap();
        assert_eq!(texts(&first), vec!["one"]);
    }

    #[tokio::test]
    async fn test_snapshots_are_ordered() {
        let remote = MemoryRemote::new();
        let query = Query::new(messages()).order_by("createdAt", Direction::Descending);
        let mut sub = remote.subscribe(&query).unwrap();
        assert!(sub.snapshots.recv().await.unwrap().is_empty());

        remote.append(&messages(), fields("old", 1)).await.unwrap();
        remote.append(&messages(), fields("new", 5)).await.unwrap();

        let _ = sub.snapshots.recv().await.unwrap();
        let latest = sub.snapshots.recv().await.unwrap();
        assert_eq!(texts(&latest), vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_order_by_excludes_documents_without_field() {
        let remote = MemoryRemote::new();
        let mut bare = Document::new();
        bare.insert("text".to_string(), "bare".into());
        remote.append(&messages(), bare).await.unwrap();
        remote.append(&messages(), fields("stamped", 1)).await.unwrap();

        let query = Query::new(messages()).order_by("createdAt", Direction::Ascending);
        let mut sub = remote.subscribe(&query).unwrap();
        assert_eq!(texts(&sub.snapshots.recv().await.unwrap()), vec!["stamped"]);
    }

    #[tokio::test]
    async fn test_filter_limits_snapshot() {
        let remote = MemoryRemote::new();
        let chats = CollectionPath::root("chats");

        let mut mine = fields("mine", 1);
        mine.insert("users".to_string(), vec!["alice", "bob"].into());
        let mut theirs = fields("theirs", 2);
        theirs.insert("users".to_string(), vec!["carol", "dave"].into());
        remote.append(&chats, mine).await.unwrap();
        remote.append(&chats, theirs).await.unwrap();

        let query = Query::new(chats).filter(Filter::array_contains("users", "alice"));
        let mut sub = remote.subscribe(&query).unwrap();
        assert_eq!(texts(&sub.snapshots.recv().await.unwrap()), vec!["mine"]);
    }

    #[tokio::test]
    async fn test_other_collections_do_not_notify() {
        let remote = MemoryRemote::new();
        let mut sub = remote.subscribe(&Query::new(messages())).unwrap();
        let _ = sub.snapshots.recv().await.unwrap();

        remote
            .append(&CollectionPath::root("elsewhere"), fields("x", 1))
            .await
            .unwrap();
        assert!(sub.snapshots.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let remote = MemoryRemote::new();
        let mut sub = remote.subscribe(&Query::new(messages())).unwrap();
        let _ = sub.snapshots.recv().await.unwrap();
        assert_eq!(remote.subscription_count(), 1);

        remote.unsubscribe(sub.id);
        remote.unsubscribe(sub.id);
        assert_eq!(remote.subscription_count(), 0);

        remote.append(&messages(), fields("late", 1)).await.unwrap();
        // Sender dropped on unsubscribe, so the channel is closed and empty
        assert!(sub.snapshots.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned() {
        let remote = MemoryRemote::new();
        let sub = remote.subscribe(&Query::new(messages())).unwrap();
        drop(sub);

        remote.append(&messages(), fields("x", 1)).await.unwrap();
        assert_eq!(remote.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_offline_fails_operations() {
        let remote = MemoryRemote::new();
        remote.set_online(false);
        assert!(!remote.is_online());

        let err = remote.subscribe(&Query::new(messages())).unwrap_err();
        assert!(err.is_transient());
        let err = remote.append(&messages(), fields("x", 1)).await.unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_)));

        remote.set_online(true);
        assert!(remote.append(&messages(), fields("x", 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let remote = MemoryRemote::new();
        let id = remote.append(&messages(), fields("draft", 1)).await.unwrap();

        let mut patch = Document::new();
        patch.insert("text".to_string(), "final".into());
        remote.update(&messages(), &id, patch).await.unwrap();

        let doc = remote.document(&messages(), &id).unwrap();
        assert_eq!(doc["text"].as_str(), Some("final"));
        assert!(doc.contains_key("createdAt"));
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let remote = MemoryRemote::new();
        let err = remote
            .update(&messages(), &DocumentId::from("nope"), Document::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_if_only_moves_forward() {
        let remote = MemoryRemote::new();
        let id = remote.append(&messages(), fields("middle", 5)).await.unwrap();
        let mut sub = remote.subscribe(&Query::new(messages())).unwrap();
        let _ = sub.snapshots.recv().await.unwrap();

        let applied = remote
            .update_if(
                &messages(),
                &id,
                &Precondition::not_after("createdAt", at(3)),
                fields("older", 3),
            )
            .await
            .unwrap();
        assert!(!applied);
        assert!(sub.snapshots.try_recv().is_err());

        let applied = remote
            .update_if(
                &messages(),
                &id,
                &Precondition::not_after("createdAt", at(9)),
                fields("newer", 9),
            )
            .await
            .unwrap();
        assert!(applied);
        assert_eq!(texts(&sub.snapshots.recv().await.unwrap()), vec!["newer"]);
    }
}
