//! Reconciliation of confirmed and provisional entries
//!
//! A live list keeps two partitions:
//!
//! - **confirmed**: the last snapshot received from the store, replaced
//!   wholesale on every snapshot
//! - **provisional**: entries appended locally and not yet seen in a snapshot
//!
//! [`merge`] produces the rendered sequence from both. A snapshot absorbs
//! every provisional entry whose id it contains; an absorbed id can never be
//! provisional again.
//!
//! Rendered order is `created_at` descending, ties broken by `id` ascending.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::DecodeError;
use crate::remote::{CollectionPath, Document, DocumentId, Precondition, RemoteDocument};
use crate::scope::{CollectionLayout, Scope};

/// An entity that can live in a synchronized list
pub trait Entry: Clone + Send + 'static {
    /// Key used for dedup and reconciliation
    fn id(&self) -> &str;

    /// Ordering timestamp
    fn created_at(&self) -> DateTime<Utc>;

    /// Build from a snapshot document
    fn decode(doc: &RemoteDocument, scope: &Scope) -> Result<Self, DecodeError>;

    /// Encode for appending to the store
    fn encode(&self) -> Document;

    /// Extra field merge to apply after a successful append
    fn follow_up(&self, _layout: &CollectionLayout) -> Option<FollowUp> {
        None
    }
}

/// Field merge into another document, applied after an entry is appended
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUp {
    pub collection: CollectionPath,
    pub id: DocumentId,
    pub patch: Document,
    /// When set, the merge is skipped unless the stored document satisfies it
    pub precondition: Option<Precondition>,
}

/// One row of the rendered list
#[derive(Debug, Clone, PartialEq)]
pub struct ViewEntry<E> {
    pub entry: E,
    /// Not yet seen in a snapshot
    pub provisional: bool,
    /// The last write attempt failed
    pub failed: bool,
}

#[derive(Debug, Clone)]
struct Provisional<E> {
    entry: E,
    in_flight: bool,
    error: Option<String>,
}

impl<E: Clone> Provisional<E> {
    fn to_view(&self) -> ViewEntry<E> {
        ViewEntry {
            entry: self.entry.clone(),
            provisional: true,
            failed: self.error.is_some(),
        }
    }
}

/// Merge confirmed and provisional entries into the rendered sequence
///
/// Confirmed entries win over provisional ones with the same id. Within the
/// confirmed partition the first occurrence of an id wins.
pub fn merge<E: Entry>(confirmed: &[E], provisional: &[ViewEntry<E>]) -> Vec<ViewEntry<E>> {
    let mut seen = HashSet::new();
    let mut rendered = Vec::with_capacity(confirmed.len() + provisional.len());

    for entry in confirmed {
        if seen.insert(entry.id().to_string()) {
            rendered.push(ViewEntry {
                entry: entry.clone(),
                provisional: false,
                failed: false,
            });
        }
    }
    for view in provisional {
        if seen.insert(view.entry.id().to_string()) {
            rendered.push(view.clone());
        }
    }

    rendered.sort_by(|a, b| {
        b.entry
            .created_at()
            .cmp(&a.entry.created_at())
            .then_with(|| a.entry.id().cmp(b.entry.id()))
    });
    rendered
}

/// Two-partition state of one live list
#[derive(Debug, Clone)]
pub struct ViewState<E> {
    confirmed: Vec<E>,
    confirmed_ids: HashSet<String>,
    provisional: HashMap<String, Provisional<E>>,
    absorbed: HashSet<String>,
}

impl<E> Default for ViewState<E> {
    fn default() -> Self {
        Self {
            confirmed: Vec::new(),
            confirmed_ids: HashSet::new(),
            provisional: HashMap::new(),
            absorbed: HashSet::new(),
        }
    }
}

impl<E: Entry> ViewState<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the confirmed partition with a full snapshot
    ///
    /// Returns the number of provisional entries absorbed.
    pub fn apply_snapshot(&mut self, entries: Vec<E>) -> usize {
        let mut ids = HashSet::with_capacity(entries.len());
        let mut confirmed = Vec::with_capacity(entries.len());

        for entry in entries {
            if ids.insert(entry.id().to_string()) {
                confirmed.push(entry);
            } else {
                warn!("Snapshot contains duplicate id '{}', keeping first", entry.id());
            }
        }

        let mut absorbed = 0;
        for id in &ids {
            if self.provisional.remove(id).is_some() {
                self.absorbed.insert(id.clone());
                absorbed += 1;
            }
        }

        self.confirmed = confirmed;
        self.confirmed_ids = ids;
        absorbed
    }

    /// Add a locally created entry ahead of confirmation
    ///
    /// Returns `false` (and logs) if the id is already known to this list.
    pub fn insert_provisional(&mut self, entry: E) -> bool {
        let id = entry.id().to_string();
        if self.confirmed_ids.contains(&id) || self.absorbed.contains(&id) {
            warn!("Optimistic entry '{}' is already confirmed, ignoring", id);
            return false;
        }
        if self.provisional.contains_key(&id) {
            warn!("Optimistic entry '{}' already pending, ignoring", id);
            return false;
        }

        self.provisional.insert(
            id,
            Provisional {
                entry,
                in_flight: false,
                error: None,
            },
        );
        true
    }

    /// Mark a provisional entry as being written and return a copy of it
    ///
    /// The failed flag is kept until the write succeeds.
    pub fn begin_write(&mut self, id: &str) -> Option<E> {
        let pending = self.provisional.get_mut(id)?;
        pending.in_flight = true;
        Some(pending.entry.clone())
    }

    /// Record the outcome of a write
    ///
    /// Returns `false` if the entry is gone (absorbed or dismissed).
    pub fn finish_write(&mut self, id: &str, result: Result<(), String>) -> bool {
        let Some(pending) = self.provisional.get_mut(id) else {
            return false;
        };
        pending.in_flight = false;
        pending.error = result.err();
        true
    }

    /// Drop a provisional entry
    pub fn remove_provisional(&mut self, id: &str) -> Option<E> {
        self.provisional.remove(id).map(|p| p.entry)
    }

    pub fn is_confirmed(&self, id: &str) -> bool {
        self.confirmed_ids.contains(id)
    }

    pub fn is_absorbed(&self, id: &str) -> bool {
        self.absorbed.contains(id)
    }

    pub fn is_provisional(&self, id: &str) -> bool {
        self.provisional.contains_key(id)
    }

    pub fn is_in_flight(&self, id: &str) -> bool {
        self.provisional.get(id).is_some_and(|p| p.in_flight)
    }

    /// Error of the last failed write for a provisional entry
    pub fn write_error(&self, id: &str) -> Option<&str> {
        self.provisional.get(id).and_then(|p| p.error.as_deref())
    }

    /// Number of provisional entries
    pub fn pending_count(&self) -> usize {
        self.provisional.len()
    }

    /// Discard both partitions and the absorption history
    pub fn clear(&mut self) {
        self.confirmed.clear();
        self.confirmed_ids.clear();
        self.provisional.clear();
        self.absorbed.clear();
    }

    /// The rendered sequence
    pub fn rendered(&self) -> Vec<ViewEntry<E>> {
        let provisional: Vec<ViewEntry<E>> =
            self.provisional.values().map(Provisional::to_view).collect();
        merge(&self.confirmed, &provisional)
    }

    /// Number of rendered entries
    pub fn len(&self) -> usize {
        self.confirmed.len()
            + self
                .provisional
                .keys()
                .filter(|id| !self.confirmed_ids.contains(*id))
                .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Identity, Message};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn msg(id: &str, text: &str, secs: i64) -> Message {
        Message::with_id(id, "thread-1", Identity::from("alice"), text, at(secs))
    }

    fn ids(view: &[ViewEntry<Message>]) -> Vec<&str> {
        view.iter().map(|v| v.entry.id.as_str()).collect()
    }

    #[test]
    fn test_empty_state() {
        let state: ViewState<Message> = ViewState::new();
        assert!(state.is_empty());
        assert!(state.rendered().is_empty());
    }

    #[test]
    fn test_order_descending_with_id_tiebreak() {
        let mut state = ViewState::new();
        state.apply_snapshot(vec![msg("b", "x", 5), msg("c", "x", 1), msg("a", "x", 5)]);
        state.insert_provisional(msg("d", "x", 3));

        let view = state.rendered();
        assert_eq!(ids(&view), vec!["a", "b", "d", "c"]);
    }

    #[test]
    fn test_optimistic_insert_is_provisional() {
        let mut state = ViewState::new();
        assert!(state.insert_provisional(msg("a", "hi", 0)));

        let view = state.rendered();
        assert_eq!(view.len(), 1);
        assert!(view[0].provisional);
        assert!(!view[0].failed);
    }

    #[test]
    fn test_snapshot_absorbs_optimistic_entry() {
        let mut state = ViewState::new();
        state.insert_provisional(msg("m1", "optimistic", 10));

        let absorbed = state.apply_snapshot(vec![msg("m1", "confirmed", 12)]);
        assert_eq!(absorbed, 1);

        let view = state.rendered();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].entry.text, "confirmed");
        assert_eq!(view[0].entry.created_at, at(12));
        assert!(!view[0].provisional);
        assert!(state.is_absorbed("m1"));
    }

    #[test]
    fn test_absorbed_entry_cannot_resurface() {
        let mut state = ViewState::new();
        state.insert_provisional(msg("m1", "hi", 1));
        state.apply_snapshot(vec![msg("m1", "hi", 1)]);

        // A later snapshot without m1 must not bring the optimistic copy back
        state.apply_snapshot(vec![]);
        assert!(state.rendered().is_empty());

        // Nor can it be re-inserted
        assert!(!state.insert_provisional(msg("m1", "again", 2)));
        assert!(state.rendered().is_empty());
    }

    #[test]
    fn test_partial_confirmation_keeps_order() {
        let mut state = ViewState::new();
        state.insert_provisional(msg("a", "first", 0));
        state.insert_provisional(msg("b", "second", 1));
        assert_eq!(ids(&state.rendered()), vec!["b", "a"]);

        state.apply_snapshot(vec![msg("a", "first", 0)]);
        let view = state.rendered();
        assert_eq!(ids(&view), vec!["b", "a"]);
        assert!(view[0].provisional);
        assert!(!view[1].provisional);
    }

    #[test]
    fn test_duplicate_ids_in_snapshot_keep_first() {
        let mut state = ViewState::new();
        state.apply_snapshot(vec![msg("x", "first", 1), msg("x", "second", 2)]);

        let view = state.rendered();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].entry.text, "first");
    }

    #[test]
    fn test_duplicate_provisional_rejected() {
        let mut state = ViewState::new();
        assert!(state.insert_provisional(msg("x", "one", 1)));
        assert!(!state.insert_provisional(msg("x", "two", 2)));

        let view = state.rendered();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].entry.text, "one");
    }

    #[test]
    fn test_provisional_rejected_when_confirmed() {
        let mut state = ViewState::new();
        state.apply_snapshot(vec![msg("x", "server", 1)]);
        assert!(!state.insert_provisional(msg("x", "local", 2)));
        assert_eq!(state.rendered()[0].entry.text, "server");
    }

    #[test]
    fn test_write_lifecycle() {
        let mut state = ViewState::new();
        state.insert_provisional(msg("c", "hi", 1));

        let entry = state.begin_write("c").unwrap();
        assert_eq!(entry.id, "c");
        assert!(state.is_in_flight("c"));

        assert!(state.finish_write("c", Err("offline".to_string())));
        assert!(!state.is_in_flight("c"));
        assert_eq!(state.write_error("c"), Some("offline"));
        assert!(state.rendered()[0].failed);

        // Retry keeps the failed flag until it succeeds
        state.begin_write("c").unwrap();
        assert!(state.rendered()[0].failed);
        state.finish_write("c", Ok(()));
        let view = state.rendered();
        assert!(!view[0].failed);
        assert!(view[0].provisional);
    }

    #[test]
    fn test_write_outcome_after_absorption_is_ignored() {
        let mut state = ViewState::new();
        state.insert_provisional(msg("c", "hi", 1));
        state.begin_write("c");
        state.apply_snapshot(vec![msg("c", "hi", 1)]);

        assert!(!state.finish_write("c", Err("late".to_string())));
        assert!(!state.rendered()[0].failed);
        assert!(state.begin_write("c").is_none());
    }

    #[test]
    fn test_remove_provisional() {
        let mut state = ViewState::new();
        state.insert_provisional(msg("c", "hi", 1));
        assert!(state.remove_provisional("c").is_some());
        assert!(state.remove_provisional("c").is_none());
        assert!(state.is_empty());
    }

    #[test]
    fn test_clear_resets_history() {
        let mut state = ViewState::new();
        state.insert_provisional(msg("a", "hi", 1));
        state.apply_snapshot(vec![msg("a", "hi", 1)]);
        state.clear();

        assert!(state.is_empty());
        assert!(!state.is_absorbed("a"));
        assert!(state.insert_provisional(msg("a", "hi", 1)));
    }

    #[test]
    fn test_no_duplicates_across_interleavings() {
        let mut state = ViewState::new();
        state.insert_provisional(msg("a", "a", 1));
        state.insert_provisional(msg("b", "b", 2));
        state.apply_snapshot(vec![msg("b", "b", 2), msg("z", "z", 0)]);
        state.insert_provisional(msg("c", "c", 3));
        state.insert_provisional(msg("b", "b-again", 4));
        state.apply_snapshot(vec![msg("a", "a", 1), msg("b", "b", 2)]);

        let view = state.rendered();
        let mut seen = HashSet::new();
        for v in &view {
            assert!(seen.insert(v.entry.id.clone()), "duplicate {}", v.entry.id);
        }
        assert_eq!(ids(&view), vec!["c", "b", "a"]);
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn test_merge_prefers_confirmed() {
        let confirmed = vec![msg("x", "server", 1)];
        let provisional = vec![ViewEntry {
            entry: msg("x", "local", 9),
            provisional: true,
            failed: true,
        }];

        let view = merge(&confirmed, &provisional);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].entry.text, "server");
        assert!(!view[0].provisional);
        assert!(!view[0].failed);
    }
}
