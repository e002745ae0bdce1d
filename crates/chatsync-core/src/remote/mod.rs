//! Remote ordered collection contract
//!
//! The hosted document store is an external collaborator. This module only
//! describes what the engine consumes from it:
//!
//! 1. Build a [`Query`] over a collection path (optional filter, ordering)
//! 2. Subscribe to it and receive full ordered snapshots
//! 3. Append documents and merge fields into existing ones
//!
//! Snapshots are full restatements of the matching set, never diffs.
//!
//! ## Usage
//!
//! ```ignore
//! let query = Query::new(CollectionPath::root("chats"))
//!     .filter(Filter::array_contains("users", "alice@example.com"))
//!     .order_by("createdAt", Direction::Descending);
//! let mut sub = remote.subscribe(&query)?;
//! while let Some(snapshot) = sub.snapshots.recv().await { /* ... */ }
//! remote.unsubscribe(sub.id);
//! ```

mod error;
mod memory;
mod value;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use error::RemoteError;
pub use memory::MemoryRemote;
pub use value::{Document, Value};

/// Slash-separated path of a collection, e.g. `chats/abc/messages`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionPath(String);

impl CollectionPath {
    /// A top-level collection
    pub fn root(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// A sub-collection nested under one document of this collection
    pub fn nested(&self, doc_id: &DocumentId, name: &str) -> Self {
        Self(format!("{}/{}/{}", self.0, doc_id, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned identifier of a document within a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Sort direction for [`OrderBy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Ordering clause of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Filter clause of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Field equals the value
    Equals { field: String, value: Value },
    /// Field is an array containing the value
    ArrayContains { field: String, value: Value },
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn array_contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::ArrayContains {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Whether a document satisfies this filter
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Equals { field, value } => doc.get(field) == Some(value),
            Filter::ArrayContains { field, value } => match doc.get(field) {
                Some(Value::Array(items)) => items.contains(value),
                _ => false,
            },
        }
    }
}

/// Resolve a dotted field path such as `lastMessage.createdAt`
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_map()?.get(part)?;
    }
    Some(current)
}

/// Condition checked atomically by [`RemoteCollection::update_if`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Precondition {
    /// The value at `path` is missing or does not order after `value`
    NotAfter { path: String, value: Value },
}

impl Precondition {
    pub fn not_after(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Precondition::NotAfter {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Whether the stored document allows the update
    pub fn holds(&self, doc: &Document) -> bool {
        match self {
            Precondition::NotAfter { path, value } => match lookup(doc, path) {
                Some(current) => current.order_cmp(value) != Ordering::Greater,
                None => true,
            },
        }
    }
}

/// A query over one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub collection: CollectionPath,
    pub filter: Option<Filter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filter: None,
            order_by: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }
}

/// One entry of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub id: DocumentId,
    pub fields: Document,
}

/// Full ordered restatement of a query's matching set
pub type Snapshot = Vec<RemoteDocument>;

/// Identifier of a live subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A live subscription returned by [`RemoteCollection::subscribe`]
///
/// Snapshots are delivered on `snapshots` in emission order. Dropping the
/// receiver discards anything still in flight.
#[derive(Debug)]
pub struct RemoteSubscription {
    pub id: SubscriptionId,
    pub snapshots: mpsc::UnboundedReceiver<Snapshot>,
}

/// Capability set consumed from the hosted document store
#[async_trait]
pub trait RemoteCollection: Send + Sync {
    /// Start observing a query. Does not wait for the first snapshot.
    fn subscribe(&self, query: &Query) -> Result<RemoteSubscription, RemoteError>;

    /// Stop a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Append a new document, returning its store-assigned id
    async fn append(
        &self,
        collection: &CollectionPath,
        fields: Document,
    ) -> Result<DocumentId, RemoteError>;

    /// Merge fields into an existing document
    async fn update(
        &self,
        collection: &CollectionPath,
        id: &DocumentId,
        fields: Document,
    ) -> Result<(), RemoteError>;

    /// Merge fields into an existing document only if `precondition` holds
    ///
    /// The check and the write are one atomic step. Returns `false` when the
    /// precondition failed and nothing was written.
    async fn update_if(
        &self,
        collection: &CollectionPath,
        id: &DocumentId,
        precondition: &Precondition,
        fields: Document,
    ) -> Result<bool, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_nested_path() {
        let chats = CollectionPath::root("chats");
        let messages = chats.nested(&DocumentId::from("abc"), "messages");
        assert_eq!(messages.as_str(), "chats/abc/messages");
        assert_eq!(messages.to_string(), "chats/abc/messages");
    }

    #[test]
    fn test_array_contains_filter() {
        let filter = Filter::array_contains("users", "alice@example.com");
        let member = doc(&[(
            "users",
            Value::Array(vec!["alice@example.com".into(), "bob@example.com".into()]),
        )]);
        let stranger = doc(&[("users", Value::Array(vec!["carol@example.com".into()]))]);
        let malformed = doc(&[("users", Value::from("alice@example.com"))]);

        assert!(filter.matches(&member));
        assert!(!filter.matches(&stranger));
        assert!(!filter.matches(&malformed));
    }

    #[test]
    fn test_equals_filter() {
        let filter = Filter::equals("kind", "direct");
        assert!(filter.matches(&doc(&[("kind", "direct".into())])));
        assert!(!filter.matches(&doc(&[("kind", "group".into())])));
        assert!(!filter.matches(&Document::new()));
    }

    #[test]
    fn test_query_builder() {
        let query = Query::new(CollectionPath::root("chats"))
            .filter(Filter::array_contains("users", "alice@example.com"))
            .order_by("createdAt", Direction::Descending);

        assert_eq!(query.collection.as_str(), "chats");
        assert!(query.filter.is_some());
        let order = query.order_by.unwrap();
        assert_eq!(order.field, "createdAt");
        assert_eq!(order.direction, Direction::Descending);
    }

    #[test]
    fn test_lookup_nested_path() {
        let inner = doc(&[("text", "hi".into())]);
        let outer = doc(&[("lastMessage", Value::Map(inner))]);

        assert_eq!(lookup(&outer, "lastMessage.text"), Some(&Value::from("hi")));
        assert_eq!(lookup(&outer, "lastMessage.missing"), None);
        assert_eq!(lookup(&outer, "lastMessage.text.deeper"), None);
        assert!(lookup(&outer, "lastMessage").is_some());
    }

    #[test]
    fn test_not_after_precondition() {
        let guard = Precondition::not_after("count", 5i64);
        assert!(guard.holds(&Document::new()));
        assert!(guard.holds(&doc(&[("count", 4i64.into())])));
        assert!(guard.holds(&doc(&[("count", 5i64.into())])));
        assert!(!guard.holds(&doc(&[("count", 6i64.into())])));
    }
}
