//! Subscription scopes
//!
//! A scope is the parent key that bounds one live list: the signed-in
//! identity for the thread list, or a thread id for its message history.

use std::fmt;

use crate::config::Config;
use crate::models::Identity;
use crate::remote::{CollectionPath, Direction, DocumentId, Filter, Query};

/// Field every list is ordered by
pub const ORDER_FIELD: &str = "createdAt";

/// Field holding a thread's participants
pub const PARTICIPANTS_FIELD: &str = "users";

/// Names of the remote collections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionLayout {
    /// Top-level collection of threads
    pub threads: String,
    /// Sub-collection of messages under each thread
    pub messages: String,
}

impl Default for CollectionLayout {
    fn default() -> Self {
        Self {
            threads: "chats".to_string(),
            messages: "messages".to_string(),
        }
    }
}

impl From<&Config> for CollectionLayout {
    fn from(config: &Config) -> Self {
        Self {
            threads: config.threads_collection.clone(),
            messages: config.messages_collection.clone(),
        }
    }
}

impl CollectionLayout {
    pub fn threads(&self) -> CollectionPath {
        CollectionPath::root(self.threads.as_str())
    }

    pub fn messages(&self, chat_id: &DocumentId) -> CollectionPath {
        self.threads().nested(chat_id, &self.messages)
    }
}

/// Parent key of a live list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Threads that contain this identity
    Threads { member: Identity },
    /// Messages of one thread
    Messages { chat_id: DocumentId },
}

impl Scope {
    pub fn threads(member: Identity) -> Self {
        Scope::Threads { member }
    }

    pub fn messages(chat_id: impl Into<DocumentId>) -> Self {
        Scope::Messages {
            chat_id: chat_id.into(),
        }
    }

    /// Collection the scope reads from and appends to
    pub fn collection(&self, layout: &CollectionLayout) -> CollectionPath {
        match self {
            Scope::Threads { .. } => layout.threads(),
            Scope::Messages { chat_id } => layout.messages(chat_id),
        }
    }

    /// Remote query, newest first
    pub fn query(&self, layout: &CollectionLayout) -> Query {
        let query =
            Query::new(self.collection(layout)).order_by(ORDER_FIELD, Direction::Descending);
        match self {
            Scope::Threads { member } => {
                query.filter(Filter::array_contains(PARTICIPANTS_FIELD, member.as_str()))
            }
            Scope::Messages { .. } => query,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Threads { member } => write!(f, "threads:{}", member),
            Scope::Messages { chat_id } => write!(f, "messages:{}", chat_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::Value;

    #[test]
    fn test_messages_query() {
        let scope = Scope::messages("chat-1");
        let query = scope.query(&CollectionLayout::default());

        assert_eq!(query.collection.as_str(), "chats/chat-1/messages");
        assert!(query.filter.is_none());
        let order = query.order_by.unwrap();
        assert_eq!(order.field, "createdAt");
        assert_eq!(order.direction, Direction::Descending);
    }

    #[test]
    fn test_threads_query_filters_by_member() {
        let scope = Scope::threads(Identity::from("alice@example.com"));
        let query = scope.query(&CollectionLayout::default());

        assert_eq!(query.collection.as_str(), "chats");
        match query.filter {
            Some(Filter::ArrayContains { field, value }) => {
                assert_eq!(field, "users");
                assert_eq!(value, Value::from("alice@example.com"));
            }
            other => panic!("unexpected filter: {:?}", other),
        }
    }

    #[test]
    fn test_custom_layout() {
        let layout = CollectionLayout {
            threads: "rooms".to_string(),
            messages: "posts".to_string(),
        };
        let scope = Scope::messages("r1");
        assert_eq!(scope.collection(&layout).as_str(), "rooms/r1/posts");
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::messages("c1").to_string(), "messages:c1");
        assert_eq!(
            Scope::threads(Identity::from("bob")).to_string(),
            "threads:bob"
        );
    }
}
