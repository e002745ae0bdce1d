//! Data models for chatsync
//!
//! Defines the core data structures: Identity, ChatThread, and Message,
//! along with their encoding as remote documents. Field names of the
//! encoded form match what existing clients already store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DecodeError;
use crate::reconcile::{Entry, FollowUp};
use crate::remote::{Document, DocumentId, Precondition, RemoteDocument, Value};
use crate::scope::{CollectionLayout, Scope};

/// Opaque, stable user identifier (an email address)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Uppercase first letter of each space-separated word, for avatar badges
    pub fn initials(&self) -> String {
        self.0
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .flat_map(char::to_uppercase)
            .collect()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Denormalized summary of a thread's most recent message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub sender: Identity,
}

impl LastMessage {
    fn encode(&self) -> Value {
        let mut doc = Document::new();
        doc.insert("text".to_string(), self.text.clone().into());
        doc.insert("createdAt".to_string(), self.created_at.into());
        doc.insert("user".to_string(), encode_user(&self.sender));
        Value::Map(doc)
    }

    fn decode(value: &Value, id: &DocumentId) -> Result<Self, DecodeError> {
        let map = value
            .as_map()
            .ok_or_else(|| DecodeError::new(id, "lastMessage is not a map"))?;
        Ok(Self {
            text: string_field(map, "text", id)?,
            created_at: timestamp_field(map, "createdAt", id)?,
            sender: user_field(map, id)?,
        })
    }
}

/// A conversation between two or more participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatThread {
    /// Store-assigned identifier
    pub id: String,
    /// Members of the thread, fixed at creation
    pub participants: Vec<Identity>,
    /// When the thread was created
    pub created_at: DateTime<Utc>,
    /// Summary of the most recent message
    pub last_message: Option<LastMessage>,
    /// Display name per participant
    pub display_names: BTreeMap<Identity, String>,
}

impl ChatThread {
    /// Create a thread between `creator` and `other`, opened with a greeting
    ///
    /// The id stays empty until the store assigns one.
    pub fn new(creator: &Identity, other: &Identity, greeting: &str) -> Self {
        let now = Utc::now();
        let mut participants = vec![creator.clone()];
        if other != creator {
            participants.push(other.clone());
        }
        let display_names = participants
            .iter()
            .map(|p| (p.clone(), p.to_string()))
            .collect();

        Self {
            id: String::new(),
            participants,
            created_at: now,
            last_message: Some(LastMessage {
                text: greeting.to_string(),
                created_at: now,
                sender: creator.clone(),
            }),
            display_names,
        }
    }

    /// First participant that is not `me`
    pub fn other_participant(&self, me: &Identity) -> Option<&Identity> {
        self.participants.iter().find(|p| *p != me)
    }

    /// Name to show for the thread from `me`'s point of view
    pub fn title_for(&self, me: &Identity) -> String {
        match self.other_participant(me) {
            Some(other) => self
                .display_names
                .get(other)
                .cloned()
                .unwrap_or_else(|| format!("Chat with {}", other)),
            None => String::new(),
        }
    }

    pub fn has_participant(&self, identity: &Identity) -> bool {
        self.participants.contains(identity)
    }
}

impl Entry for ChatThread {
    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn decode(doc: &RemoteDocument, _scope: &Scope) -> Result<Self, DecodeError> {
        let fields = &doc.fields;
        let participants = fields
            .get("users")
            .and_then(Value::as_array)
            .ok_or_else(|| DecodeError::new(&doc.id, "missing users"))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(Identity::from)
                    .ok_or_else(|| DecodeError::new(&doc.id, "non-string user"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let last_message = fields
            .get("lastMessage")
            .map(|v| LastMessage::decode(v, &doc.id))
            .transpose()?;

        let display_names = fields
            .get("userNames")
            .and_then(Value::as_map)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|(k, v)| {
                        v.as_str()
                            .map(|n| (Identity::from(k.as_str()), n.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            id: doc.id.to_string(),
            participants,
            created_at: timestamp_field(fields, "createdAt", &doc.id)?,
            last_message,
            display_names,
        })
    }

    fn encode(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(
            "users".to_string(),
            Value::Array(self.participants.iter().map(|p| p.as_str().into()).collect()),
        );
        doc.insert("createdAt".to_string(), self.created_at.into());
        if let Some(last) = &self.last_message {
            doc.insert("lastMessage".to_string(), last.encode());
        }
        let names: Document = self
            .display_names
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(v.as_str())))
            .collect();
        doc.insert("userNames".to_string(), Value::Map(names));
        doc
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Client-generated identifier, assigned before any network round-trip
    pub id: String,
    /// Owning thread
    pub chat_id: String,
    /// Message content
    pub text: String,
    /// Client timestamp, superseded by the confirmed value
    pub created_at: DateTime<Utc>,
    /// Author
    pub sender: Identity,
}

impl Message {
    /// Create a new message stamped with a fresh id and the current time
    pub fn new(chat_id: impl Into<String>, sender: Identity, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            text: text.into(),
            created_at: Utc::now(),
            sender,
        }
    }

    /// Create a message with a specific id and timestamp
    pub fn with_id(
        id: impl Into<String>,
        chat_id: impl Into<String>,
        sender: Identity,
        text: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            chat_id: chat_id.into(),
            text: text.into(),
            created_at,
            sender,
        }
    }

    /// Summary written to the owning thread
    pub fn summary(&self) -> LastMessage {
        LastMessage {
            text: self.text.clone(),
            created_at: self.created_at,
            sender: self.sender.clone(),
        }
    }
}

impl Entry for Message {
    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn decode(doc: &RemoteDocument, scope: &Scope) -> Result<Self, DecodeError> {
        let fields = &doc.fields;
        // Documents written without a client id fall back to the store id
        let id = match fields.get("_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => doc.id.to_string(),
        };
        let chat_id = match scope {
            Scope::Messages { chat_id } => chat_id.to_string(),
            Scope::Threads { .. } => String::new(),
        };

        Ok(Self {
            id,
            chat_id,
            text: string_field(fields, "text", &doc.id)?,
            created_at: timestamp_field(fields, "createdAt", &doc.id)?,
            sender: user_field(fields, &doc.id)?,
        })
    }

    fn encode(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("_id".to_string(), self.id.as_str().into());
        doc.insert("text".to_string(), self.text.as_str().into());
        doc.insert("createdAt".to_string(), self.created_at.into());
        doc.insert("user".to_string(), encode_user(&self.sender));
        doc
    }

    /// Refresh the owning thread's `lastMessage`, never moving it backwards
    fn follow_up(&self, layout: &CollectionLayout) -> Option<FollowUp> {
        if self.chat_id.is_empty() {
            return None;
        }
        let mut patch = Document::new();
        patch.insert("lastMessage".to_string(), self.summary().encode());
        Some(FollowUp {
            collection: layout.threads(),
            id: DocumentId::new(self.chat_id.as_str()),
            patch,
            precondition: Some(Precondition::not_after(
                "lastMessage.createdAt",
                self.created_at,
            )),
        })
    }
}

fn encode_user(identity: &Identity) -> Value {
    let mut user = Document::new();
    user.insert("_id".to_string(), identity.as_str().into());
    user.insert("name".to_string(), identity.as_str().into());
    Value::Map(user)
}

fn string_field(fields: &Document, name: &str, id: &DocumentId) -> Result<String, DecodeError> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DecodeError::new(id, format!("missing string field '{}'", name)))
}

fn timestamp_field(
    fields: &Document,
    name: &str,
    id: &DocumentId,
) -> Result<DateTime<Utc>, DecodeError> {
    fields
        .get(name)
        .and_then(Value::as_timestamp)
        .ok_or_else(|| DecodeError::new(id, format!("missing timestamp field '{}'", name)))
}

fn user_field(fields: &Document, id: &DocumentId) -> Result<Identity, DecodeError> {
    fields
        .get("user")
        .and_then(Value::as_map)
        .and_then(|user| user.get("_id"))
        .and_then(Value::as_str)
        .map(Identity::from)
        .ok_or_else(|| DecodeError::new(id, "missing user._id"))
}
