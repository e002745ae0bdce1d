//! Error handling
//!
//! Typed errors for engine commands, authentication, and document decoding.
//! Transient network failures never surface as panics: at worst a list is
//! empty or a provisional entry carries a failed flag.

use thiserror::Error;

use crate::remote::{DocumentId, RemoteError};

/// A remote document could not be mapped onto a model
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed document '{id}': {reason}")]
pub struct DecodeError {
    pub id: String,
    pub reason: String,
}

impl DecodeError {
    pub fn new(id: &DocumentId, reason: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors reported by an [`AuthProvider`](crate::auth::AuthProvider)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Email is not well formed
    #[error("Invalid email address: '{0}'")]
    InvalidEmail(String),

    /// Password does not meet the minimum length
    #[error("Password must be at least {min_len} characters")]
    WeakPassword { min_len: usize },

    /// An account already exists for this email
    #[error("An account already exists for '{0}'")]
    EmailInUse(String),

    /// Unknown account or wrong password
    #[error("Invalid email or password")]
    InvalidCredential,

    /// The authentication service could not be reached
    #[error("Authentication service unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    /// Short message suitable for the screen that initiated the request
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Unavailable(_) => {
                "Could not reach the sign-in service. Check your connection and try again."
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Errors returned by engine and client commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Connectivity failure talking to the remote store
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Sign-in, sign-up or sign-out rejected
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// The command needs a signed-in identity
    #[error("Not signed in")]
    NotAuthenticated,

    /// No conversation is open to send into
    #[error("No chat is open")]
    NoActiveChat,

    /// Message text is empty or whitespace
    #[error("Message text is empty")]
    EmptyMessage,

    /// A thread participant is empty or equals the creator
    #[error("Invalid participant: '{0}'")]
    InvalidParticipant(String),

    /// No provisional entry has this id
    #[error("No pending entry with id '{0}'")]
    UnknownEntry(String),

    /// A document could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl SyncError {
    /// Whether the same command may succeed if retried later
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Remote(e) => e.is_transient(),
            SyncError::Auth(AuthError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

/// Result type for engine commands
pub type SyncResult<T> = Result<T, SyncError>;
