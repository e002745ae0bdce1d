//! Remote collaborator errors

use thiserror::Error;

/// Errors reported by a [`RemoteCollection`](super::RemoteCollection)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The store could not be reached
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// The addressed document does not exist
    #[error("Document '{id}' not found in '{collection}'")]
    NotFound { collection: String, id: String },

    /// The store refused the operation (rules, quota, malformed request)
    #[error("Remote store rejected the request: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether retrying later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_))
    }
}
