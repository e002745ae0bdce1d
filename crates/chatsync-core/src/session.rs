//! Session gate
//!
//! Tracks the signed-in identity for the lifetime of the process and decides
//! which navigation graph is active. Until the authentication service has
//! delivered its first notification the gate is `Resolving` and neither
//! graph should be shown.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::auth::AuthProvider;
use crate::models::Identity;

/// Current authentication state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Waiting for the first notification
    Resolving,
    /// Signed in
    Authenticated(Identity),
    /// Signed out
    Unauthenticated,
}

/// Top-level screen graph to present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationGraph {
    /// Login and sign-up screens
    Auth,
    /// Chat list and conversation screens
    Chats,
}

/// Observes the authentication service and exposes a three-state status
pub struct SessionGate {
    status: SessionStatus,
    changes: mpsc::UnboundedReceiver<Option<Identity>>,
    ended: bool,
}

impl SessionGate {
    /// Subscribe to identity changes. Called once per process.
    pub fn new(auth: &dyn AuthProvider) -> Self {
        Self {
            status: SessionStatus::Resolving,
            changes: auth.observe(),
            ended: false,
        }
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.status {
            SessionStatus::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn is_resolving(&self) -> bool {
        self.status == SessionStatus::Resolving
    }

    /// Graph to render, or `None` to show the loading state
    pub fn navigation(&self) -> Option<NavigationGraph> {
        match self.status {
            SessionStatus::Resolving => None,
            SessionStatus::Authenticated(_) => Some(NavigationGraph::Chats),
            SessionStatus::Unauthenticated => Some(NavigationGraph::Auth),
        }
    }

    /// Whether the notification stream has ended
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Wait for the next notification and apply it
    ///
    /// Returns the new status, or `None` once the service stops notifying;
    /// the last status is kept in that case.
    pub async fn next_change(&mut self) -> Option<SessionStatus> {
        if self.ended {
            return None;
        }
        match self.changes.recv().await {
            Some(identity) => Some(self.apply(identity)),
            None => {
                self.mark_ended();
                None
            }
        }
    }

    /// Apply every notification already delivered, without waiting
    ///
    /// Returns `true` if the status changed.
    pub fn poll(&mut self) -> bool {
        let before = self.status.clone();
        while !self.ended {
            match self.changes.try_recv() {
                Ok(identity) => {
                    self.apply(identity);
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => self.mark_ended(),
            }
        }
        self.status != before
    }

    fn apply(&mut self, identity: Option<Identity>) -> SessionStatus {
        let next = match identity {
            Some(identity) => SessionStatus::Authenticated(identity),
            None => SessionStatus::Unauthenticated,
        };
        if self.status == SessionStatus::Resolving {
            info!("Session resolved: {:?}", next);
        } else if self.status != next {
            info!("Session changed: {:?}", next);
        } else {
            debug!("Session notification without change");
        }
        self.status = next.clone();
        next
    }

    fn mark_ended(&mut self) {
        warn!("Authentication notifications ended, keeping {:?}", self.status);
        self.ended = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryAuth;

    #[tokio::test]
    async fn test_resolving_until_first_notification() {
        let auth = MemoryAuth::deferred();
        let mut gate = SessionGate::new(&auth);

        assert!(gate.is_resolving());
        assert_eq!(gate.navigation(), None);
        assert!(!gate.poll());
        assert!(gate.is_resolving());

        auth.resolve(None);
        assert_eq!(gate.next_change().await, Some(SessionStatus::Unauthenticated));
        assert_eq!(gate.navigation(), Some(NavigationGraph::Auth));
    }

    #[tokio::test]
    async fn test_resolves_to_authenticated() {
        let auth = MemoryAuth::deferred();
        let mut gate = SessionGate::new(&auth);
        auth.resolve(Some(Identity::from("alice@example.com")));

        assert!(gate.poll());
        assert_eq!(gate.identity(), Some(&Identity::from("alice@example.com")));
        assert_eq!(gate.navigation(), Some(NavigationGraph::Chats));
    }

    #[tokio::test]
    async fn test_toggles_on_sign_in_and_out() {
        let auth = MemoryAuth::new().with_account("alice@example.com", "secret1");
        let mut gate = SessionGate::new(&auth);
        assert!(gate.poll());
        assert_eq!(gate.status(), &SessionStatus::Unauthenticated);

        auth.sign_in("alice@example.com", "secret1").await.unwrap();
        assert_eq!(
            gate.next_change().await,
            Some(SessionStatus::Authenticated(Identity::from("alice@example.com")))
        );

        auth.sign_out().await.unwrap();
        assert_eq!(gate.next_change().await, Some(SessionStatus::Unauthenticated));
        assert!(!gate.is_resolving());
    }

    #[tokio::test]
    async fn test_each_notification_replaces_identity() {
        let auth = MemoryAuth::new();
        let mut gate = SessionGate::new(&auth);
        auth.resolve(Some(Identity::from("alice")));
        auth.resolve(Some(Identity::from("bob")));

        gate.poll();
        assert_eq!(gate.identity(), Some(&Identity::from("bob")));
    }

    #[tokio::test]
    async fn test_ended_stream_keeps_last_status() {
        let auth = MemoryAuth::new();
        let mut gate = SessionGate::new(&auth);
        gate.poll();
        drop(auth);

        assert_eq!(gate.next_change().await, None);
        assert!(gate.is_ended());
        assert_eq!(gate.status(), &SessionStatus::Unauthenticated);
        assert_eq!(gate.next_change().await, None);
    }
}
