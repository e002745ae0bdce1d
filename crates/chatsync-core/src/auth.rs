//! Authentication collaborator contract
//!
//! The managed authentication service is external. The engine only needs to
//! observe identity changes and forward sign-in, sign-up and sign-out.
//! [`MemoryAuth`] is an in-process implementation for tests and local use.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::AuthError;
use crate::models::Identity;

/// Minimum password length accepted on sign-up
pub const MIN_PASSWORD_LEN: usize = 6;

/// Capability set consumed from the authentication service
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Register for identity changes
    ///
    /// The first notification carries the resolved initial identity; each
    /// later one replaces it. `None` means signed out.
    fn observe(&self) -> mpsc::UnboundedReceiver<Option<Identity>>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    /// Create an account and sign into it
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Check that an email looks like `local@domain`
pub fn validate_email(email: &str) -> Result<(), AuthError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(AuthError::InvalidEmail(email.to_string())),
    }
}

#[derive(Default)]
struct AuthState {
    accounts: HashMap<String, String>,
    current: Option<Identity>,
    resolved: bool,
    offline: bool,
    observers: Vec<mpsc::UnboundedSender<Option<Identity>>>,
}

impl AuthState {
    fn notify(&mut self) {
        let current = self.current.clone();
        self.observers.retain(|tx| tx.send(current.clone()).is_ok());
    }

    fn ensure_online(&self) -> Result<(), AuthError> {
        if self.offline {
            Err(AuthError::Unavailable("auth service is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

/// In-memory [`AuthProvider`]
pub struct MemoryAuth {
    state: Mutex<AuthState>,
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuth {
    /// A service whose initial state (signed out) is already resolved
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AuthState {
                resolved: true,
                ..AuthState::default()
            }),
        }
    }

    /// A service that has not yet resolved the initial identity
    ///
    /// Observers receive nothing until [`resolve`](Self::resolve) is called.
    pub fn deferred() -> Self {
        Self {
            state: Mutex::new(AuthState::default()),
        }
    }

    /// Register an account
    pub fn with_account(self, email: &str, password: &str) -> Self {
        self.lock()
            .accounts
            .insert(email.to_string(), password.to_string());
        self
    }

    /// Resolve the initial identity (or replace it) and notify observers
    pub fn resolve(&self, identity: Option<Identity>) {
        let mut state = self.lock();
        state.resolved = true;
        state.current = identity;
        state.notify();
    }

    pub fn set_online(&self, online: bool) {
        self.lock().offline = !online;
    }

    pub fn current(&self) -> Option<Identity> {
        self.lock().current.clone()
    }

    fn lock(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    fn observe(&self) -> mpsc::UnboundedReceiver<Option<Identity>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if state.resolved {
            let _ = tx.send(state.current.clone());
        }
        state.observers.push(tx);
        rx
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = email.trim();
        let mut state = self.lock();
        state.ensure_online()?;
        validate_email(email)?;

        match state.accounts.get(email) {
            Some(stored) if stored == password => {}
            _ => {
                debug!("Rejected sign-in for {}", email);
                return Err(AuthError::InvalidCredential);
            }
        }

        let identity = Identity::from(email);
        state.current = Some(identity.clone());
        state.notify();
        info!("Signed in as {}", identity);
        Ok(identity)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = email.trim();
        let mut state = self.lock();
        state.ensure_online()?;
        validate_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword {
                min_len: MIN_PASSWORD_LEN,
            });
        }
        if state.accounts.contains_key(email) {
            return Err(AuthError::EmailInUse(email.to_string()));
        }

        state
            .accounts
            .insert(email.to_string(), password.to_string());
        let identity = Identity::from(email);
        state.current = Some(identity.clone());
        state.notify();
        info!("Signed up as {}", identity);
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let mut state = self.lock();
        state.ensure_online()?;
        if let Some(identity) = state.current.take() {
            info!("Signed out {}", identity);
        }
        state.notify();
        Ok(())
    }
}
