//! Chat client
//!
//! [`ChatClient`] is the command surface presentation code drives. It owns
//! the session gate, the live thread list, and the live conversation, and
//! keeps their scopes in step with the signed-in identity:
//!
//! - signing in opens the thread list for that identity
//! - signing out closes the thread list and any open conversation
//! - switching identity reopens the thread list and closes the conversation
//!
//! A single driver loop calls [`next_event`](ChatClient::next_event) and
//! re-renders from [`thread_view`](ChatClient::thread_view) and
//! [`conversation_view`](ChatClient::conversation_view) after each event.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::auth::{validate_email, AuthProvider, MIN_PASSWORD_LEN};
use crate::collection::{CollectionStatus, CollectionUpdate, LiveCollection, SubscriptionHandle};
use crate::config::Config;
use crate::error::{AuthError, SyncError, SyncResult};
use crate::models::{ChatThread, Identity, LastMessage, Message};
use crate::reconcile::Entry;
use crate::remote::{DocumentId, RemoteCollection};
use crate::scope::{CollectionLayout, Scope};
use crate::session::{SessionGate, SessionStatus};

/// Something the presentation layer should react to
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The session resolved or changed identity
    Session(SessionStatus),
    /// The thread list changed
    Threads(CollectionUpdate),
    /// The open conversation changed
    Conversation(CollectionUpdate),
    /// The authentication service stopped sending notifications
    SessionEnded,
}

/// One row of the thread list
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadView {
    pub id: String,
    /// Name of the other participant, as seen by the signed-in user
    pub title: String,
    /// Avatar initials of the other participant
    pub initials: String,
    pub participants: Vec<Identity>,
    pub last_message: Option<LastMessage>,
    pub provisional: bool,
    pub failed: bool,
}

/// One bubble of the conversation
#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub sender: Identity,
    /// Sent by the signed-in user
    pub mine: bool,
    pub provisional: bool,
    pub failed: bool,
}

enum Incoming {
    Session(Option<SessionStatus>),
    Threads(CollectionUpdate),
    Conversation(CollectionUpdate),
}

/// Session-aware chat client over a remote store and an auth service
pub struct ChatClient {
    remote: Arc<dyn RemoteCollection>,
    auth: Arc<dyn AuthProvider>,
    layout: CollectionLayout,
    greeting: String,
    session: SessionGate,
    /// Identity the thread list is currently scoped to
    member: Option<Identity>,
    threads: LiveCollection<ChatThread>,
    conversation: LiveCollection<Message>,
    thread_handle: Option<SubscriptionHandle>,
    chat_handle: Option<SubscriptionHandle>,
}

impl ChatClient {
    /// Create a client and start observing the session
    ///
    /// If the auth service has already resolved the identity, the thread
    /// list is opened right away.
    pub fn new(
        remote: Arc<dyn RemoteCollection>,
        auth: Arc<dyn AuthProvider>,
        config: &Config,
    ) -> Self {
        let layout = CollectionLayout::from(config);
        let session = SessionGate::new(auth.as_ref());
        let mut client = Self {
            threads: LiveCollection::new(Arc::clone(&remote), layout.clone()),
            conversation: LiveCollection::new(Arc::clone(&remote), layout.clone()),
            remote,
            auth,
            layout,
            greeting: config.thread_greeting.clone(),
            session,
            member: None,
            thread_handle: None,
            chat_handle: None,
        };
        client.refresh_session();
        client
    }

    pub fn session(&self) -> &SessionGate {
        &self.session
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.session.identity()
    }

    /// Wait for the next session, thread-list or conversation change
    ///
    /// Returns `None` when nothing can produce another event.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        let session_live = !self.session.is_ended();
        let incoming = tokio::select! {
            change = self.session.next_change(), if session_live => Incoming::Session(change),
            Some(update) = self.threads.next_update() => Incoming::Threads(update),
            Some(update) = self.conversation.next_update() => Incoming::Conversation(update),
            else => return None,
        };

        let event = match incoming {
            Incoming::Session(Some(status)) => {
                self.apply_session(&status);
                ClientEvent::Session(status)
            }
            Incoming::Session(None) => ClientEvent::SessionEnded,
            Incoming::Threads(update) => ClientEvent::Threads(update),
            Incoming::Conversation(update) => ClientEvent::Conversation(update),
        };
        Some(event)
    }

    /// Apply every change already delivered, without waiting
    ///
    /// Returns the number of collection updates applied.
    pub fn drain(&mut self) -> usize {
        self.refresh_session();
        self.threads.drain() + self.conversation.drain()
    }

    /// Wait for all writes in flight, then apply everything delivered
    pub async fn settle(&mut self) {
        self.refresh_session();
        // Message writes refresh the thread list, so the list settles last
        self.conversation.settle().await;
        self.threads.settle().await;
    }

    fn refresh_session(&mut self) {
        self.session.poll();
        let status = self.session.status().clone();
        self.apply_session(&status);
    }

    fn apply_session(&mut self, status: &SessionStatus) {
        match status {
            SessionStatus::Resolving => {}
            SessionStatus::Authenticated(identity) => {
                if self.member.as_ref() == Some(identity) {
                    return;
                }
                info!("Scoping thread list to {}", identity);
                self.close_chat();
                self.thread_handle = Some(self.threads.open(Scope::threads(identity.clone())));
                self.member = Some(identity.clone());
            }
            SessionStatus::Unauthenticated => {
                if self.member.take().is_some() {
                    info!("Signed out, closing live lists");
                }
                self.close_chat();
                if let Some(handle) = self.thread_handle.take() {
                    self.threads.close(&handle);
                }
            }
        }
    }

    /// Reopen the thread list for the signed-in identity
    ///
    /// Lets the user retry after the list failed to load.
    pub fn reload_threads(&mut self) -> SyncResult<()> {
        let identity = self
            .identity()
            .cloned()
            .ok_or(SyncError::NotAuthenticated)?;
        info!("Reloading thread list for {}", identity);
        self.thread_handle = Some(self.threads.open(Scope::threads(identity.clone())));
        self.member = Some(identity);
        Ok(())
    }

    /// Open the conversation of `chat_id`, replacing any open one
    pub fn open_chat(&mut self, chat_id: impl Into<DocumentId>) -> SyncResult<()> {
        if self.identity().is_none() {
            return Err(SyncError::NotAuthenticated);
        }
        let chat_id = chat_id.into();
        debug!("Opening chat {}", chat_id);
        self.chat_handle = Some(self.conversation.open(Scope::messages(chat_id)));
        Ok(())
    }

    /// Close the open conversation, if any
    pub fn close_chat(&mut self) {
        if let Some(handle) = self.chat_handle.take() {
            self.conversation.close(&handle);
        }
    }

    /// Thread id of the open conversation
    pub fn active_chat(&self) -> Option<&DocumentId> {
        match self.conversation.scope() {
            Some(Scope::Messages { chat_id }) => Some(chat_id),
            _ => None,
        }
    }

    /// Send a message to the open conversation
    ///
    /// The message shows up immediately as provisional and is written in
    /// the background. Returns its id, which `retry` and `dismiss` accept.
    pub fn send(&mut self, text: &str) -> SyncResult<String> {
        let sender = self
            .identity()
            .cloned()
            .ok_or(SyncError::NotAuthenticated)?;
        if text.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let chat_id = self.active_chat().cloned().ok_or(SyncError::NoActiveChat)?;

        let message = Message::new(chat_id.as_str(), sender, text);
        let id = message.id.clone();
        if !self.conversation.append_optimistic(message) {
            return Err(SyncError::UnknownEntry(id));
        }
        self.conversation.commit(&id)?;
        Ok(id)
    }

    /// Write a failed message again
    pub fn retry(&mut self, id: &str) -> SyncResult<()> {
        self.conversation.commit(id)
    }

    /// Drop a provisional message from the conversation
    pub fn dismiss(&mut self, id: &str) -> SyncResult<()> {
        self.conversation.dismiss(id).map(|_| ())
    }

    /// Create a thread with `other` and return its store id
    ///
    /// Waits for the store to accept the thread; it appears in the thread
    /// list with the next snapshot.
    pub async fn create_thread(&mut self, other: &str) -> SyncResult<String> {
        let me = self
            .identity()
            .cloned()
            .ok_or(SyncError::NotAuthenticated)?;
        let other = other.trim();
        if other.is_empty() || other == me.as_str() {
            return Err(SyncError::InvalidParticipant(other.to_string()));
        }

        let thread = ChatThread::new(&me, &Identity::from(other), &self.greeting);
        let id = self
            .remote
            .append(&self.layout.threads(), thread.encode())
            .await?;
        info!("Created thread {} with {}", id, other);
        Ok(id.to_string())
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> SyncResult<Identity> {
        let identity = self.auth.sign_in(email, password).await?;
        self.refresh_session();
        Ok(identity)
    }

    /// Create an account and sign into it
    pub async fn sign_up(&mut self, email: &str, password: &str) -> SyncResult<Identity> {
        validate_email(email.trim())?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword {
                min_len: MIN_PASSWORD_LEN,
            }
            .into());
        }
        let identity = self.auth.sign_up(email, password).await?;
        self.refresh_session();
        Ok(identity)
    }

    pub async fn sign_out(&mut self) -> SyncResult<()> {
        self.auth.sign_out().await?;
        self.refresh_session();
        Ok(())
    }

    /// The thread list, newest first
    pub fn thread_view(&self) -> Vec<ThreadView> {
        let me = self.identity();
        self.threads
            .view()
            .into_iter()
            .map(|v| {
                let title = me.map(|me| v.entry.title_for(me)).unwrap_or_default();
                let initials = me
                    .and_then(|me| v.entry.other_participant(me))
                    .map(Identity::initials)
                    .unwrap_or_default();
                ThreadView {
                    id: v.entry.id().to_string(),
                    initials,
                    title,
                    participants: v.entry.participants,
                    last_message: v.entry.last_message,
                    provisional: v.provisional,
                    failed: v.failed,
                }
            })
            .collect()
    }

    /// Messages of the open conversation, newest first
    pub fn conversation_view(&self) -> Vec<MessageView> {
        let me = self.identity();
        self.conversation
            .view()
            .into_iter()
            .map(|v| MessageView {
                mine: me == Some(&v.entry.sender),
                id: v.entry.id,
                text: v.entry.text,
                created_at: v.entry.created_at,
                sender: v.entry.sender,
                provisional: v.provisional,
                failed: v.failed,
            })
            .collect()
    }

    pub fn threads_status(&self) -> CollectionStatus {
        self.threads.status()
    }

    pub fn conversation_status(&self) -> CollectionStatus {
        self.conversation.status()
    }

    /// Why the thread list could not be loaded, if it failed
    pub fn threads_error(&self) -> Option<&SyncError> {
        self.threads.load_error()
    }

    /// Why the conversation could not be loaded, if it failed
    pub fn conversation_error(&self) -> Option<&SyncError> {
        self.conversation.load_error()
    }

    /// Error of the last failed write of message `id`
    pub fn send_error(&self, id: &str) -> Option<&str> {
        self.conversation.write_error(id)
    }
}
