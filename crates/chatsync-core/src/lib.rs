//! chatsync core library
//!
//! This crate provides the live-collection engine behind a chat client whose
//! data lives in a hosted document store with real-time change
//! notifications.
//!
//! # Architecture
//!
//! - **Remote store**: external collaborator behind [`RemoteCollection`];
//!   pushes full ordered snapshots for each subscribed query
//! - **LiveCollection**: one subscription per mounted list, with optimistic
//!   local appends reconciled against confirmed snapshots
//! - **SessionGate**: tracks the signed-in identity and picks the
//!   navigation graph
//! - **ChatClient**: wires the above together and keeps list scopes in step
//!   with the session
//!
//! # Quick Start
//!
//! ```text
//! let config = Config::load()?;
//! logging::init_logging(&config);
//!
//! let mut client = ChatClient::new(remote, auth, &config);
//! client.sign_in("alice@example.com", "secret1").await?;
//!
//! let chat = client.create_thread("bob@example.com").await?;
//! client.open_chat(chat.as_str())?;
//! client.send("hi")?;
//!
//! while let Some(event) = client.next_event().await {
//!     render(client.thread_view(), client.conversation_view());
//! }
//! ```
//!
//! # Modules
//!
//! - `client`: Session-aware command surface (main entry point)
//! - `collection`: Live collection engine
//! - `reconcile`: Confirmed/provisional merge
//! - `session`: Authentication state gate
//! - `auth`: Authentication collaborator contract
//! - `remote`: Remote store contract and in-memory store
//! - `models`: Threads, messages, identities
//! - `scope`: Subscription scopes and collection layout
//! - `config`: Application configuration
//! - `logging`: File-based debug logging

pub mod auth;
pub mod client;
pub mod collection;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod reconcile;
pub mod remote;
pub mod scope;
pub mod session;

pub use auth::{AuthProvider, MemoryAuth};
pub use client::{ChatClient, ClientEvent, MessageView, ThreadView};
pub use collection::{CollectionStatus, CollectionUpdate, LiveCollection, SubscriptionHandle};
pub use config::Config;
pub use error::{AuthError, DecodeError, SyncError, SyncResult};
pub use models::{ChatThread, Identity, LastMessage, Message};
pub use reconcile::{merge, Entry, FollowUp, ViewEntry, ViewState};
pub use remote::{
    CollectionPath, Document, DocumentId, MemoryRemote, Precondition, RemoteCollection,
    RemoteError, Value,
};
pub use scope::{CollectionLayout, Scope};
pub use session::{NavigationGraph, SessionGate, SessionStatus};
