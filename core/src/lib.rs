/// Chatlink - chat-session synchronization engine
///
/// A client-side orchestration layer over a remote real-time document store:
/// deterministic conversation setup, multiplexed live subscriptions, a
/// unified ordered chat list, and tiered usage quotas.

pub mod chat_list;
pub mod client;
pub mod composer;
pub mod config;
pub mod connection;
pub mod error;
pub mod group;
pub mod identity;
pub mod listener;
pub mod local_store;
pub mod quota;
pub mod session;
pub mod state;
pub mod store;
pub mod types;

pub use client::ChatClient;
pub use config::Config;
pub use error::{ChatError, Result};
pub use local_store::LocalStore;
pub use session::SessionContext;
pub use store::{DocumentStore, Query, Subscription};
pub use types::{AuthUser, ChatEvent, ChatKind, ChatListEntry};
