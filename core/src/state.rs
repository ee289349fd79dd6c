/// Per-session view state fed by the live subscriptions.
use crate::types::{ActiveConversation, ChatListEntry, ChatRecord, ConnectionEntry, GroupRecord, MessageRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Everything the embedding view renders from. Written only by the listener
/// consumers and the managers; read by anyone through [`SharedState`].
#[derive(Default)]
pub struct ViewState {
    /// The conversation currently displayed, if any
    pub active: Option<ActiveConversation>,

    /// Messages of the active conversation, ascending by timestamp
    pub messages: Vec<MessageRecord>,

    /// The unified, ordered chat list
    pub chat_list: Vec<ChatListEntry>,

    /// Latest snapshot of the chat-summaries subscription
    pub summaries: Vec<ChatRecord>,

    /// The user's standing connection set, refreshed alongside the summaries
    pub connections: HashMap<String, ConnectionEntry>,

    /// Latest snapshot of the group-memberships subscription
    pub memberships: Vec<GroupRecord>,
}

impl ViewState {
    /// Forget everything; used on sign-out.
    pub fn clear(&mut self) {
        self.active = None;
        self.messages.clear();
        self.chat_list.clear();
        self.summaries.clear();
        self.connections.clear();
        self.memberships.clear();
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.active.as_ref().map(|a| a.key == key).unwrap_or(false)
    }
}

pub type SharedState = Arc<RwLock<ViewState>>;
