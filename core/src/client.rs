/// The session hub: one `ChatClient` per signed-in user, tying the identity
/// resolver, connection and group managers, composer, and listener
/// multiplexer to a shared session context and view state.
use crate::composer::Composer;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::error::{ChatError, Result};
use crate::group::GroupManager;
use crate::identity::IdentityResolver;
use crate::listener::ListenerSet;
use crate::session::SessionContext;
use crate::state::{SharedState, ViewState};
use crate::store::DocumentStore;
use crate::types::{
    ActiveConversation, AuthUser, ChatEvent, ChatKind, ChatListEntry, MessageRecord, UserRecord,
};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

pub struct ChatClient {
    ctx: Arc<SessionContext>,
    state: SharedState,
    listeners: Arc<ListenerSet>,
    identity: IdentityResolver,
    connections: ConnectionManager,
    groups: GroupManager,
    composer: Composer,
}

impl ChatClient {
    pub fn new(store: Arc<dyn DocumentStore>, config: Config, auth: AuthUser) -> Self {
        let ctx = Arc::new(SessionContext::new(store, config, auth));
        let state: SharedState = Arc::new(RwLock::new(ViewState::default()));
        let listeners = Arc::new(ListenerSet::new(ctx.clone(), state.clone()));
        let identity = IdentityResolver::new(ctx.clone());

        let connections = ConnectionManager::new(
            ctx.clone(),
            state.clone(),
            listeners.clone(),
            identity.clone(),
        );
        let groups = GroupManager::new(
            ctx.clone(),
            state.clone(),
            listeners.clone(),
            identity.clone(),
        );
        let composer = Composer::new(ctx.clone());

        Self {
            ctx,
            state,
            listeners,
            identity,
            connections,
            groups,
            composer,
        }
    }

    /// Bootstrap the profile, mark presence, and attach the chat-summary and
    /// group-membership subscriptions. Returns the signed-in user's record.
    pub async fn sign_in(&self) -> Result<UserRecord> {
        let record = self.identity.ensure_profile().await?;
        if let Err(e) = self.identity.update_presence(true).await {
            warn!(error = %e, "failed to mark presence online");
        }

        self.listeners.attach_chat_summaries();
        self.listeners.attach_group_memberships();
        info!(uid = %self.ctx.uid, "signed in");
        Ok(record)
    }

    /// Mark presence offline (best-effort), release every subscription, and
    /// clear view state.
    pub async fn sign_out(&self) {
        if let Err(e) = self.identity.update_presence(false).await {
            warn!(error = %e, "failed to mark presence offline");
        }
        self.listeners.release_all();
        self.state.write().await.clear();
        info!(uid = %self.ctx.uid, "signed out");
    }

    // ─── Connectivity and events ─────────────────────────────────────────

    pub fn set_online(&self, online: bool) {
        self.ctx.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.ctx.is_online()
    }

    pub fn events(&self) -> broadcast::Receiver<ChatEvent> {
        self.ctx.subscribe_events()
    }

    // ─── View snapshots ──────────────────────────────────────────────────

    pub async fn chat_list(&self) -> Vec<ChatListEntry> {
        self.state.read().await.chat_list.clone()
    }

    pub async fn messages(&self) -> Vec<MessageRecord> {
        self.state.read().await.messages.clone()
    }

    pub async fn active_conversation(&self) -> Option<ActiveConversation> {
        self.state.read().await.active.clone()
    }

    pub async fn own_record(&self) -> Result<UserRecord> {
        self.identity.own_record().await
    }

    /// Resolve a short id to its user (for member pickers and the like).
    pub async fn resolve_short_id(&self, short_id: &str) -> Result<UserRecord> {
        self.identity.verify_recipient(short_id).await
    }

    // ─── Conversations ───────────────────────────────────────────────────

    pub async fn connect(&self, recipient_short_id: &str) -> Result<String> {
        self.connections.connect(recipient_short_id).await
    }

    pub async fn open_conversation(&self, peer_uid: &str) -> Result<String> {
        self.connections.open_conversation(peer_uid).await
    }

    pub async fn disconnect(&self) {
        self.connections.disconnect().await
    }

    pub async fn delete_conversation(&self, conversation_id: &str, peer_uid: &str) -> Result<()> {
        self.connections
            .delete_conversation(conversation_id, peer_uid)
            .await
    }

    // ─── Groups ──────────────────────────────────────────────────────────

    pub async fn create_group(&self, name: &str, member_ids: &[String]) -> Result<String> {
        self.groups.create_group(name, member_ids).await
    }

    pub async fn open_group(&self, group_id: &str) -> Result<()> {
        self.groups.open_group(group_id).await
    }

    pub async fn delete_or_leave_group(&self, group_id: &str) -> Result<()> {
        self.groups.delete_or_leave_group(group_id).await
    }

    // ─── Sending ─────────────────────────────────────────────────────────

    /// Send into whatever conversation is open.
    pub async fn send(&self, text: &str) -> Result<()> {
        let active = self
            .state
            .read()
            .await
            .active
            .clone()
            .ok_or_else(|| ChatError::NotFound("no conversation is open".to_string()))?;

        match active.kind {
            ChatKind::Direct => {
                let peer = active
                    .peer
                    .ok_or_else(|| ChatError::NotFound("peer profile missing".to_string()))?;
                self.composer
                    .send_direct(&active.key, &peer.uid, text)
                    .await
            }
            ChatKind::Group => self.composer.send_group(&active.key, text).await,
        }
    }
}
