/// Connection management: establish, open, and delete direct conversations.
use crate::error::{ChatError, Result};
use crate::identity::IdentityResolver;
use crate::listener::ListenerSet;
use crate::quota::{self, QuotaDecision};
use crate::session::SessionContext;
use crate::state::SharedState;
use crate::store::{DocRef, Query};
use crate::types::{
    conversation_id, now_iso, ActiveConversation, ChatEvent, ChatKind, PeerProfile, UserRecord,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ConnectionManager {
    ctx: Arc<SessionContext>,
    state: SharedState,
    listeners: Arc<ListenerSet>,
    identity: IdentityResolver,
}

impl ConnectionManager {
    pub fn new(
        ctx: Arc<SessionContext>,
        state: SharedState,
        listeners: Arc<ListenerSet>,
        identity: IdentityResolver,
    ) -> Self {
        Self {
            ctx,
            state,
            listeners,
            identity,
        }
    }

    /// Establish (or re-establish) a direct conversation with the user named
    /// by `recipient_short_id`. Safe to call again for the same peer: both
    /// writes are upserts and converge to the same state.
    pub async fn connect(&self, recipient_short_id: &str) -> Result<String> {
        let recipient = self.identity.verify_recipient(recipient_short_id).await?;
        if recipient.uid == self.ctx.uid {
            return Err(ChatError::SelfConnectionDenied);
        }

        let me = self.identity.own_record().await?;
        if let QuotaDecision::Denied { limit } = quota::check(&me, &self.ctx.config) {
            return Err(ChatError::QuotaExceeded(limit));
        }

        let id = conversation_id(&self.ctx.uid, &recipient.uid);
        let mut participants = [self.ctx.uid.clone(), recipient.uid.clone()];
        participants.sort();
        let now = now_iso();

        self.ctx
            .store
            .set_merge(
                "chats",
                &id,
                json!({
                    "participants": participants,
                    "createdAt": now,
                    "lastMessageTime": now,
                }),
            )
            .await?;

        let short_id = recipient.short_id.clone().unwrap_or_default();
        self.ctx
            .store
            .set_merge(
                "users",
                &self.ctx.uid,
                json!({
                    "connections": {
                        (&recipient.uid): { "shortId": short_id, "timestamp": now }
                    }
                }),
            )
            .await?;

        info!(conversation = %id, peer = %recipient.uid, "connected");
        self.activate(&id, &recipient).await;
        Ok(id)
    }

    /// Open an existing conversation from the chat list, refreshing the
    /// peer's profile first.
    pub async fn open_conversation(&self, peer_uid: &str) -> Result<String> {
        let doc = self
            .ctx
            .store
            .get("users", peer_uid)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("users/{}", peer_uid)))?;
        let recipient = UserRecord::from_doc(&doc)?;

        let id = conversation_id(&self.ctx.uid, peer_uid);
        self.activate(&id, &recipient).await;
        Ok(id)
    }

    /// Close the open conversation. Releases the message subscription and
    /// clears view state; persisted data is untouched.
    pub async fn disconnect(&self) {
        self.listeners.detach_messages();
        let closed = {
            let mut view = self.state.write().await;
            let closed = view.active.take().map(|a| a.key);
            view.messages.clear();
            closed
        };
        if let Some(conversation) = closed {
            self.ctx.emit(ChatEvent::ConversationClosed { conversation });
        }
    }

    /// Delete a conversation: every message plus the conversation record go
    /// in one atomic batch. The connection-set cleanup is a separate,
    /// best-effort write; the batch is the source of truth for "deleted".
    pub async fn delete_conversation(&self, conversation_id: &str, peer_uid: &str) -> Result<()> {
        let messages_collection = format!("chats/{}/messages", conversation_id);
        let messages = self
            .ctx
            .store
            .query(&Query::collection(messages_collection.clone()))
            .await?;

        let mut refs: Vec<DocRef> = messages
            .iter()
            .map(|doc| DocRef::new(messages_collection.clone(), doc.id.clone()))
            .collect();
        refs.push(DocRef::new("chats", conversation_id));
        self.ctx.store.delete_batch(&refs).await?;
        info!(conversation = %conversation_id, messages = messages.len(), "conversation deleted");

        if let Err(e) = self.remove_connection_entry(peer_uid).await {
            warn!(peer = %peer_uid, error = %e, "failed to remove connection entry");
        }

        let was_active = self.state.read().await.is_active(conversation_id);
        if was_active {
            self.disconnect().await;
        }
        Ok(())
    }

    async fn remove_connection_entry(&self, peer_uid: &str) -> Result<()> {
        let me = self.identity.own_record().await?;
        let mut connections = me.connections;
        connections.remove(peer_uid);
        self.ctx
            .store
            .update(
                "users",
                &self.ctx.uid,
                json!({ "connections": connections }),
            )
            .await
    }

    async fn activate(&self, conversation: &str, recipient: &UserRecord) {
        {
            let mut view = self.state.write().await;
            view.active = Some(ActiveConversation {
                key: conversation.to_string(),
                kind: ChatKind::Direct,
                peer: Some(PeerProfile::from_record(recipient)),
            });
            view.messages.clear();
        }
        self.listeners.attach_messages(conversation, ChatKind::Direct);
    }
}
