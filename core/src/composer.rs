/// Message composition: append a message and keep the parent's summary
/// fields current.
///
/// The summary merge and the message append are two sequential writes, not
/// one atomic operation. If the append fails after the summary committed,
/// the whole send is reported failed and the caller restores the input for
/// retry. That is safe only because the summary write is an overwrite, not
/// an append.
use crate::error::{ChatError, Result};
use crate::session::SessionContext;
use crate::types::now_iso;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

pub struct Composer {
    ctx: Arc<SessionContext>,
}

impl Composer {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    fn prepare<'t>(&self, text: &'t str) -> Result<&'t str> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if !self.ctx.is_online() {
            return Err(ChatError::Offline(
                "cannot send while disconnected".to_string(),
            ));
        }
        Ok(text)
    }

    /// Send into a direct conversation.
    pub async fn send_direct(&self, conversation_id: &str, peer_uid: &str, text: &str) -> Result<()> {
        let text = self.prepare(text)?;
        let now = now_iso();
        let mut participants = [self.ctx.uid.clone(), peer_uid.to_string()];
        participants.sort();

        self.ctx
            .store
            .set_merge(
                "chats",
                conversation_id,
                json!({
                    "participants": participants,
                    "lastMessage": text,
                    "lastMessageTime": now,
                    "updatedAt": now,
                }),
            )
            .await?;

        let collection = format!("chats/{}/messages", conversation_id);
        match self
            .ctx
            .store
            .add(
                &collection,
                json!({
                    "text": text,
                    "sender": self.ctx.uid,
                    "receiver": peer_uid,
                    "timestamp": now,
                }),
            )
            .await
        {
            Ok(id) => {
                debug!(conversation = %conversation_id, message = %id, "message sent");
                Ok(())
            }
            Err(e) => Err(ChatError::PartialFailure(format!(
                "summary updated but message append failed: {}",
                e
            ))),
        }
    }

    /// Send into a group, denormalizing the sender's display name.
    pub async fn send_group(&self, group_id: &str, text: &str) -> Result<()> {
        let text = self.prepare(text)?;
        let now = now_iso();
        let sender_name = self
            .ctx
            .auth
            .display_name
            .clone()
            .unwrap_or_else(|| "Unknown User".to_string());

        self.ctx
            .store
            .set_merge(
                "groups",
                group_id,
                json!({
                    "lastMessage": text,
                    "lastMessageTime": now,
                }),
            )
            .await?;

        let collection = format!("groups/{}/messages", group_id);
        match self
            .ctx
            .store
            .add(
                &collection,
                json!({
                    "text": text,
                    "sender": self.ctx.uid,
                    "senderName": sender_name,
                    "timestamp": now,
                }),
            )
            .await
        {
            Ok(id) => {
                debug!(group = %group_id, message = %id, "group message sent");
                Ok(())
            }
            Err(e) => Err(ChatError::PartialFailure(format!(
                "summary updated but message append failed: {}",
                e
            ))),
        }
    }
}
