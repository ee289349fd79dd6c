/// Group management: create, open, leave, and dissolve multi-member
/// conversations. Deletion rights are asymmetric: only the creator removes
/// the group itself; anyone else only removes themselves.
use crate::error::{ChatError, Result};
use crate::identity::IdentityResolver;
use crate::listener::ListenerSet;
use crate::quota::{self, QuotaDecision};
use crate::session::SessionContext;
use crate::state::SharedState;
use crate::store::{DocRef, Query};
use crate::types::{now_iso, ActiveConversation, ChatEvent, ChatKind, GroupRecord, UserRecord};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

pub const MAX_GROUP_NAME_CHARS: usize = 30;

pub struct GroupManager {
    ctx: Arc<SessionContext>,
    state: SharedState,
    listeners: Arc<ListenerSet>,
    identity: IdentityResolver,
}

impl GroupManager {
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

    /// Create a group with the caller plus `member_ids`.
    ///
    /// The group record is the durable anchor: once it exists, a failed
    /// membership write on the creator's own record degrades to a notice
    /// rather than an error, and the other members' membership writes run in
    /// the background, each isolated: one failing neither rolls back the
    /// group nor affects the rest.
    pub async fn create_group(&self, name: &str, member_ids: &[String]) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::InvalidInput("group name is empty".to_string()));
        }
        if name.chars().count() > MAX_GROUP_NAME_CHARS {
            return Err(ChatError::InvalidInput(format!(
                "group name is longer than {} characters",
                MAX_GROUP_NAME_CHARS
            )));
        }
        if member_ids.is_empty() {
            return Err(ChatError::InvalidInput(
                "a group needs at least one member besides you".to_string(),
            ));
        }

        let me = self.identity.own_record().await?;
        if let QuotaDecision::Denied { limit } = quota::check(&me, &self.ctx.config) {
            return Err(ChatError::QuotaExceeded(limit));
        }

        let mut members = vec![self.ctx.uid.clone()];
        for member in member_ids {
            if !members.contains(member) {
                members.push(member.clone());
            }
        }
        let now = now_iso();

        let group_id = self
            .ctx
            .store
            .add(
                "groups",
                json!({
                    "name": name,
                    "createdBy": self.ctx.uid,
                    "createdAt": now,
                    "lastMessageTime": now,
                    "members": members,
                    "isGroup": true,
                }),
            )
            .await?;
        info!(group = %group_id, name, "group created");

        // Creator's own membership entry, synchronously. The group already
        // exists, so a failure here is degraded mode, not an error.
        let stamp = json!({ "groups": { (&group_id): { "joinedAt": now } } });
        if let Err(e) = self
            .ctx
            .store
            .set_merge("users", &self.ctx.uid, stamp)
            .await
        {
            warn!(group = %group_id, error = %e, "failed to record own membership");
            self.ctx.notice(
                "Group created, but it could not be added to your profile yet",
                true,
            );
        }

        // Remaining members in the background, one isolated write each
        let others: Vec<String> = member_ids
            .iter()
            .filter(|m| **m != self.ctx.uid)
            .cloned()
            .collect();
        let ctx = self.ctx.clone();
        let gid = group_id.clone();
        tokio::spawn(async move {
            for member in others {
                match ctx.store.get("users", &member).await {
                    Ok(Some(_)) => {
                        let stamp = json!({
                            "groups": {
                                (&gid): { "joinedAt": now_iso(), "addedBy": ctx.uid }
                            }
                        });
                        if let Err(e) = ctx.store.set_merge("users", &member, stamp).await {
                            warn!(group = %gid, member = %member, error = %e,
                                "failed to record membership");
                        }
                    }
                    Ok(None) => {
                        warn!(group = %gid, member = %member, "member has no user record");
                    }
                    Err(e) => {
                        warn!(group = %gid, member = %member, error = %e,
                            "failed to look up member");
                    }
                }
            }
        });

        Ok(group_id)
    }

    /// Open a group conversation and attach its message subscription.
    pub async fn open_group(&self, group_id: &str) -> Result<()> {
        let doc = self
            .ctx
            .store
            .get("groups", group_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("groups/{}", group_id)))?;
        let group = GroupRecord::from_doc(&doc)?;

        {
            let mut view = self.state.write().await;
            view.active = Some(ActiveConversation {
                key: group.id.clone(),
                kind: ChatKind::Group,
                peer: None,
            });
            view.messages.clear();
        }
        self.listeners.attach_messages(group_id, ChatKind::Group);
        Ok(())
    }

    /// Delete the group (creator) or leave it (member).
    ///
    /// The creator's branch batch-deletes all messages plus the group record
    /// as one unit, then removes the membership entry from every member's
    /// record with isolated best-effort writes. A leaving member shrinks the
    /// member list; the group and its history persist for everyone else.
    pub async fn delete_or_leave_group(&self, group_id: &str) -> Result<()> {
        let doc = self
            .ctx
            .store
            .get("groups", group_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("groups/{}", group_id)))?;
        let group = GroupRecord::from_doc(&doc)?;

        if group.created_by == self.ctx.uid {
            let messages_collection = format!("groups/{}/messages", group_id);
            let messages = self
                .ctx
                .store
                .query(&Query::collection(messages_collection.clone()))
                .await?;

            let mut refs: Vec<DocRef> = messages
                .iter()
                .map(|doc| DocRef::new(messages_collection.clone(), doc.id.clone()))
                .collect();
            refs.push(DocRef::new("groups", group_id));
            self.ctx.store.delete_batch(&refs).await?;
            info!(group = %group_id, messages = messages.len(), "group deleted");

            for member in &group.members {
                if let Err(e) = self.remove_membership_entry(member, group_id).await {
                    warn!(group = %group_id, member = %member, error = %e,
                        "failed to remove membership entry");
                }
            }
        } else {
            let members: Vec<String> = group
                .members
                .iter()
                .filter(|m| **m != self.ctx.uid)
                .cloned()
                .collect();
            self.ctx
                .store
                .update("groups", group_id, json!({ "members": members }))
                .await?;
            info!(group = %group_id, "left group");

            if let Err(e) = self.remove_membership_entry(&self.ctx.uid, group_id).await {
                warn!(group = %group_id, error = %e, "failed to remove own membership entry");
                self.ctx
                    .notice("You left the group, but it may still show in your list", true);
            }
        }

        let was_active = self.state.read().await.is_active(group_id);
        if was_active {
            self.listeners.detach_messages();
            {
                let mut view = self.state.write().await;
                view.active = None;
                view.messages.clear();
            }
            self.ctx.emit(ChatEvent::ConversationClosed {
                conversation: group_id.to_string(),
            });
        }
        Ok(())
    }

    async fn remove_membership_entry(&self, member_uid: &str, group_id: &str) -> Result<()> {
        let Some(doc) = self.ctx.store.get("users", member_uid).await? else {
            return Ok(());
        };
        let record = UserRecord::from_doc(&doc)?;
        if !record.groups.contains_key(group_id) {
            return Ok(());
        }
        let mut groups = record.groups;
        groups.remove(group_id);
        self.ctx
            .store
            .update("users", member_uid, json!({ "groups": groups }))
            .await
    }
}
