/// Listener multiplexer: owns the session's live subscriptions.
///
/// Three slots: active-conversation messages, chat summaries, group
/// memberships. Each slot holds at most one subscription; attaching a
/// replacement cancels the prior occupant synchronously before the new
/// subscription is requested, so two listeners can never write into the same
/// downstream state. A per-slot generation counter fences the consumer
/// tasks: a consumer whose slot has moved on stops applying snapshots even
/// if some were already queued.
use crate::chat_list;
use crate::session::SessionContext;
use crate::state::SharedState;
use crate::store::{Direction, Query, Subscription};
use crate::types::{
    ChatEvent, ChatKind, ChatRecord, ConnectionEntry, GroupRecord, MessageRecord, UserRecord,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Default)]
struct Slots {
    messages: Option<Subscription>,
    summaries: Option<Subscription>,
    memberships: Option<Subscription>,
}

pub struct ListenerSet {
    ctx: Arc<SessionContext>,
    state: SharedState,
    slots: Mutex<Slots>,
    messages_generation: Arc<AtomicU64>,
    summaries_generation: Arc<AtomicU64>,
    memberships_generation: Arc<AtomicU64>,
}

impl ListenerSet {
    pub fn new(ctx: Arc<SessionContext>, state: SharedState) -> Self {
        Self {
            ctx,
            state,
            slots: Mutex::new(Slots::default()),
            messages_generation: Arc::new(AtomicU64::new(0)),
            summaries_generation: Arc::new(AtomicU64::new(0)),
            memberships_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attach the message subscription for `conversation`, replacing any
    /// prior occupant of the messages slot.
    pub fn attach_messages(&self, conversation: &str, kind: ChatKind) {
        let generation = self.messages_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let collection = match kind {
            ChatKind::Direct => format!("chats/{}/messages", conversation),
            ChatKind::Group => format!("groups/{}/messages", conversation),
        };
        let query = Query::collection(collection).order_by("timestamp", Direction::Ascending);

        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(prev) = slots.messages.take() {
                prev.cancel();
            }
            slots.messages = Some(self.ctx.store.subscribe(query, tx));
        }
        debug!(conversation, generation, "message listener attached");

        let ctx = self.ctx.clone();
        let state = self.state.clone();
        let fence = self.messages_generation.clone();
        let conversation = conversation.to_string();
        tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                if fence.load(Ordering::SeqCst) != generation {
                    break;
                }
                match snapshot {
                    Ok(docs) => {
                        let messages: Vec<MessageRecord> = docs
                            .iter()
                            .filter_map(|doc| match MessageRecord::from_doc(doc) {
                                Ok(message) => Some(message),
                                Err(e) => {
                                    warn!(id = %doc.id, error = %e, "skipping malformed message");
                                    None
                                }
                            })
                            .collect();
                        let count = messages.len();
                        {
                            let mut view = state.write().await;
                            if fence.load(Ordering::SeqCst) != generation {
                                break;
                            }
                            if !view.is_active(&conversation) {
                                continue;
                            }
                            view.messages = messages;
                        }
                        ctx.emit(ChatEvent::MessagesUpdated {
                            conversation: conversation.clone(),
                            count,
                        });
                    }
                    Err(e) => {
                        // Keep the last-known messages on screen
                        ctx.notice(format!("Failed to load messages: {}", e), true);
                    }
                }
            }
        });
    }

    /// Release the messages slot without attaching a replacement.
    pub fn detach_messages(&self) {
        self.messages_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(prev) = self.slots.lock().unwrap().messages.take() {
            prev.cancel();
        }
    }

    /// Attach the chat-summaries subscription (conversations the user
    /// participates in, newest activity first). The standing connection set
    /// is re-read from the user's own record alongside every snapshot.
    pub fn attach_chat_summaries(&self) {
        let generation = self.summaries_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let query = Query::collection("chats")
            .where_array_contains("participants", self.ctx.uid.clone())
            .order_by("lastMessageTime", Direction::Descending);

        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(prev) = slots.summaries.take() {
                prev.cancel();
            }
            slots.summaries = Some(self.ctx.store.subscribe(query, tx));
        }

        let ctx = self.ctx.clone();
        let state = self.state.clone();
        let fence = self.summaries_generation.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                if fence.load(Ordering::SeqCst) != generation {
                    break;
                }
                let summaries = match snapshot {
                    Ok(docs) => docs
                        .iter()
                        .filter_map(|doc| match ChatRecord::from_doc(doc) {
                            Ok(record) => Some(record),
                            Err(e) => {
                                warn!(id = %doc.id, error = %e, "skipping malformed chat summary");
                                None
                            }
                        })
                        .collect(),
                    Err(e) if e.is_permission_denied() => {
                        // A fresh account has access to nothing yet
                        debug!("chat summaries unavailable, treating as empty");
                        Vec::new()
                    }
                    Err(e) => {
                        ctx.notice(format!("Failed to load recent chats: {}", e), true);
                        continue;
                    }
                };

                let connections = fetch_connections(&ctx).await;
                {
                    let mut view = state.write().await;
                    if fence.load(Ordering::SeqCst) != generation {
                        break;
                    }
                    view.summaries = summaries;
                    if let Some(connections) = connections {
                        view.connections = connections;
                    }
                }
                refresh_chat_list(&ctx, &state, &fence, generation).await;
            }
        });
    }

    /// Attach the group-memberships subscription (groups whose member list
    /// contains the user).
    pub fn attach_group_memberships(&self) {
        let generation = self.memberships_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let query =
            Query::collection("groups").where_array_contains("members", self.ctx.uid.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let mut slots = self.slots.lock().unwrap();
            if let Some(prev) = slots.memberships.take() {
                prev.cancel();
            }
            slots.memberships = Some(self.ctx.store.subscribe(query, tx));
        }

        let ctx = self.ctx.clone();
        let state = self.state.clone();
        let fence = self.memberships_generation.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                if fence.load(Ordering::SeqCst) != generation {
                    break;
                }
                let memberships = match snapshot {
                    Ok(docs) => docs
                        .iter()
                        .filter_map(|doc| match GroupRecord::from_doc(doc) {
                            Ok(record) => Some(record),
                            Err(e) => {
                                warn!(id = %doc.id, error = %e, "skipping malformed group");
                                None
                            }
                        })
                        .collect(),
                    Err(e) if e.is_permission_denied() => {
                        debug!("group memberships unavailable, treating as empty");
                        Vec::new()
                    }
                    Err(e) => {
                        ctx.notice(format!("Failed to load groups: {}", e), true);
                        continue;
                    }
                };

                {
                    let mut view = state.write().await;
                    if fence.load(Ordering::SeqCst) != generation {
                        break;
                    }
                    view.memberships = memberships;
                }
                refresh_chat_list(&ctx, &state, &fence, generation).await;
            }
        });
    }

    /// Release every slot. Used on sign-out and teardown.
    pub fn release_all(&self) {
        self.messages_generation.fetch_add(1, Ordering::SeqCst);
        self.summaries_generation.fetch_add(1, Ordering::SeqCst);
        self.memberships_generation.fetch_add(1, Ordering::SeqCst);

        let mut slots = self.slots.lock().unwrap();
        if let Some(sub) = slots.messages.take() {
            sub.cancel();
        }
        if let Some(sub) = slots.summaries.take() {
            sub.cancel();
        }
        if let Some(sub) = slots.memberships.take() {
            sub.cancel();
        }
    }
}

/// Re-read the standing connection set from the user's own record. Returns
/// None on failure so the caller keeps the last-known set.
async fn fetch_connections(ctx: &Arc<SessionContext>) -> Option<HashMap<String, ConnectionEntry>> {
    match ctx.store.get("users", &ctx.uid).await {
        Ok(Some(doc)) => match UserRecord::from_doc(&doc) {
            Ok(record) => Some(record.connections),
            Err(e) => {
                warn!(error = %e, "own record is malformed, keeping last-known connections");
                None
            }
        },
        Ok(None) => Some(Default::default()),
        Err(e) => {
            warn!(error = %e, "failed to refresh connections, keeping last-known");
            None
        }
    }
}

/// Recompute the unified chat list from the latest snapshot of each input
/// and publish it, unless the calling slot has been replaced meanwhile.
async fn refresh_chat_list(
    ctx: &Arc<SessionContext>,
    state: &SharedState,
    fence: &AtomicU64,
    generation: u64,
) {
    let (summaries, connections, memberships) = {
        let view = state.read().await;
        (
            view.summaries.clone(),
            view.connections.clone(),
            view.memberships.clone(),
        )
    };

    let entries = chat_list::build_entries(ctx, &summaries, &connections, &memberships).await;
    let count = entries.len();

    {
        let mut view = state.write().await;
        if fence.load(Ordering::SeqCst) != generation {
            return;
        }
        view.chat_list = entries;
    }
    ctx.emit(ChatEvent::ChatListUpdated { count });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::local_store::LocalStore;
    use crate::state::ViewState;
    use crate::store::DocumentStore;
    use crate::types::AuthUser;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::RwLock;
    use tokio::time::sleep;

    fn setup(store: &LocalStore) -> (Arc<SessionContext>, SharedState, ListenerSet) {
        let auth = AuthUser {
            uid: "u1".to_string(),
            display_name: Some("One".to_string()),
            photo_url: None,
            guest: false,
        };
        let ctx = Arc::new(SessionContext::new(
            Arc::new(store.clone()),
            Config::default(),
            auth,
        ));
        let state: SharedState = Arc::new(RwLock::new(ViewState::default()));
        let listeners = ListenerSet::new(ctx.clone(), state.clone());
        (ctx, state, listeners)
    }

    #[tokio::test]
    async fn test_messages_slot_is_replaced_not_leaked() {
        let store = LocalStore::new();
        let (_ctx, state, listeners) = setup(&store);

        {
            let mut view = state.write().await;
            view.active = Some(crate::types::ActiveConversation {
                key: "a_b".to_string(),
                kind: ChatKind::Direct,
                peer: None,
            });
        }
        listeners.attach_messages("a_b", ChatKind::Direct);
        assert_eq!(store.active_watchers(), 1);

        {
            let mut view = state.write().await;
            view.active = Some(crate::types::ActiveConversation {
                key: "a_c".to_string(),
                kind: ChatKind::Direct,
                peer: None,
            });
        }
        listeners.attach_messages("a_c", ChatKind::Direct);
        assert_eq!(store.active_watchers(), 1);

        // A message for the replaced conversation never reaches the view
        store
            .set_merge(
                "chats/a_b/messages",
                "m1",
                json!({ "text": "stale", "sender": "b", "timestamp": "2024-01-01T00:00:00.000Z" }),
            )
            .await
            .unwrap();
        sleep(Duration::from_millis(50)).await;
        assert!(state.read().await.messages.is_empty());
    }

    #[tokio::test]
    async fn test_release_all_clears_every_slot() {
        let store = LocalStore::new();
        let (_ctx, _state, listeners) = setup(&store);

        listeners.attach_chat_summaries();
        listeners.attach_group_memberships();
        listeners.attach_messages("a_b", ChatKind::Direct);
        assert_eq!(store.active_watchers(), 3);

        listeners.release_all();
        assert_eq!(store.active_watchers(), 0);
    }

    #[tokio::test]
    async fn test_permission_denied_memberships_degrade_to_empty() {
        let store = LocalStore::new();
        store.deny_reads("groups");
        let (_ctx, state, listeners) = setup(&store);

        listeners.attach_group_memberships();
        sleep(Duration::from_millis(50)).await;

        let view = state.read().await;
        assert!(view.memberships.is_empty());
        assert!(view.chat_list.is_empty());
    }
}
