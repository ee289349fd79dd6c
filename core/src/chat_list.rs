/// Chat list aggregation: merge conversation summaries, standing connections
/// without messages yet, and group memberships into one ordered list.
///
/// The list is recomputed in full on every update from any input, never
/// patched incrementally. Peer profiles are looked up from the store on each
/// recomputation; caching them is the embedding client's concern.
use crate::session::SessionContext;
use crate::types::{
    conversation_id, ChatKind, ChatListEntry, ChatRecord, ConnectionEntry, GroupRecord, UserRecord,
};
use std::collections::{HashMap, HashSet};
use tracing::warn;

async fn fetch_profile(ctx: &SessionContext, uid: &str) -> Option<UserRecord> {
    match ctx.store.get("users", uid).await {
        Ok(Some(doc)) => match UserRecord::from_doc(&doc) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(uid, error = %e, "skipping peer with malformed profile");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(uid, error = %e, "failed to fetch peer profile");
            None
        }
    }
}

/// Build the ordered chat list from the latest snapshot of each input.
/// Peers whose profile cannot be resolved are skipped rather than rendered
/// half-empty.
pub async fn build_entries(
    ctx: &SessionContext,
    summaries: &[ChatRecord],
    connections: &HashMap<String, ConnectionEntry>,
    memberships: &[GroupRecord],
) -> Vec<ChatListEntry> {
    let mut entries = Vec::new();
    let mut covered: HashSet<String> = HashSet::new();

    // Conversations that have at least one message
    for summary in summaries {
        let Some(last_message) = summary.last_message.as_deref().filter(|m| !m.is_empty()) else {
            continue;
        };
        let Some(peer_uid) = summary.other_participant(&ctx.uid) else {
            continue;
        };
        let Some(profile) = fetch_profile(ctx, peer_uid).await else {
            continue;
        };

        covered.insert(peer_uid.to_string());
        entries.push(ChatListEntry {
            key: summary.id.clone(),
            kind: ChatKind::Direct,
            name: profile.display_name_or_unknown().to_string(),
            avatar: profile.photo_url.clone(),
            last_message: last_message.to_string(),
            timestamp: summary.last_message_time.clone().unwrap_or_default(),
            peer_uid: Some(peer_uid.to_string()),
            peer_short_id: profile.short_id.clone(),
            online: profile.online,
        });
    }

    // Standing connections that have never been messaged
    for (peer_uid, connection) in connections {
        if covered.contains(peer_uid) {
            continue;
        }
        let Some(profile) = fetch_profile(ctx, peer_uid).await else {
            continue;
        };

        entries.push(ChatListEntry {
            key: conversation_id(&ctx.uid, peer_uid),
            kind: ChatKind::Direct,
            name: profile.display_name_or_unknown().to_string(),
            avatar: profile.photo_url.clone(),
            last_message: String::new(),
            timestamp: connection.timestamp.clone(),
            peer_uid: Some(peer_uid.clone()),
            peer_short_id: profile.short_id.clone(),
            online: profile.online,
        });
    }

    // Groups, using their own summary fields
    for group in memberships {
        entries.push(ChatListEntry {
            key: group.id.clone(),
            kind: ChatKind::Group,
            name: group.name.clone(),
            avatar: None,
            last_message: group.last_message.clone().unwrap_or_default(),
            timestamp: group.last_message_time.clone().unwrap_or_default(),
            peer_uid: None,
            peer_short_id: None,
            online: false,
        });
    }

    sort_entries(&mut entries);
    entries
}

/// Most recent activity first. Timestamps are ISO-8601 strings, so string
/// order is chronological order; empty timestamps compare smallest and land
/// at the bottom.
pub fn sort_entries(entries: &mut [ChatListEntry]) {
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, kind: ChatKind, timestamp: &str) -> ChatListEntry {
        ChatListEntry {
            key: key.to_string(),
            kind,
            name: key.to_string(),
            avatar: None,
            last_message: String::new(),
            timestamp: timestamp.to_string(),
            peer_uid: None,
            peer_short_id: None,
            online: false,
        }
    }

    #[test]
    fn test_sort_newest_first_empty_last() {
        let mut entries = vec![
            entry("old", ChatKind::Direct, "2024-01-01T00:00:05.000Z"),
            entry("pending", ChatKind::Direct, ""),
            entry("new", ChatKind::Group, "2024-01-01T00:00:20.000Z"),
            entry("mid", ChatKind::Direct, "2024-01-01T00:00:10.000Z"),
        ];
        sort_entries(&mut entries);
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["new", "mid", "old", "pending"]);
    }
}
