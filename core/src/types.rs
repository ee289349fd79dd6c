/// Shared types for the chat engine: store document schemas, the unified
/// chat-list row, and the event stream surfaced to the UI layer.
use crate::error::Result;
use crate::store::Document;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Timestamp format used everywhere: ISO-8601 with millisecond precision in
/// UTC. Fixed precision keeps lexicographic order aligned with chronological
/// order, which the message and summary queries rely on.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Canonical id of a direct conversation: the sorted participant pair joined
/// with an underscore. Both sides compute the same id independently.
pub fn conversation_id(a: &str, b: &str) -> String {
    let mut pair = [a, b];
    pair.sort();
    pair.join("_")
}

/// Account tier. Guests carry a bounded total conversation quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Standard,
    Guest,
}

impl Default for Tier {
    fn default() -> Self {
        Tier::Standard
    }
}

/// The signed-in identity handed to the engine by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub guest: bool,
}

/// One entry in a user's connection set, keyed by the peer's identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEntry {
    #[serde(rename = "shortId")]
    pub short_id: String,
    pub timestamp: String,
}

/// One entry in a user's group membership set, keyed by group id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEntry {
    #[serde(rename = "joinedAt")]
    pub joined_at: String,
    #[serde(rename = "addedBy", default, skip_serializing_if = "Option::is_none")]
    pub added_by: Option<String>,
}

/// A `users/{uid}` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(skip)]
    pub uid: String,
    #[serde(rename = "shortId", default)]
    pub short_id: Option<String>,
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(rename = "photoURL", default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub online: bool,
    #[serde(rename = "lastSeen", default)]
    pub last_seen: Option<String>,
    #[serde(default)]
    pub tier: Tier,
    #[serde(rename = "maxConnections", default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub connections: HashMap<String, ConnectionEntry>,
    #[serde(default)]
    pub groups: HashMap<String, MembershipEntry>,
}

impl UserRecord {
    pub fn from_doc(doc: &Document) -> Result<Self> {
        let mut record: UserRecord = serde_json::from_value(doc.fields.clone())?;
        record.uid = doc.id.clone();
        Ok(record)
    }

    pub fn display_name_or_unknown(&self) -> &str {
        self.display_name.as_deref().unwrap_or("Unknown User")
    }

    /// Direct connections plus group memberships, the resource the guest
    /// quota counts.
    pub fn conversation_count(&self) -> usize {
        self.connections.len() + self.groups.len()
    }
}

/// A `chats/{conversationId}` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    #[serde(skip)]
    pub id: String,
    pub participants: Vec<String>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
    #[serde(rename = "lastMessage", default)]
    pub last_message: Option<String>,
    #[serde(rename = "lastMessageTime", default)]
    pub last_message_time: Option<String>,
}

impl ChatRecord {
    pub fn from_doc(doc: &Document) -> Result<Self> {
        let mut record: ChatRecord = serde_json::from_value(doc.fields.clone())?;
        record.id = doc.id.clone();
        Ok(record)
    }

    /// The participant that is not `uid`, if any.
    pub fn other_participant(&self, uid: &str) -> Option<&str> {
        self.participants
            .iter()
            .map(String::as_str)
            .find(|p| *p != uid)
    }
}

/// A `groups/{groupId}` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    #[serde(skip)]
    pub id: String,
    pub name: String,
    #[serde(rename = "createdBy")]
    pub created_by: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(rename = "lastMessage", default)]
    pub last_message: Option<String>,
    #[serde(rename = "lastMessageTime", default)]
    pub last_message_time: Option<String>,
}

impl GroupRecord {
    pub fn from_doc(doc: &Document) -> Result<Self> {
        let mut record: GroupRecord = serde_json::from_value(doc.fields.clone())?;
        record.id = doc.id.clone();
        Ok(record)
    }
}

/// A message document, direct or group. Direct messages carry `receiver`;
/// group messages carry the denormalized `senderName`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(skip)]
    pub id: String,
    pub text: String,
    pub sender: String,
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(rename = "senderName", default)]
    pub sender_name: Option<String>,
    pub timestamp: String,
}

impl MessageRecord {
    pub fn from_doc(doc: &Document) -> Result<Self> {
        let mut record: MessageRecord = serde_json::from_value(doc.fields.clone())?;
        record.id = doc.id.clone();
        Ok(record)
    }
}

/// Direct or group row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Direct,
    Group,
}

/// Profile of the peer in the currently open direct conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerProfile {
    pub uid: String,
    pub short_id: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub online: bool,
}

impl PeerProfile {
    pub fn from_record(record: &UserRecord) -> Self {
        Self {
            uid: record.uid.clone(),
            short_id: record.short_id.clone().unwrap_or_default(),
            display_name: record.display_name_or_unknown().to_string(),
            photo_url: record.photo_url.clone(),
            online: record.online,
        }
    }
}

/// The conversation the view currently displays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveConversation {
    /// Conversation id (direct) or group id
    pub key: String,
    pub kind: ChatKind,
    /// Present for direct conversations only
    pub peer: Option<PeerProfile>,
}

/// One renderable row of the unified chat list (direct conversation,
/// connection without messages yet, or group). Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatListEntry {
    /// Conversation id (direct) or group id
    pub key: String,
    pub kind: ChatKind,
    pub name: String,
    pub avatar: Option<String>,
    /// Empty when the connection has never been messaged
    pub last_message: String,
    /// Empty timestamps sort last
    pub timestamp: String,
    pub peer_uid: Option<String>,
    pub peer_short_id: Option<String>,
    pub online: bool,
}

/// Real-time events streamed to the embedding UI layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// The unified chat list was recomputed
    ChatListUpdated { count: usize },
    /// The open conversation's message list changed
    MessagesUpdated { conversation: String, count: usize },
    /// The open conversation was closed (deleted, left, or disconnected)
    ConversationClosed { conversation: String },
    /// A transient, user-visible message (toast/banner material)
    Notice { text: String, warning: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conversation_id_is_order_independent() {
        assert_eq!(conversation_id("uid-b", "uid-a"), "uid-a_uid-b");
        assert_eq!(
            conversation_id("uid-a", "uid-b"),
            conversation_id("uid-b", "uid-a")
        );
    }

    #[test]
    fn test_user_record_defaults() {
        let doc = Document {
            id: "u1".to_string(),
            fields: json!({ "shortId": "ABC123" }),
        };
        let record = UserRecord::from_doc(&doc).unwrap();
        assert_eq!(record.uid, "u1");
        assert_eq!(record.short_id.as_deref(), Some("ABC123"));
        assert_eq!(record.tier, Tier::Standard);
        assert_eq!(record.display_name_or_unknown(), "Unknown User");
        assert_eq!(record.conversation_count(), 0);
    }

    #[test]
    fn test_user_record_counts_connections_and_groups() {
        let doc = Document {
            id: "u1".to_string(),
            fields: json!({
                "shortId": "ABC123",
                "tier": "guest",
                "maxConnections": 5,
                "connections": {
                    "u2": { "shortId": "DEF456", "timestamp": "2024-01-01T00:00:00.000Z" }
                },
                "groups": {
                    "g1": { "joinedAt": "2024-01-02T00:00:00.000Z" }
                }
            }),
        };
        let record = UserRecord::from_doc(&doc).unwrap();
        assert_eq!(record.tier, Tier::Guest);
        assert_eq!(record.conversation_count(), 2);
    }

    #[test]
    fn test_chat_record_rejects_missing_participants() {
        let doc = Document {
            id: "c1".to_string(),
            fields: json!({ "lastMessage": "hi" }),
        };
        assert!(ChatRecord::from_doc(&doc).is_err());
    }

    #[test]
    fn test_chat_record_other_participant() {
        let doc = Document {
            id: "a_b".to_string(),
            fields: json!({ "participants": ["a", "b"] }),
        };
        let record = ChatRecord::from_doc(&doc).unwrap();
        assert_eq!(record.other_participant("a"), Some("b"));
        assert_eq!(record.other_participant("c"), Some("a"));
    }
}
