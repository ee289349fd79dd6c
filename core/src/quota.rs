/// Guest-tier conversation quota.
///
/// Advisory check-then-act: the count is read in one round trip and the
/// write happens in another, so two concurrent sessions of the same guest
/// can both pass and jointly exceed the limit. That window is inherent to
/// the store contract and accepted here.
use crate::config::Config;
use crate::types::{Tier, UserRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    Denied { limit: u32 },
}

/// Gate a new conversation (direct or group) for `user`.
pub fn check(user: &UserRecord, config: &Config) -> QuotaDecision {
    if user.tier != Tier::Guest {
        return QuotaDecision::Allowed;
    }

    let limit = user.max_connections.unwrap_or(config.default_guest_quota);
    if user.conversation_count() >= limit as usize {
        QuotaDecision::Denied { limit }
    } else {
        QuotaDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectionEntry, MembershipEntry};

    fn user(tier: Tier, connections: usize, groups: usize, limit: Option<u32>) -> UserRecord {
        let mut record = UserRecord {
            uid: "u1".to_string(),
            short_id: Some("ABC123".to_string()),
            display_name: None,
            photo_url: None,
            online: true,
            last_seen: None,
            tier,
            max_connections: limit,
            connections: Default::default(),
            groups: Default::default(),
        };
        for i in 0..connections {
            record.connections.insert(
                format!("peer-{}", i),
                ConnectionEntry {
                    short_id: format!("PEER{:02}", i),
                    timestamp: String::new(),
                },
            );
        }
        for i in 0..groups {
            record.groups.insert(
                format!("group-{}", i),
                MembershipEntry {
                    joined_at: String::new(),
                    added_by: None,
                },
            );
        }
        record
    }

    #[test]
    fn test_standard_tier_is_never_limited() {
        let u = user(Tier::Standard, 100, 100, None);
        assert_eq!(check(&u, &Config::default()), QuotaDecision::Allowed);
    }

    #[test]
    fn test_guest_below_limit_is_allowed() {
        let u = user(Tier::Guest, 2, 2, Some(5));
        assert_eq!(check(&u, &Config::default()), QuotaDecision::Allowed);
    }

    #[test]
    fn test_guest_counts_groups_and_connections_together() {
        let u = user(Tier::Guest, 3, 2, Some(5));
        assert_eq!(
            check(&u, &Config::default()),
            QuotaDecision::Denied { limit: 5 }
        );
    }

    #[test]
    fn test_guest_without_explicit_limit_uses_default() {
        let u = user(Tier::Guest, 5, 0, None);
        assert_eq!(
            check(&u, &Config::default()),
            QuotaDecision::Denied { limit: 5 }
        );
    }
}
