/// Identity resolution: short-id minting, recipient lookup, profile
/// bootstrap, and presence updates on the signed-in user's own record.
use crate::error::{ChatError, Result};
use crate::session::SessionContext;
use crate::store::Query;
use crate::types::{now_iso, Tier, UserRecord};
use rand::Rng;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

const SHORT_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Uppercase and strip everything outside the short-id alphabet, capped at
/// the configured length. Mirrors what a paste into the recipient field goes
/// through before lookup.
pub fn normalize_short_id(input: &str, length: usize) -> String {
    input
        .chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .take(length)
        .collect()
}

#[derive(Clone)]
pub struct IdentityResolver {
    ctx: Arc<SessionContext>,
}

impl IdentityResolver {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    /// Draw random candidates until one is free in the store. The keyspace
    /// (36^6) makes collisions rare; the attempt bound only exists so the
    /// loop cannot spin forever against an adversarial store.
    pub async fn mint_short_id(&self) -> Result<String> {
        let length = self.ctx.config.short_id_length;
        let max_attempts = self.ctx.config.short_id_max_attempts;

        for attempt in 0..max_attempts {
            let candidate: String = {
                let mut rng = rand::thread_rng();
                (0..length)
                    .map(|_| SHORT_ID_ALPHABET[rng.gen_range(0..SHORT_ID_ALPHABET.len())] as char)
                    .collect()
            };

            let query = Query::collection("users").where_eq("shortId", candidate.clone());
            let hits = self.ctx.store.query(&query).await?;
            if hits.is_empty() {
                return Ok(candidate);
            }
            debug!(attempt, candidate, "short id collision, redrawing");
        }

        Err(ChatError::IdentityExhausted(max_attempts))
    }

    /// Resolve a short id to the user it names. Uniqueness is assumed from
    /// mint time and not re-verified: multiple matches resolve to the first.
    pub async fn verify_recipient(&self, short_id: &str) -> Result<UserRecord> {
        let normalized = normalize_short_id(short_id, self.ctx.config.short_id_length);
        let query = Query::collection("users").where_eq("shortId", normalized.clone());
        let hits = self.ctx.store.query(&query).await?;

        let doc = hits
            .first()
            .ok_or_else(|| ChatError::RecipientNotFound(normalized.clone()))?;
        let record = UserRecord::from_doc(doc)?;
        if record.short_id.is_none() {
            // A record matched the query but carries no usable short id
            return Err(ChatError::RecipientNotFound(normalized));
        }
        Ok(record)
    }

    /// Read the signed-in user's own record.
    pub async fn own_record(&self) -> Result<UserRecord> {
        let doc = self
            .ctx
            .store
            .get("users", &self.ctx.uid)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("users/{}", self.ctx.uid)))?;
        UserRecord::from_doc(&doc)
    }

    /// Bootstrap the signed-in user's record: create it on first sign-in,
    /// mint a short id if the record lacks one, and stamp presence.
    pub async fn ensure_profile(&self) -> Result<UserRecord> {
        let auth = &self.ctx.auth;
        let display_name = auth.display_name.clone().unwrap_or_else(|| "User".to_string());

        match self.ctx.store.get("users", &self.ctx.uid).await? {
            Some(doc) => {
                let mut record = UserRecord::from_doc(&doc)?;
                if record.short_id.is_none() {
                    let short_id = self.mint_short_id().await?;
                    info!(short_id, "minted short id for existing profile");
                    self.ctx
                        .store
                        .set_merge(
                            "users",
                            &self.ctx.uid,
                            json!({
                                "shortId": short_id,
                                "displayName": display_name,
                                "photoURL": auth.photo_url,
                                "online": true,
                                "lastSeen": now_iso(),
                            }),
                        )
                        .await?;
                    record.short_id = Some(short_id);
                }
                Ok(record)
            }
            None => {
                let short_id = self.mint_short_id().await?;
                let tier = if auth.guest { Tier::Guest } else { Tier::Standard };
                let now = now_iso();

                let mut fields = json!({
                    "shortId": short_id,
                    "displayName": display_name,
                    "photoURL": auth.photo_url,
                    "online": true,
                    "lastSeen": now,
                    "tier": tier,
                    "connections": {},
                    "groups": {},
                });
                if auth.guest {
                    fields["maxConnections"] = json!(self.ctx.config.default_guest_quota);
                }
                self.ctx
                    .store
                    .set_merge("users", &self.ctx.uid, fields)
                    .await?;
                info!(uid = %self.ctx.uid, short_id, "created user profile");

                Ok(UserRecord {
                    uid: self.ctx.uid.clone(),
                    short_id: Some(short_id),
                    display_name: Some(display_name),
                    photo_url: auth.photo_url.clone(),
                    online: true,
                    last_seen: Some(now),
                    tier,
                    max_connections: auth
                        .guest
                        .then_some(self.ctx.config.default_guest_quota),
                    connections: Default::default(),
                    groups: Default::default(),
                })
            }
        }
    }

    /// Merge {online, lastSeen} into the own record. Callers on teardown
    /// paths treat failures as best-effort.
    pub async fn update_presence(&self, online: bool) -> Result<()> {
        self.ctx
            .store
            .set_merge(
                "users",
                &self.ctx.uid,
                json!({ "online": online, "lastSeen": now_iso() }),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_short_id() {
        assert_eq!(normalize_short_id("ab 12-cd", 6), "AB12CD");
        assert_eq!(normalize_short_id("abc123xyz", 6), "ABC123");
        assert_eq!(normalize_short_id("!!", 6), "");
    }
}
