//! Session storage with per-member session tracking.
//!
//! Each session lives under its own key; a parallel set per member tracks
//! that member's active session ids, which is what makes bulk revocation
//! (password reset, role change) possible without a keyspace scan.

use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::keys::CacheKey;
use crate::service::CacheService;
use crate::ttl::Ttl;

/// Stored session payload.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionRecord {
    pub user_id: String,
    pub created_at: OffsetDateTime,
    pub last_activity: OffsetDateTime,
    /// Arbitrary payload owned by the auth layer.
    pub data: Value,
}

/// Session ids are `{user}-{unix_ts}-{random}`: unique without a central
/// counter, and self-describing enough for log correlation.
fn new_session_id(user_id: &str) -> String {
    let timestamp = OffsetDateTime::now_utc().unix_timestamp();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{user_id}-{timestamp}-{}", &suffix[..8])
}

impl CacheService {
    /// Create a session for `user_id` and index it in the member's session
    /// set. Both keys share the same TTL. Returns the session id, or `None`
    /// when the backend could not store it.
    pub async fn set_session(&self, user_id: &str, data: Value, ttl: Ttl) -> Option<String> {
        if !self.is_available() {
            return None;
        }

        let session_id = new_session_id(user_id);
        let now = OffsetDateTime::now_utc();
        let record = SessionRecord {
            user_id: user_id.to_string(),
            created_at: now,
            last_activity: now,
            data,
        };

        if !self.set(&CacheKey::Session(session_id.clone()), &record, ttl).await {
            return None;
        }
        if !self
            .sadd(&CacheKey::UserSessionSet(user_id.to_string()), &session_id, Some(ttl))
            .await
        {
            warn!(user_id, session_id = %session_id, "session stored but not indexed");
        }

        debug!(user_id, session_id = %session_id, "session created");
        Some(session_id)
    }

    /// Read a session, refreshing `last_activity` and re-extending both the
    /// session and its index entry by the configured session TTL. Reads
    /// extend life.
    pub async fn get_session(&self, session_id: &str) -> Option<SessionRecord> {
        let key = CacheKey::Session(session_id.to_string());
        let mut record: SessionRecord = self.get(&key).await?;

        record.last_activity = OffsetDateTime::now_utc();
        let refresh = Ttl::Seconds(self.settings().session_ttl_secs);
        if !self.set(&key, &record, refresh).await {
            warn!(session_id, "session activity refresh not stored");
        }
        self.expire(&CacheKey::UserSessionSet(record.user_id.clone()), refresh)
            .await;

        Some(record)
    }

    /// Delete one session and remove it from its owner's session set.
    /// Deleting an unknown session id is a success.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        if !self.is_available() {
            return false;
        }

        let key = CacheKey::Session(session_id.to_string());
        // Look the session up first to learn its owner; without the owner
        // the index entry could not be removed.
        if let Some(record) = self.get::<SessionRecord>(&key).await {
            self.srem_session(&record.user_id, session_id).await;
        }
        let deleted = self.delete(&key).await;
        debug!(session_id, deleted, "session deleted");
        deleted
    }

    /// Revoke every session belonging to `user_id`: all session keys listed
    /// in the member's set, then the set itself. Returns how many sessions
    /// were revoked.
    pub async fn delete_all_user_sessions(&self, user_id: &str) -> u64 {
        if !self.is_available() {
            return 0;
        }

        let set_key = CacheKey::UserSessionSet(user_id.to_string());
        let session_ids = self.smembers(&set_key).await;
        let count = session_ids.len() as u64;

        let mut keys: Vec<CacheKey> = session_ids.into_iter().map(CacheKey::Session).collect();
        keys.push(set_key);
        if !self.delete_many(&keys).await {
            warn!(user_id, "bulk session revocation did not complete");
            return 0;
        }

        debug!(user_id, revoked = count, "all member sessions revoked");
        count
    }

    async fn srem_session(&self, user_id: &str, session_id: &str) {
        let Some(backend) = self.backend() else {
            return;
        };
        if let Err(err) = backend
            .srem(&CacheKey::UserSessionSet(user_id.to_string()).wire(), session_id)
            .await
        {
            warn!(user_id, session_id, error = %err, "session index entry not removed");
        }
    }
}
