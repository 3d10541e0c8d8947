// Session record types
// The session is a plain data record; all transitions are applied by
// SessionManager through the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session is active and may be refreshed
    Active,
    /// Session passed its absolute expiry
    Expired,
    /// Session was explicitly revoked (logout, eviction, replay defense)
    Revoked,
}

/// Revocation reasons recorded on transition into `Revoked`
pub mod reasons {
    /// Oldest session evicted to enforce the per-user session cap
    pub const SESSION_LIMIT_EXCEEDED: &str = "session_limit_exceeded";
    /// A refresh token was presented after it had already been rotated
    pub const CONCURRENT_REFRESH_DETECTED: &str = "concurrent_refresh_detected";
    /// Explicit logout with the session's own refresh token
    pub const USER_LOGOUT: &str = "user_logout";
    /// "Log out everywhere" / incident response
    pub const BULK_TERMINATION: &str = "bulk_termination";
}

/// Device metadata supplied at login time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: Option<String>,
    /// Human-readable name, e.g. "iPhone 12" or "Chrome on Windows"
    pub device_name: Option<String>,
    /// "mobile", "desktop", "tablet", ...
    pub device_type: Option<String>,
    pub user_agent: Option<String>,
}

/// A long-lived login session backed by a rotating refresh credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Internal identity, immutable
    pub id: Uuid,
    /// Owning user; many sessions per user
    pub user_id: Uuid,
    /// Opaque URL-safe handle exposed to clients (not secret, not used for auth)
    pub public_session_id: String,
    /// Digest of the current refresh credential, unique system-wide.
    /// The raw credential is never persisted.
    pub refresh_digest: String,
    /// Digest retired by the most recent rotation. Matching it on a
    /// refresh attempt is proof of credential reuse.
    pub previous_digest: Option<String>,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Absolute time after which the session is unusable even if still Active
    pub expires_at: DateTime<Utc>,
    /// Updated on every successful refresh or activity ping; recency
    /// signal for capacity eviction
    pub last_activity_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    /// Number of successful refreshes performed so far
    pub refresh_count: u32,
    /// Cap on refreshes; reaching it makes the session unusable without
    /// a status change
    pub max_refresh_count: u32,
}

impl Session {
    /// Whether the session may still be refreshed.
    ///
    /// This is the derived predicate the whole state machine hangs off:
    /// active status, unexpired, and under the refresh-count cap.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active
            && self.expires_at > now
            && self.refresh_count < self.max_refresh_count
    }

    /// Convert to the client-facing view (no digests)
    pub fn to_info(&self) -> SessionInfo {
        SessionInfo {
            public_session_id: self.public_session_id.clone(),
            user_id: self.user_id,
            status: self.status.clone(),
            device_id: self.device_id.clone(),
            device_name: self.device_name.clone(),
            device_type: self.device_type.clone(),
            user_agent: self.user_agent.clone(),
            ip_address: self.ip_address.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_activity_at: self.last_activity_at,
            revoked_at: self.revoked_at,
            revoked_reason: self.revoked_reason.clone(),
        }
    }
}

/// Session view safe to return to clients (no credential digests)
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub public_session_id: String,
    pub user_id: Uuid,
    pub status: SessionStatus,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_session(now: DateTime<Utc>) -> Session {
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            public_session_id: "handle".to_string(),
            refresh_digest: "digest".to_string(),
            previous_digest: None,
            device_id: None,
            device_name: Some("Unknown Device".to_string()),
            device_type: Some("unknown".to_string()),
            user_agent: None,
            ip_address: Some("192.168.1.1".to_string()),
            created_at: now,
            expires_at: now + Duration::days(30),
            last_activity_at: now,
            status: SessionStatus::Active,
            revoked_at: None,
            revoked_reason: None,
            refresh_count: 0,
            max_refresh_count: 1000,
        }
    }

    #[test]
    fn test_fresh_session_is_usable() {
        let now = Utc::now();
        assert!(sample_session(now).is_usable(now));
    }

    #[test]
    fn test_expired_session_is_not_usable() {
        let now = Utc::now();
        let session = sample_session(now);
        assert!(!session.is_usable(now + Duration::days(31)));
    }

    #[test]
    fn test_terminal_status_is_not_usable() {
        let now = Utc::now();
        let mut session = sample_session(now);
        session.status = SessionStatus::Revoked;
        assert!(!session.is_usable(now));

        session.status = SessionStatus::Expired;
        assert!(!session.is_usable(now));
    }

    #[test]
    fn test_refresh_count_exhaustion_is_not_usable() {
        let now = Utc::now();
        let mut session = sample_session(now);
        session.max_refresh_count = 1;
        session.refresh_count = 1;
        // Still Active and unexpired, but the cap makes it unusable
        assert_eq!(session.status, SessionStatus::Active);
        assert!(!session.is_usable(now));
    }

    #[test]
    fn test_info_carries_no_digests() {
        let now = Utc::now();
        let session = sample_session(now);
        let serialized = serde_yaml::to_string(&session.to_info()).unwrap();
        assert!(!serialized.contains("digest"));
    }
}
