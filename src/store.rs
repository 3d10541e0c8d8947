// Session persistence
// The store is the only shared mutable resource and the single source
// of truth: no in-process caching of session state is permitted, since
// rotation correctness depends on reading the current digest right
// before conditionally replacing it.

use crate::error::StoreError;
use crate::types::{Session, SessionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Field updates applied by a successful rotation.
///
/// The store applies these together with the digest swap and the
/// refresh-count increment as one atomic record update.
#[derive(Debug, Clone)]
pub struct RotationUpdate {
    pub new_digest: String,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ip_address: Option<String>,
}

/// Result of a conditional digest rotation
#[derive(Debug)]
pub enum RotationOutcome {
    /// The expected digest was still current; the record now carries the
    /// new digest and updated counters
    Rotated(Session),
    /// The expected digest was no longer current; nothing was written
    Conflict,
}

/// Metadata-only update applied by an activity ping
#[derive(Debug, Clone)]
pub struct ActivityUpdate {
    pub last_activity_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Trait for session storage backends.
///
/// Implementations must provide read-committed isolation and honor the
/// conditional-update semantics of `rotate_digest`; every mutation is a
/// single atomic record update, never a partial write.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session. Fails with `DigestExists` if the refresh
    /// digest is already present on any session.
    async fn insert(&self, session: Session) -> Result<(), StoreError>;

    /// Get a session by internal id
    async fn get(&self, id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Get a session by its public handle
    async fn find_by_public_id(&self, public_session_id: &str)
    -> Result<Option<Session>, StoreError>;

    /// Get the session whose current refresh digest matches
    async fn find_by_digest(&self, digest: &str) -> Result<Option<Session>, StoreError>;

    /// Get the session whose most recently retired digest matches.
    /// A hit here means a rotated-out credential was presented again.
    async fn find_by_retired_digest(&self, digest: &str) -> Result<Option<Session>, StoreError>;

    /// All sessions for a user, any status, unordered
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, StoreError>;

    /// Conditionally rotate the refresh digest: apply `update` and
    /// increment the refresh count only if the session's current digest
    /// still equals `expected_digest`. Returns `Conflict` (writing
    /// nothing) when a concurrent rotation got there first.
    async fn rotate_digest(
        &self,
        id: Uuid,
        expected_digest: &str,
        update: RotationUpdate,
    ) -> Result<RotationOutcome, StoreError>;

    /// Transition an Active session to Revoked with the given reason.
    /// Returns whether a transition was applied; terminal sessions are
    /// left untouched (status transitions are monotone).
    async fn revoke(
        &self,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Revoke every Active session of a user, optionally sparing one.
    /// Returns the number revoked.
    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        except: Option<Uuid>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Apply a metadata-only activity update
    async fn touch_activity(&self, id: Uuid, update: ActivityUpdate) -> Result<(), StoreError>;

    /// Transition every Active session with `expires_at <= now` to
    /// Expired, committing per record so one bad row cannot block the
    /// sweep. Returns the number transitioned.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Hard-delete every session of a user (user-deletion cascade).
    /// Returns the number deleted.
    async fn delete_for_user(&self, user_id: Uuid) -> Result<usize, StoreError>;
}

struct StoreInner {
    sessions: HashMap<Uuid, Session>,
    by_digest: HashMap<String, Uuid>,
    by_public_id: HashMap<String, Uuid>,
    by_retired_digest: HashMap<String, Uuid>,
}

/// In-memory session store.
///
/// A single lock guards the records and the secondary indexes, so every
/// mutation is atomic with its index maintenance; the conditional check
/// in `rotate_digest` runs under the same write lock as the swap.
pub struct MemorySessionStore {
    inner: RwLock<StoreInner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                sessions: HashMap::new(),
                by_digest: HashMap::new(),
                by_public_id: HashMap::new(),
                by_retired_digest: HashMap::new(),
            }),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: Session) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        if inner.by_digest.contains_key(&session.refresh_digest) {
            return Err(StoreError::DigestExists);
        }
        if inner.by_public_id.contains_key(&session.public_session_id) {
            return Err(StoreError::Backend(format!(
                "public session id collision: {}",
                session.public_session_id
            )));
        }

        debug!(
            "Storing session {} for user {}",
            session.public_session_id, session.user_id
        );

        inner
            .by_digest
            .insert(session.refresh_digest.clone(), session.id);
        inner
            .by_public_id
            .insert(session.public_session_id.clone(), session.id);
        inner.sessions.insert(session.id, session);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(&id).cloned())
    }

    async fn find_by_public_id(
        &self,
        public_session_id: &str,
    ) -> Result<Option<Session>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_public_id
            .get(public_session_id)
            .and_then(|id| inner.sessions.get(id))
            .cloned())
    }

    async fn find_by_digest(&self, digest: &str) -> Result<Option<Session>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_digest
            .get(digest)
            .and_then(|id| inner.sessions.get(id))
            .cloned())
    }

    async fn find_by_retired_digest(&self, digest: &str) -> Result<Option<Session>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_retired_digest
            .get(digest)
            .and_then(|id| inner.sessions.get(id))
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Session>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn rotate_digest(
        &self,
        id: Uuid,
        expected_digest: &str,
        update: RotationUpdate,
    ) -> Result<RotationOutcome, StoreError> {
        let mut inner = self.inner.write().await;

        if inner.by_digest.contains_key(&update.new_digest) {
            return Err(StoreError::DigestExists);
        }

        let session = inner.sessions.get(&id).ok_or(StoreError::NotFound)?;
        if session.refresh_digest != expected_digest {
            return Ok(RotationOutcome::Conflict);
        }

        // The previous retired digest stops matching lookups from here on.
        let old_retired = session.previous_digest.clone();
        if let Some(old) = old_retired {
            inner.by_retired_digest.remove(&old);
        }
        inner.by_digest.remove(expected_digest);
        inner
            .by_retired_digest
            .insert(expected_digest.to_string(), id);
        inner.by_digest.insert(update.new_digest.clone(), id);

        let session = inner.sessions.get_mut(&id).ok_or(StoreError::NotFound)?;
        session.previous_digest = Some(session.refresh_digest.clone());
        session.refresh_digest = update.new_digest;
        session.expires_at = update.expires_at;
        session.last_activity_at = update.last_activity_at;
        session.refresh_count += 1;
        if let Some(ip) = update.ip_address {
            session.ip_address = Some(ip);
        }

        Ok(RotationOutcome::Rotated(session.clone()))
    }

    async fn revoke(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(&id).ok_or(StoreError::NotFound)?;

        if session.status != SessionStatus::Active {
            return Ok(false);
        }

        session.status = SessionStatus::Revoked;
        session.revoked_at = Some(now);
        session.revoked_reason = Some(reason.to_string());
        info!(
            "Revoked session {}: {}",
            session.public_session_id, reason
        );
        Ok(true)
    }

    async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        except: Option<Uuid>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let mut count = 0;

        for session in inner.sessions.values_mut() {
            if session.user_id != user_id || session.status != SessionStatus::Active {
                continue;
            }
            if except == Some(session.id) {
                continue;
            }
            session.status = SessionStatus::Revoked;
            session.revoked_at = Some(now);
            session.revoked_reason = Some(reason.to_string());
            count += 1;
        }

        Ok(count)
    }

    async fn touch_activity(&self, id: Uuid, update: ActivityUpdate) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(&id).ok_or(StoreError::NotFound)?;

        session.last_activity_at = update.last_activity_at;
        if let Some(ip) = update.ip_address {
            session.ip_address = Some(ip);
        }
        if let Some(ua) = update.user_agent {
            session.user_agent = Some(ua);
        }
        Ok(())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let mut count = 0;

        for session in inner.sessions.values_mut() {
            if session.status == SessionStatus::Active && session.expires_at <= now {
                session.status = SessionStatus::Expired;
                count += 1;
            }
        }

        Ok(count)
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;

        let doomed: Vec<Uuid> = inner
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id)
            .collect();

        for id in &doomed {
            if let Some(session) = inner.sessions.remove(id) {
                inner.by_digest.remove(&session.refresh_digest);
                inner.by_public_id.remove(&session.public_session_id);
                if let Some(prev) = &session.previous_digest {
                    inner.by_retired_digest.remove(prev);
                }
            }
        }

        Ok(doomed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_session(user_id: Uuid, digest: &str, public_id: &str, now: DateTime<Utc>) -> Session {
        Session {
            id: Uuid::new_v4(),
            user_id,
            public_session_id: public_id.to_string(),
            refresh_digest: digest.to_string(),
            previous_digest: None,
            device_id: None,
            device_name: Some("Unknown Device".to_string()),
            device_type: Some("unknown".to_string()),
            user_agent: None,
            ip_address: None,
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

    #[tokio::test]
    async fn test_insert_and_lookups() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let user_id = Uuid::new_v4();
        let session = sample_session(user_id, "digest-1", "pub-1", now);
        let id = session.id;

        store.insert(session).await.unwrap();

        assert_eq!(store.get(id).await.unwrap().unwrap().id, id);
        assert_eq!(
            store.find_by_digest("digest-1").await.unwrap().unwrap().id,
            id
        );
        assert_eq!(
            store.find_by_public_id("pub-1").await.unwrap().unwrap().id,
            id
        );
        assert!(store.find_by_digest("digest-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_digest() {
        let store = MemorySessionStore::new();
        let now = Utc::now();

        store
            .insert(sample_session(Uuid::new_v4(), "digest-1", "pub-1", now))
            .await
            .unwrap();

        let result = store
            .insert(sample_session(Uuid::new_v4(), "digest-1", "pub-2", now))
            .await;
        assert!(matches!(result, Err(StoreError::DigestExists)));
    }

    #[tokio::test]
    async fn test_rotate_swaps_digest_and_retires_old_one() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let session = sample_session(Uuid::new_v4(), "digest-1", "pub-1", now);
        let id = session.id;
        store.insert(session).await.unwrap();

        let update = RotationUpdate {
            new_digest: "digest-2".to_string(),
            expires_at: now + Duration::days(30),
            last_activity_at: now,
            ip_address: Some("10.0.0.1".to_string()),
        };
        let outcome = store.rotate_digest(id, "digest-1", update).await.unwrap();

        let rotated = match outcome {
            RotationOutcome::Rotated(s) => s,
            RotationOutcome::Conflict => panic!("unexpected conflict"),
        };
        assert_eq!(rotated.refresh_digest, "digest-2");
        assert_eq!(rotated.previous_digest.as_deref(), Some("digest-1"));
        assert_eq!(rotated.refresh_count, 1);
        assert_eq!(rotated.ip_address.as_deref(), Some("10.0.0.1"));

        // The old digest no longer matches the usable lookup, but the
        // retired lookup still points back at the session.
        assert!(store.find_by_digest("digest-1").await.unwrap().is_none());
        assert_eq!(
            store
                .find_by_retired_digest("digest-1")
                .await
                .unwrap()
                .unwrap()
                .id,
            id
        );
    }

    #[tokio::test]
    async fn test_rotate_conflict_writes_nothing() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let session = sample_session(Uuid::new_v4(), "digest-1", "pub-1", now);
        let id = session.id;
        store.insert(session).await.unwrap();

        let winner = RotationUpdate {
            new_digest: "digest-2".to_string(),
            expires_at: now + Duration::days(30),
            last_activity_at: now,
            ip_address: None,
        };
        store.rotate_digest(id, "digest-1", winner).await.unwrap();

        // The loser still believes the digest is digest-1
        let loser = RotationUpdate {
            new_digest: "digest-3".to_string(),
            expires_at: now + Duration::days(30),
            last_activity_at: now,
            ip_address: None,
        };
        let outcome = store.rotate_digest(id, "digest-1", loser).await.unwrap();
        assert!(matches!(outcome, RotationOutcome::Conflict));

        let current = store.get(id).await.unwrap().unwrap();
        assert_eq!(current.refresh_digest, "digest-2");
        assert_eq!(current.refresh_count, 1);
    }

    #[tokio::test]
    async fn test_revoke_is_monotone() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let session = sample_session(Uuid::new_v4(), "digest-1", "pub-1", now);
        let id = session.id;
        store.insert(session).await.unwrap();

        assert!(store.revoke(id, "user_logout", now).await.unwrap());
        // Already terminal: no second transition
        assert!(!store.revoke(id, "user_logout", now).await.unwrap());

        let revoked = store.get(id).await.unwrap().unwrap();
        assert_eq!(revoked.status, SessionStatus::Revoked);
        assert_eq!(revoked.revoked_reason.as_deref(), Some("user_logout"));
        assert!(revoked.revoked_at.is_some());
    }

    #[tokio::test]
    async fn test_expire_due_is_idempotent() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let mut session = sample_session(Uuid::new_v4(), "digest-1", "pub-1", now);
        session.expires_at = now - Duration::hours(1);
        store.insert(session).await.unwrap();
        store
            .insert(sample_session(Uuid::new_v4(), "digest-2", "pub-2", now))
            .await
            .unwrap();

        assert_eq!(store.expire_due(now).await.unwrap(), 1);
        assert_eq!(store.expire_due(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_revoke_all_spares_exception() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let user_id = Uuid::new_v4();

        let keep = sample_session(user_id, "digest-1", "pub-1", now);
        let keep_id = keep.id;
        store.insert(keep).await.unwrap();
        store
            .insert(sample_session(user_id, "digest-2", "pub-2", now))
            .await
            .unwrap();
        store
            .insert(sample_session(user_id, "digest-3", "pub-3", now))
            .await
            .unwrap();

        let count = store
            .revoke_all_for_user(user_id, Some(keep_id), "bulk_termination", now)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let spared = store.get(keep_id).await.unwrap().unwrap();
        assert_eq!(spared.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_delete_for_user_removes_indexes() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        let user_id = Uuid::new_v4();
        store
            .insert(sample_session(user_id, "digest-1", "pub-1", now))
            .await
            .unwrap();
        store
            .insert(sample_session(user_id, "digest-2", "pub-2", now))
            .await
            .unwrap();
        store
            .insert(sample_session(Uuid::new_v4(), "digest-3", "pub-3", now))
            .await
            .unwrap();

        assert_eq!(store.delete_for_user(user_id).await.unwrap(), 2);
        assert!(store.find_by_digest("digest-1").await.unwrap().is_none());
        assert!(store.find_by_public_id("pub-1").await.unwrap().is_none());
        // Other users are untouched
        assert!(store.find_by_digest("digest-3").await.unwrap().is_some());
    }
}
