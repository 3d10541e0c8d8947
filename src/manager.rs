// Session manager: the session lifecycle state machine.
// Creation, rotation, revocation, expiry sweep, and per-user capacity
// enforcement all live here; the store, clock, and token codec are
// injected collaborators.

use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::store::{ActivityUpdate, RotationOutcome, RotationUpdate, SessionStore};
use crate::token::TokenCodec;
use crate::types::{DeviceInfo, Session, SessionStatus, reasons};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Orchestrates the session state machine over an injected store.
///
/// Safe to share across request handlers; all state lives in the store.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    codec: TokenCodec,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            clock,
            audit,
            codec: TokenCodec::new(),
            config,
        }
    }

    /// Create a new session for a user, enforcing the per-user cap.
    ///
    /// Returns the persisted session together with the one-time raw
    /// refresh credential. This is the only point at which the raw
    /// credential exists; it is never retrievable again.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        device: DeviceInfo,
        ip_address: Option<&str>,
    ) -> Result<(Session, String), SessionError> {
        let now = self.clock.now();

        // Capacity check: evict the least recently active usable session
        // when the user is at the cap. Eviction is observable but must
        // never fail the creation itself.
        let existing = self.store.list_for_user(user_id).await?;
        let usable: Vec<&Session> = existing.iter().filter(|s| s.is_usable(now)).collect();

        if usable.len() >= self.config.max_sessions_per_user
            && let Some(oldest) = usable.iter().min_by_key(|s| s.last_activity_at)
        {
            warn!(
                "User {} reached max concurrent sessions ({}), evicting session {}",
                user_id, self.config.max_sessions_per_user, oldest.public_session_id
            );
            match self
                .store
                .revoke(oldest.id, reasons::SESSION_LIMIT_EXCEEDED, now)
                .await
            {
                Ok(_) => {
                    self.audit
                        .record(
                            AuditEvent::new(AuditKind::CapacityEviction, now)
                                .user_id(user_id)
                                .session(&oldest.public_session_id),
                        )
                        .await;
                }
                Err(e) => warn!(
                    "Failed to evict session {} for user {}: {}",
                    oldest.public_session_id, user_id, e
                ),
            }
        }

        let raw_token = self.codec.generate_refresh_token();
        let public_session_id = self.codec.generate_public_session_id();

        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            public_session_id: public_session_id.clone(),
            refresh_digest: self.codec.digest(&raw_token),
            previous_digest: None,
            device_id: device.device_id,
            device_name: Some(
                device
                    .device_name
                    .unwrap_or_else(|| "Unknown Device".to_string()),
            ),
            device_type: Some(device.device_type.unwrap_or_else(|| "unknown".to_string())),
            user_agent: device.user_agent,
            ip_address: ip_address.map(str::to_string),
            created_at: now,
            expires_at: now + self.config.refresh_token_lifetime(),
            last_activity_at: now,
            status: SessionStatus::Active,
            revoked_at: None,
            revoked_reason: None,
            refresh_count: 0,
            max_refresh_count: self.config.max_refresh_count,
        };

        self.store.insert(session.clone()).await?;

        info!(
            "Created session {} for user {}",
            session.public_session_id, user_id
        );
        let mut event = AuditEvent::new(AuditKind::SessionCreated, now)
            .user_id(user_id)
            .session(&public_session_id);
        if let Some(ip) = ip_address {
            event = event.ip_address(ip);
        }
        self.audit.record(event).await;

        Ok((session, raw_token))
    }

    /// Refresh a session and rotate its credential.
    ///
    /// The digest swap is a conditional update keyed on the digest just
    /// read; losing that race, or presenting an already-retired digest,
    /// is treated as credential reuse and kills the session.
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        ip_address: Option<&str>,
    ) -> Result<(Session, String), SessionError> {
        let now = self.clock.now();
        let digest = self.codec.digest(refresh_token);

        let Some(session) = self.store.find_by_digest(&digest).await? else {
            // A digest that was rotated out and presented again is proof
            // of reuse: either a stolen credential or a lost race.
            if let Some(stale) = self.store.find_by_retired_digest(&digest).await? {
                return self.handle_replay(&stale, ip_address, now).await;
            }
            warn!(
                "Invalid refresh token attempt from {}",
                ip_address.unwrap_or("unknown ip")
            );
            return Err(SessionError::InvalidCredential);
        };

        if !session.is_usable(now) {
            warn!(
                "Session {} is no longer usable (status {:?}, refresh_count {}/{})",
                session.public_session_id,
                session.status,
                session.refresh_count,
                session.max_refresh_count
            );
            return Err(SessionError::InvalidCredential);
        }

        // An IP change is flagged for observability but never blocks the
        // refresh; stronger enforcement is the caller's policy decision.
        if let (Some(prev), Some(ip)) = (session.ip_address.as_deref(), ip_address)
            && prev != ip
        {
            warn!(
                "IP address changed for session {}: {} -> {}",
                session.public_session_id, prev, ip
            );
            self.audit
                .record(
                    AuditEvent::new(AuditKind::IpChanged, now)
                        .user_id(session.user_id)
                        .session(&session.public_session_id)
                        .ip_address(ip)
                        .detail(format!("previous ip: {}", prev)),
                )
                .await;
        }

        let new_token = self.codec.generate_refresh_token();
        let update = RotationUpdate {
            new_digest: self.codec.digest(&new_token),
            expires_at: now + self.config.refresh_token_lifetime(),
            last_activity_at: now,
            ip_address: ip_address.map(str::to_string),
        };

        match self.store.rotate_digest(session.id, &digest, update).await? {
            RotationOutcome::Rotated(updated) => {
                debug!(
                    "Refreshed session {} (refresh_count {})",
                    updated.public_session_id, updated.refresh_count
                );
                self.audit
                    .record(
                        AuditEvent::new(AuditKind::SessionRefreshed, now)
                            .user_id(updated.user_id)
                            .session(&updated.public_session_id),
                    )
                    .await;
                Ok((updated, new_token))
            }
            RotationOutcome::Conflict => self.handle_replay(&session, ip_address, now).await,
        }
    }

    /// Terminate the session owning a refresh token (logout).
    ///
    /// Returns false if the token matches nothing; terminating an
    /// unknown credential is not an error, since the desired end state
    /// already holds.
    pub async fn terminate_session(&self, refresh_token: &str) -> Result<bool, SessionError> {
        let now = self.clock.now();
        let digest = self.codec.digest(refresh_token);

        let Some(session) = self.store.find_by_digest(&digest).await? else {
            return Ok(false);
        };

        self.store
            .revoke(session.id, reasons::USER_LOGOUT, now)
            .await?;
        info!(
            "Terminated session {}: {}",
            session.public_session_id,
            reasons::USER_LOGOUT
        );
        self.audit
            .record(
                AuditEvent::new(AuditKind::SessionRevoked, now)
                    .user_id(session.user_id)
                    .session(&session.public_session_id)
                    .detail(reasons::USER_LOGOUT),
            )
            .await;
        Ok(true)
    }

    /// Revoke every active session for a user ("log out everywhere"),
    /// optionally sparing one session named by its public handle.
    /// Returns the number revoked.
    pub async fn terminate_all_sessions(
        &self,
        user_id: Uuid,
        except_public_session_id: Option<&str>,
    ) -> Result<usize, SessionError> {
        let now = self.clock.now();

        let except = match except_public_session_id {
            Some(public_id) => self
                .store
                .find_by_public_id(public_id)
                .await?
                .map(|s| s.id),
            None => None,
        };

        let count = self
            .store
            .revoke_all_for_user(user_id, except, reasons::BULK_TERMINATION, now)
            .await?;

        info!("Terminated {} sessions for user {}", count, user_id);
        self.audit
            .record(
                AuditEvent::new(AuditKind::BulkTermination, now)
                    .user_id(user_id)
                    .detail(format!("{} sessions revoked", count)),
            )
            .await;
        Ok(count)
    }

    /// List a user's sessions ordered by most recent activity.
    /// With `active_only`, filters to currently usable sessions;
    /// otherwise returns full history including terminal sessions.
    pub async fn list_sessions(
        &self,
        user_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<Session>, SessionError> {
        let now = self.clock.now();
        let mut sessions = self.store.list_for_user(user_id).await?;

        if active_only {
            sessions.retain(|s| s.is_usable(now));
        }
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(sessions)
    }

    /// Look up a session by its public handle
    pub async fn get_session(
        &self,
        public_session_id: &str,
    ) -> Result<Option<Session>, SessionError> {
        Ok(self.store.find_by_public_id(public_session_id).await?)
    }

    /// Activity ping: bump `last_activity_at` and optionally overwrite
    /// IP / user agent, without rotating the credential.
    /// Returns false if the handle matches no session.
    pub async fn update_activity(
        &self,
        public_session_id: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<bool, SessionError> {
        let now = self.clock.now();

        let Some(session) = self.store.find_by_public_id(public_session_id).await? else {
            return Ok(false);
        };

        self.store
            .touch_activity(
                session.id,
                ActivityUpdate {
                    last_activity_at: now,
                    ip_address: ip_address.map(str::to_string),
                    user_agent: user_agent.map(str::to_string),
                },
            )
            .await?;
        Ok(true)
    }

    /// Maintenance sweep: transition every Active session past its
    /// expiry to Expired. Idempotent; returns the number transitioned.
    pub async fn cleanup_expired_sessions(&self) -> Result<usize, SessionError> {
        let now = self.clock.now();
        let count = self.store.expire_due(now).await?;

        if count > 0 {
            debug!("Cleaned up {} expired sessions", count);
            self.audit
                .record(
                    AuditEvent::new(AuditKind::CleanupSweep, now)
                        .detail(format!("{} sessions expired", count)),
                )
                .await;
        }
        Ok(count)
    }

    /// Hard-delete every session for a user. Invoked by the user
    /// deletion workflow; the only path that removes rows instead of
    /// leaving them in a terminal state for audit.
    pub async fn delete_user_sessions(&self, user_id: Uuid) -> Result<usize, SessionError> {
        let count = self.store.delete_for_user(user_id).await?;
        info!("Deleted {} sessions for user {}", count, user_id);
        Ok(count)
    }

    /// Shared replay path: revoke the session and deny the caller.
    async fn handle_replay(
        &self,
        session: &Session,
        ip_address: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(Session, String), SessionError> {
        warn!(
            "Refresh token reuse detected for session {}, revoking",
            session.public_session_id
        );
        self.store
            .revoke(session.id, reasons::CONCURRENT_REFRESH_DETECTED, now)
            .await?;

        let mut event = AuditEvent::new(AuditKind::ReplayDetected, now)
            .user_id(session.user_id)
            .session(&session.public_session_id);
        if let Some(ip) = ip_address {
            event = event.ip_address(ip);
        }
        self.audit.record(event).await;

        Err(SessionError::ReplayDetected)
    }
}
