// Audit events for session lifecycle changes
// Internal distinctions (replay vs. plain invalid credential, eviction)
// live here and in the logs, never in client-facing responses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Kinds of auditable session events
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    SessionCreated,
    SessionRefreshed,
    SessionRevoked,
    /// A refresh token was presented after it had already been rotated
    ReplayDetected,
    /// Oldest session revoked to enforce the per-user cap
    CapacityEviction,
    /// Refresh arrived from a different IP than the one on record
    IpChanged,
    BulkTermination,
    CleanupSweep,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::SessionCreated => "session_created",
            AuditKind::SessionRefreshed => "session_refreshed",
            AuditKind::SessionRevoked => "session_revoked",
            AuditKind::ReplayDetected => "replay_detected",
            AuditKind::CapacityEviction => "capacity_eviction",
            AuditKind::IpChanged => "ip_changed",
            AuditKind::BulkTermination => "bulk_termination",
            AuditKind::CleanupSweep => "cleanup_sweep",
        }
    }

    /// Events that may indicate credential theft or abuse
    fn is_security_relevant(&self) -> bool {
        matches!(self, AuditKind::ReplayDetected | AuditKind::IpChanged)
    }
}

/// A single auditable session event
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub user_id: Option<Uuid>,
    pub public_session_id: Option<String>,
    pub ip_address: Option<String>,
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            kind,
            user_id: None,
            public_session_id: None,
            ip_address: None,
            detail: None,
        }
    }

    pub fn user_id(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn session(mut self, public_session_id: &str) -> Self {
        self.public_session_id = Some(public_session_id.to_string());
        self
    }

    pub fn ip_address(mut self, ip_address: &str) -> Self {
        self.ip_address = Some(ip_address.to_string());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Sink for audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Default sink that emits audit events through `tracing`
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) {
        if event.kind.is_security_relevant() {
            warn!(
                "Audit: {} - user: {:?}, session: {:?}, ip: {:?}, detail: {:?}",
                event.kind.as_str(),
                event.user_id,
                event.public_session_id,
                event.ip_address,
                event.detail
            );
        } else {
            info!(
                "Audit: {} - user: {:?}, session: {:?}, ip: {:?}, detail: {:?}",
                event.kind.as_str(),
                event.user_id,
                event.public_session_id,
                event.ip_address,
                event.detail
            );
        }
    }
}

/// In-memory sink that retains events, for tests and diagnostics
#[derive(Default)]
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn count_of(&self, kind: AuditKind) -> usize {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.write().await.push(event);
    }
}
