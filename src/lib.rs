// Session lifecycle and refresh-token rotation engine
// Creates, rotates, limits, revokes, and expires long-lived login
// sessions, each backed by a rotating opaque refresh credential.

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod manager;
pub mod store;
pub mod token;
pub mod types;

pub use audit::{AuditEvent, AuditKind, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{SessionConfig, load_config, load_config_with_fallback};
pub use error::{SessionError, StoreError};
pub use manager::SessionManager;
pub use store::{
    ActivityUpdate, MemorySessionStore, RotationOutcome, RotationUpdate, SessionStore,
};
pub use token::TokenCodec;
pub use types::{DeviceInfo, Session, SessionInfo, SessionStatus, reasons};
