// Error types for the session engine

use std::fmt;

/// Persistence-layer errors
#[derive(Debug, Clone)]
pub enum StoreError {
    /// No record matched the lookup
    NotFound,
    /// A refresh digest already exists on another session.
    /// Digests are unique system-wide; a collision is an internal error,
    /// never a silent overwrite.
    DigestExists,
    /// Backend failure (connectivity, constraint violation, ...)
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "Session not found"),
            StoreError::DigestExists => write!(f, "Refresh digest already exists"),
            StoreError::Backend(msg) => write!(f, "Store backend error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors surfaced by `SessionManager` operations
#[derive(Debug)]
pub enum SessionError {
    /// The presented refresh token does not match any usable session:
    /// unknown digest, wrong status, expired, or refresh count exhausted.
    InvalidCredential,
    /// The presented refresh token was already rotated out, either by a
    /// concurrent refresh or by an earlier use of a stolen credential.
    /// Reported to external callers exactly like `InvalidCredential`;
    /// the distinction exists for audit and logging only.
    ReplayDetected,
    /// A persistence-layer failure, propagated unmodified.
    Store(StoreError),
}

impl SessionError {
    /// The uniform message callers should surface to end users.
    /// Internal distinctions (replay vs. plain invalid credential) are
    /// never exposed at the API boundary, to avoid oracle leaks about
    /// why a credential failed.
    pub fn client_message(&self) -> &'static str {
        match self {
            SessionError::InvalidCredential | SessionError::ReplayDetected => {
                "Session invalid, please log in again"
            }
            SessionError::Store(_) => "Internal server error",
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidCredential => write!(f, "Invalid or expired refresh token"),
            SessionError::ReplayDetected => write!(f, "Refresh token reuse detected"),
            SessionError::Store(e) => write!(f, "Session store error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::Store(e)
    }
}
