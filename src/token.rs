// Token generation and digest computation
// The raw refresh credential never touches persistence; only its digest does.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Number of random bytes in a refresh credential (512 bits)
const REFRESH_TOKEN_BYTES: usize = 64;

/// Number of random bytes in a public session handle (256 bits)
const PUBLIC_SESSION_ID_BYTES: usize = 32;

/// Stateless codec for opaque session credentials.
///
/// Generates URL-safe random tokens and computes the one-way digest
/// under which a credential is stored and looked up.
#[derive(Debug, Clone, Default)]
pub struct TokenCodec;

impl TokenCodec {
    pub fn new() -> Self {
        Self
    }

    /// Generate a new high-entropy refresh credential
    pub fn generate_refresh_token(&self) -> String {
        random_urlsafe(REFRESH_TOKEN_BYTES)
    }

    /// Generate a new opaque public session handle
    pub fn generate_public_session_id(&self) -> String {
        random_urlsafe(PUBLIC_SESSION_ID_BYTES)
    }

    /// Compute the storage digest of a credential (SHA-256, hex encoded)
    pub fn digest(&self, token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
