//! Recovery token secrets.
//!
//! The plaintext secret only ever travels inside the deletion-requested event
//! and the recovery link. Everything persisted is the SHA-256 hex digest.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of random bytes in a generated secret.
pub const TOKEN_BYTES: usize = 32;

/// A plaintext one-time token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);

impl TokenSecret {
    /// Generate a fresh random secret (hex encoded).
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wrap a secret received from a client.
    pub fn from_client(secret: impl Into<String>) -> crate::Result<Self> {
        let secret = secret.into();
        let trimmed = secret.trim();
        if trimmed.is_empty() {
            return Err(crate::Error::InvalidToken("token is empty".to_string()));
        }
        if trimmed.len() > 256 {
            return Err(crate::Error::InvalidToken("token is too long".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// SHA-256 hex digest used as the storage key.
    pub fn hash(&self) -> String {
        hash_token(&self.0)
    }

    /// The plaintext value. Only for building links and event payloads.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TokenSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TokenSecret(<redacted>)")
    }
}

/// Hash a token for storage lookup.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
