//! Credential hashing and opaque token material.
//!
//! Passwords are stored as salted argon2id PHC strings. Session and refresh
//! tokens are 256-bit random values; only their SHA-256 digests are stored.

use std::sync::Arc;

use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use sha2::{Digest, Sha256};

use ppghub_auth::{CredentialHash, TokenHash};
use ppghub_core::{AuthError, AuthResult};

use crate::config::HashingSettings;

/// Argon2id hasher with configured cost parameters.
pub struct CredentialHasher {
    argon2: Argon2<'static>,
    /// Burned on unknown-account attempts so they cost as much as real ones.
    dummy: CredentialHash,
}

impl CredentialHasher {
    pub fn new(settings: &HashingSettings) -> AuthResult<Self> {
        let params = Params::new(
            settings.memory_kib,
            settings.iterations,
            settings.parallelism,
            None,
        )
        .map_err(|e| AuthError::invalid_state(format!("argon2 parameters rejected: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = SaltString::generate(&mut OsRng);
        let dummy = argon2
            .hash_password(b"ppghub-timing-equaliser", &salt)
            .map_err(|e| AuthError::unavailable(format!("password hashing failed: {e}")))?
            .to_string();

        Ok(Self {
            argon2,
            dummy: CredentialHash::new(dummy),
        })
    }

    pub fn hash(&self, password: &str) -> AuthResult<CredentialHash> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|h| CredentialHash::new(h.to_string()))
            .map_err(|e| AuthError::unavailable(format!("password hashing failed: {e}")))
    }

    /// Constant-effort comparison; a malformed stored hash never matches.
    pub fn verify(&self, password: &str, stored: &CredentialHash) -> bool {
        match PasswordHash::new(stored.as_str()) {
            Ok(parsed) => self.argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }

    /// Spend one verification's worth of work and report a mismatch.
    pub fn verify_dummy(&self, password: &str) -> bool {
        let _ = self.verify(password, &self.dummy);
        false
    }

    /// [`hash`](Self::hash) on the blocking pool.
    pub async fn hash_blocking(self: &Arc<Self>, password: String) -> AuthResult<CredentialHash> {
        let hasher = Arc::clone(self);
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::unavailable(format!("hashing task failed: {e}")))?
    }

    /// [`verify`](Self::verify) on the blocking pool; `None` burns the dummy hash.
    pub async fn verify_blocking(
        self: &Arc<Self>,
        password: String,
        stored: Option<CredentialHash>,
    ) -> AuthResult<bool> {
        let hasher = Arc::clone(self);
        tokio::task::spawn_blocking(move || match stored {
            Some(stored) => hasher.verify(&password, &stored),
            None => hasher.verify_dummy(&password),
        })
        .await
        .map_err(|e| AuthError::unavailable(format!("verification task failed: {e}")))
    }
}

impl core::fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialHasher")
            .field("params", self.argon2.params())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tokens
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque bearer secret. Handed to the client once, never stored or logged.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// 32 random bytes, hex encoded.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Wrap a token presented by a client.
    pub fn from_presented(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> TokenHash {
        hash_token(&self.0)
    }
}

impl core::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Access token plus its single-use refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access: SessionToken,
    pub refresh: SessionToken,
}

impl TokenPair {
    pub fn generate() -> Self {
        Self {
            access: SessionToken::generate(),
            refresh: SessionToken::generate(),
        }
    }
}

pub fn hash_token(token: &str) -> TokenHash {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    TokenHash::new(hex::encode(hasher.finalize()))
}
