//! Login sessions and their state machine.
//!
//! ```text
//! Issued ──► Active ──► { Expired | Revoked | LoggedOut }   (all terminal)
//!    └──────────────────►
//! ```
//!
//! Only token hashes are kept; the raw token is handed to the caller once.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use ppghub_core::{AuthError, AuthResult, ClientMeta, SessionId, UserId};

/// One-way hash of an opaque token (hex-encoded digest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenHash(String);

impl TokenHash {
    pub fn new(hex_digest: impl Into<String>) -> Self {
        Self(hex_digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Issued,
    Active,
    Expired,
    Revoked,
    LoggedOut,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Expired | SessionStatus::Revoked | SessionStatus::LoggedOut
        )
    }
}

impl core::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            SessionStatus::Issued => "issued",
            SessionStatus::Active => "active",
            SessionStatus::Expired => "expired",
            SessionStatus::Revoked => "revoked",
            SessionStatus::LoggedOut => "logged_out",
        };
        f.write_str(s)
    }
}

/// Sliding expiry bounded by an absolute cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    pub ttl: Duration,
    pub max_lifetime: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(24),
            max_lifetime: Duration::days(7),
        }
    }
}

impl SessionPolicy {
    /// Expiry after (re)issuing at `now` for a chain that started at `created_at`.
    pub fn expiry(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        (now + self.ttl).min(created_at + self.max_lifetime)
    }
}

/// A login session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    /// The owner's session epoch at login.
    pub user_epoch: u64,
    #[serde(skip)]
    pub token_hash: Option<TokenHash>,
    #[serde(skip)]
    pub refresh_hash: Option<TokenHash>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Number of completed refresh rotations.
    pub rotations: u32,
    pub client: ClientMeta,
}

impl Session {
    pub fn issue(
        user_id: UserId,
        user_epoch: u64,
        token_hash: TokenHash,
        refresh_hash: TokenHash,
        client: ClientMeta,
        now: DateTime<Utc>,
        policy: &SessionPolicy,
    ) -> Self {
        Self {
            id: SessionId::new(),
            user_id,
            user_epoch,
            token_hash: Some(token_hash),
            refresh_hash: Some(refresh_hash),
            status: SessionStatus::Issued,
            created_at: now,
            expires_at: policy.expiry(now, now),
            ended_at: None,
            rotations: 0,
            client,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Check the session is usable at `now`, moving it along the state
    /// machine: `Issued → Active` on first use, `→ Expired` past expiry.
    pub fn touch(&mut self, now: DateTime<Utc>) -> AuthResult<()> {
        match self.status {
            SessionStatus::Expired => Err(AuthError::Expired),
            SessionStatus::Revoked => Err(AuthError::invalid("session revoked")),
            SessionStatus::LoggedOut => Err(AuthError::invalid("session logged out")),
            SessionStatus::Issued | SessionStatus::Active => {
                if now >= self.expires_at {
                    self.finish(SessionStatus::Expired, now);
                    return Err(AuthError::Expired);
                }
                self.status = SessionStatus::Active;
                Ok(())
            }
        }
    }

    /// Swap in a fresh token pair and extend expiry (bounded by the cap).
    pub fn rotate(
        &mut self,
        token_hash: TokenHash,
        refresh_hash: TokenHash,
        now: DateTime<Utc>,
        policy: &SessionPolicy,
    ) -> AuthResult<()> {
        self.touch(now)?;
        self.token_hash = Some(token_hash);
        self.refresh_hash = Some(refresh_hash);
        self.expires_at = policy.expiry(self.created_at, now);
        self.rotations += 1;
        Ok(())
    }

    /// Move to `Revoked`; returns false when already terminal.
    pub fn revoke(&mut self, now: DateTime<Utc>) -> bool {
        self.end_with(SessionStatus::Revoked, now)
    }

    /// Move to `LoggedOut`; returns false when already terminal.
    pub fn logout(&mut self, now: DateTime<Utc>) -> bool {
        self.end_with(SessionStatus::LoggedOut, now)
    }

    fn end_with(&mut self, status: SessionStatus, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.finish(status, now);
        true
    }

    fn finish(&mut self, status: SessionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.ended_at = Some(now);
    }
}
