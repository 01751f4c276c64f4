//! User identity and the per-user lockout automaton.
//!
//! Users are never physically deleted: deactivation is a status flip, since
//! bindings and audit records keep referring to them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use ppghub_core::{AuthError, AuthResult, ExternalId, UserId};

// ─────────────────────────────────────────────────────────────────────────────
// Credential
// ─────────────────────────────────────────────────────────────────────────────

/// Salted one-way credential hash in PHC string format.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialHash(String);

impl CredentialHash {
    pub fn new(phc: impl Into<String>) -> Self {
        Self(phc.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for CredentialHash {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("CredentialHash(<redacted>)")
    }
}

/// Trim, lower-case and sanity-check an email address.
pub fn normalize_email(email: &str) -> AuthResult<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    };
    if !valid {
        return Err(AuthError::invalid(format!("malformed email '{email}'")));
    }
    Ok(email)
}

// ─────────────────────────────────────────────────────────────────────────────
// Lockout
// ─────────────────────────────────────────────────────────────────────────────

/// Throttling policy for repeated credential failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    /// Consecutive failures that lock the account.
    pub threshold: u32,
    /// How long a triggered lock lasts.
    pub duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            duration: Duration::minutes(15),
        }
    }
}

/// The two states of the per-user lockout automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockoutState {
    Open,
    Locked { until: DateTime<Utc> },
}

/// Result of recording one failed credential check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub failed_attempts: u32,
    /// Set when this failure tripped the lock.
    pub locked_until: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// User
// ─────────────────────────────────────────────────────────────────────────────

/// A stored user identity with its credential and lockout state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub external_id: ExternalId,
    pub email: String,
    pub full_name: String,
    pub credential: CredentialHash,
    pub verified: bool,
    pub failed_attempts: u32,
    pub locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub active: bool,
    /// Bumped whenever existing sessions must stop working (deactivation,
    /// administrative lock, credential reset). Sessions carry the value
    /// they were issued under.
    pub session_epoch: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration input after credential hashing.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub external_id: ExternalId,
    pub email: String,
    pub full_name: String,
    pub credential: CredentialHash,
    pub verified: bool,
}

/// Editable profile fields; `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileChange {
    pub email: Option<String>,
    pub full_name: Option<String>,
}

impl ProfileChange {
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.full_name.is_none()
    }
}

impl User {
    pub fn register(id: UserId, new: NewUser, at: DateTime<Utc>) -> Self {
        Self {
            id,
            external_id: new.external_id,
            email: new.email,
            full_name: new.full_name,
            credential: new.credential,
            verified: new.verified,
            failed_attempts: 0,
            locked: false,
            locked_until: None,
            active: true,
            session_epoch: 0,
            created_at: at,
            updated_at: at,
        }
    }

    /// Current automaton state; a lock whose window has passed reads as open.
    pub fn lockout_state(&self, now: DateTime<Utc>) -> LockoutState {
        if !self.locked {
            return LockoutState::Open;
        }
        let until = self.locked_until.unwrap_or(DateTime::<Utc>::MAX_UTC);
        if now < until {
            LockoutState::Locked { until }
        } else {
            LockoutState::Open
        }
    }

    /// Fail if this identity may not attempt authentication right now.
    pub fn ensure_can_authenticate(&self, now: DateTime<Utc>) -> AuthResult<()> {
        if !self.active {
            return Err(AuthError::not_found(format!("user {} is inactive", self.id)));
        }
        match self.lockout_state(now) {
            LockoutState::Open => Ok(()),
            LockoutState::Locked { until } => Err(AuthError::LockedOut { until }),
        }
    }

    /// Record a failed credential check; trips the lock at the threshold.
    ///
    /// Must be applied atomically per user by the owning store.
    pub fn register_failure(
        &mut self,
        now: DateTime<Utc>,
        policy: &LockoutPolicy,
    ) -> AuthResult<FailureOutcome> {
        if let LockoutState::Locked { until } = self.lockout_state(now) {
            return Err(AuthError::LockedOut { until });
        }
        if self.locked {
            // lock window elapsed: the automaton is back to Open with a fresh count
            self.clear_lockout();
        }

        self.failed_attempts = self.failed_attempts.saturating_add(1);
        self.updated_at = now;

        let mut locked_until = None;
        if self.failed_attempts >= policy.threshold.max(1) {
            let until = now + policy.duration;
            self.locked = true;
            self.locked_until = Some(until);
            locked_until = Some(until);
        }

        Ok(FailureOutcome {
            failed_attempts: self.failed_attempts,
            locked_until,
        })
    }

    /// Record a successful credential check (resets the failure count).
    ///
    /// Re-checks the active flag, since the account may have been
    /// deactivated while its password was being verified.
    pub fn register_success(&mut self, now: DateTime<Utc>) -> AuthResult<()> {
        if !self.active {
            return Err(AuthError::not_found(format!("user {} is inactive", self.id)));
        }
        if let LockoutState::Locked { until } = self.lockout_state(now) {
            return Err(AuthError::LockedOut { until });
        }
        self.clear_lockout();
        self.updated_at = now;
        Ok(())
    }

    /// Administrative lock.
    pub fn lock_until(&mut self, until: DateTime<Utc>, now: DateTime<Utc>) -> AuthResult<()> {
        if until <= now {
            return Err(AuthError::invalid_state("lock must end in the future"));
        }
        self.locked = true;
        self.locked_until = Some(until);
        self.end_sessions();
        self.updated_at = now;
        Ok(())
    }

    /// Administrative unlock (Locked → Open).
    pub fn unlock(&mut self, now: DateTime<Utc>) {
        self.clear_lockout();
        self.updated_at = now;
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) -> AuthResult<()> {
        if !self.active {
            return Err(AuthError::invalid_state(format!("user {} already inactive", self.id)));
        }
        self.active = false;
        self.end_sessions();
        self.updated_at = now;
        Ok(())
    }

    pub fn reactivate(&mut self, now: DateTime<Utc>) -> AuthResult<()> {
        if self.active {
            return Err(AuthError::invalid_state(format!("user {} already active", self.id)));
        }
        self.active = true;
        self.updated_at = now;
        Ok(())
    }

    /// Apply a profile edit. A new email address starts out unverified.
    pub fn apply_profile(&mut self, change: &ProfileChange, now: DateTime<Utc>) -> AuthResult<()> {
        if let Some(name) = &change.full_name {
            let name = name.trim();
            if name.is_empty() {
                return Err(AuthError::invalid_state("full name must not be empty"));
            }
            self.full_name = name.to_string();
        }
        if let Some(email) = &change.email {
            let email = normalize_email(email)?;
            if email != self.email {
                self.email = email;
                self.verified = false;
            }
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_verified(&mut self, now: DateTime<Utc>) {
        self.verified = true;
        self.updated_at = now;
    }

    /// Replace the credential (reset flow); also reopens a locked account.
    pub fn replace_credential(&mut self, credential: CredentialHash, now: DateTime<Utc>) {
        self.credential = credential;
        self.clear_lockout();
        self.end_sessions();
        self.updated_at = now;
    }

    /// Credential-free view used for audit snapshots and listings.
    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.id,
            external_id: self.external_id,
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            verified: self.verified,
            failed_attempts: self.failed_attempts,
            locked: self.locked,
            locked_until: self.locked_until,
            active: self.active,
            session_epoch: self.session_epoch,
        }
    }

    fn end_sessions(&mut self) {
        self.session_epoch += 1;
    }

    fn clear_lockout(&mut self) {
        self.failed_attempts = 0;
        self.locked = false;
        self.locked_until = None;
    }
}

/// Serializable, credential-free copy of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: UserId,
    pub external_id: ExternalId,
    pub email: String,
    pub full_name: String,
    pub verified: bool,
    pub failed_attempts: u32,
    pub locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
    pub active: bool,
    pub session_epoch: u64,
}

impl UserSnapshot {
    /// Whether a session of this user issued under `epoch` may still be used.
    pub fn honours(&self, epoch: u64) -> bool {
        self.active && self.session_epoch == epoch
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
