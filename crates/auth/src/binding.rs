//! Scope bindings: the (user, scope, role) association with a validity window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ppghub_core::{AuthError, AuthResult, BindingId, RoleId, UserId};

use crate::BindingScope;

/// Lifecycle status of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingStatus {
    Active,
    /// Temporary leave: the validity window stays open.
    Suspended,
    /// Terminal: the window is closed at `unbound_at`.
    Ended,
}

impl core::fmt::Display for BindingStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BindingStatus::Active => write!(f, "Active"),
            BindingStatus::Suspended => write!(f, "Suspended"),
            BindingStatus::Ended => write!(f, "Ended"),
        }
    }
}

/// Uniqueness key: at most one open binding may exist per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingKey {
    pub user_id: UserId,
    pub scope: BindingScope,
    pub role_id: RoleId,
}

/// Grant request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBinding {
    pub key: BindingKey,
    pub bound_at: DateTime<Utc>,
    pub granted_by: Option<UserId>,
    pub notes: Option<String>,
}

/// A binding record. Never deleted; history is retained for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeBinding {
    pub id: BindingId,
    pub user_id: UserId,
    pub scope: BindingScope,
    pub role_id: RoleId,
    pub bound_at: DateTime<Utc>,
    pub unbound_at: Option<DateTime<Utc>>,
    pub status: BindingStatus,
    pub granted_by: Option<UserId>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScopeBinding {
    pub fn create(id: BindingId, new: NewBinding, at: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: new.key.user_id,
            scope: new.key.scope,
            role_id: new.key.role_id,
            bound_at: new.bound_at,
            unbound_at: None,
            status: BindingStatus::Active,
            granted_by: new.granted_by,
            notes: new.notes,
            created_at: at,
        }
    }

    pub fn key(&self) -> BindingKey {
        BindingKey {
            user_id: self.user_id,
            scope: self.scope,
            role_id: self.role_id,
        }
    }

    /// Whether the binding still occupies its uniqueness slot.
    pub fn is_open(&self) -> bool {
        self.status != BindingStatus::Ended
    }

    /// Active status and `now` inside `[bound_at, unbound_at)`.
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.status == BindingStatus::Active
            && self.bound_at <= now
            && self.unbound_at.is_none_or(|end| now < end)
    }

    /// Active → Ended, closing the window at `effective_to`.
    pub fn end(&mut self, effective_to: DateTime<Utc>) -> AuthResult<()> {
        self.expect_status(BindingStatus::Active, "revoke")?;
        if effective_to < self.bound_at {
            return Err(AuthError::invalid_state(format!(
                "binding {} cannot end ({effective_to}) before it starts ({})",
                self.id, self.bound_at
            )));
        }
        self.status = BindingStatus::Ended;
        self.unbound_at = Some(effective_to);
        Ok(())
    }

    /// Active → Suspended (window stays open).
    pub fn suspend(&mut self) -> AuthResult<()> {
        self.expect_status(BindingStatus::Active, "suspend")?;
        self.status = BindingStatus::Suspended;
        Ok(())
    }

    /// Suspended → Active.
    pub fn reinstate(&mut self) -> AuthResult<()> {
        self.expect_status(BindingStatus::Suspended, "reinstate")?;
        self.status = BindingStatus::Active;
        Ok(())
    }

    fn expect_status(&self, expected: BindingStatus, op: &str) -> AuthResult<()> {
        if self.status != expected {
            return Err(AuthError::invalid_state(format!(
                "cannot {op} binding {} in status {}",
                self.id, self.status
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use ppghub_core::ProgramId;

    use super::*;

    fn binding(bound_at: DateTime<Utc>) -> ScopeBinding {
        ScopeBinding::create(
            BindingId::new(1),
            NewBinding {
                key: BindingKey {
                    user_id: UserId::new(7),
                    scope: BindingScope::Program(ProgramId::new(1)),
                    role_id: RoleId::new(2),
                },
                bound_at,
                granted_by: None,
                notes: None,
            },
            bound_at,
        )
    }

    #[test]
    fn effective_window_is_half_open() {
        let start = Utc::now();
        let mut b = binding(start);
        assert!(!b.is_effective(start - Duration::seconds(1)));
        assert!(b.is_effective(start));

        let end = start + Duration::days(1);
        b.end(end).unwrap();
        assert!(!b.is_effective(start + Duration::hours(1)));
        assert_eq!(b.unbound_at, Some(end));
        assert!(!b.is_open());
    }

    #[test]
    fn suspend_and_reinstate_keep_window_open() {
        let mut b = binding(Utc::now());
        b.suspend().unwrap();
        assert!(b.is_open());
        assert!(!b.is_effective(Utc::now()));
        assert!(b.suspend().is_err());
        b.reinstate().unwrap();
        assert_eq!(b.status, BindingStatus::Active);
        assert_eq!(b.unbound_at, None);
    }

    #[test]
    fn only_active_bindings_can_be_revoked() {
        let now = Utc::now();
        let mut b = binding(now);
        b.suspend().unwrap();
        assert!(matches!(b.end(now), Err(AuthError::InvalidState(_))));
        b.reinstate().unwrap();
        b.end(now).unwrap();
        assert!(matches!(b.end(now), Err(AuthError::InvalidState(_))));
    }

    #[test]
    fn end_before_start_is_rejected() {
        let now = Utc::now();
        let mut b = binding(now);
        assert!(b.end(now - Duration::days(1)).is_err());
        assert_eq!(b.status, BindingStatus::Active);
    }
}
