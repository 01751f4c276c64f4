//! Audit trail records.
//!
//! Records are append-only. Before/after snapshots are serialised to JSON at
//! write time, so later changes to the entity can never leak into history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ppghub_core::{AuditId, AuthError, AuthResult, ClientMeta, UserId};

/// An audit entry about to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub actor: Option<UserId>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub client: ClientMeta,
}

impl AuditEntry {
    pub fn new(
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl ToString,
    ) -> Self {
        Self {
            actor: None,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            before: None,
            after: None,
            client: ClientMeta::system(),
        }
    }

    /// `None` records a system action.
    pub fn actor(mut self, actor: Option<UserId>) -> Self {
        self.actor = actor;
        self
    }

    pub fn client(mut self, client: ClientMeta) -> Self {
        self.client = client;
        self
    }

    pub fn before<T: Serialize>(mut self, state: &T) -> AuthResult<Self> {
        self.before = Some(snapshot(state)?);
        Ok(self)
    }

    pub fn after<T: Serialize>(mut self, state: &T) -> AuthResult<Self> {
        self.after = Some(snapshot(state)?);
        Ok(self)
    }
}

fn snapshot<T: Serialize>(state: &T) -> AuthResult<Value> {
    serde_json::to_value(state)
        .map_err(|e| AuthError::invalid_state(format!("audit snapshot not serialisable: {e}")))
}

/// An immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditId,
    pub actor: Option<UserId>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub client: ClientMeta,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn from_entry(id: AuditId, entry: AuditEntry, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id,
            actor: entry.actor,
            action: entry.action,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            before: entry.before,
            after: entry.after,
            client: entry.client,
            recorded_at,
        }
    }
}

/// Selection over the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditFilter {
    Entity {
        entity_type: String,
        entity_id: String,
    },
    Actor(UserId),
    /// Half-open range `[from, to)`.
    TimeRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
}

impl AuditFilter {
    pub fn entity(entity_type: impl Into<String>, entity_id: impl ToString) -> Self {
        AuditFilter::Entity {
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
        }
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        match self {
            AuditFilter::Entity {
                entity_type,
                entity_id,
            } => record.entity_type == *entity_type && record.entity_id == *entity_id,
            AuditFilter::Actor(actor) => record.actor == Some(*actor),
            AuditFilter::TimeRange { from, to } => {
                *from <= record.recorded_at && record.recorded_at < *to
            }
        }
    }
}

/// Well-known action names recorded by the authority itself.
pub mod actions {
    pub const USER_CREATED: &str = "user.created";
    pub const USER_DEACTIVATED: &str = "user.deactivated";
    pub const USER_REACTIVATED: &str = "user.reactivated";
    pub const USER_VERIFIED: &str = "user.verified";
    pub const USER_LOCKED: &str = "user.locked";
    pub const USER_UNLOCKED: &str = "user.unlocked";
    pub const USER_CREDENTIALS_RESET: &str = "user.credentials_reset";
    pub const USER_LOCKED_OUT: &str = "user.locked_out";
    pub const USER_PROFILE_UPDATED: &str = "user.profile_updated";

    pub const ROLE_CREATED: &str = "role.created";
    pub const ROLE_UPDATED: &str = "role.updated";

    pub const BINDING_GRANTED: &str = "binding.granted";
    pub const BINDING_REVOKED: &str = "binding.revoked";
    pub const BINDING_SUSPENDED: &str = "binding.suspended";
    pub const BINDING_REINSTATED: &str = "binding.reinstated";

    pub const SESSION_LOGIN: &str = "session.login";
    pub const SESSION_REFRESHED: &str = "session.refreshed";
    pub const SESSION_LOGOUT: &str = "session.logout";
    pub const SESSION_REVOKED: &str = "session.revoked";
    pub const SESSION_REPLAY_DETECTED: &str = "session.refresh_replay";

    pub const INSTITUTION_REGISTERED: &str = "institution.registered";
    pub const PROGRAM_REGISTERED: &str = "program.registered";
}
