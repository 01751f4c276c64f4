//! Error vocabulary shared by every component of the authority subsystem.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type used across the authority subsystem.
pub type AuthResult<T> = Result<T, AuthError>;

/// Authority-level error.
///
/// The kinds are deliberately coarse: collaborators decide the user-facing
/// presentation. Credential failures never carry more detail than
/// "authentication failed".
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The referenced entity does not exist (or is inactive where that matters).
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint would be violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authentication failed.
    #[error("authentication failed")]
    InvalidCredentials,

    /// The account is temporarily locked after repeated failures.
    #[error("account locked until {until}")]
    LockedOut { until: DateTime<Utc> },

    /// The session (or its refresh credential) has outlived its absolute expiry.
    #[error("session expired")]
    Expired,

    /// Unknown, malformed, terminal, or replayed token.
    #[error("invalid token: {0}")]
    Invalid(String),

    /// The operation is not valid for the entity's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Storage or backing-service failure (including timeouts).
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl AuthError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Prefix the message of a message-carrying error; other kinds pass through.
    pub fn context(self, prefix: impl core::fmt::Display) -> Self {
        match self {
            Self::NotFound(msg) => Self::NotFound(format!("{prefix}: {msg}")),
            Self::Conflict(msg) => Self::Conflict(format!("{prefix}: {msg}")),
            Self::Invalid(msg) => Self::Invalid(format!("{prefix}: {msg}")),
            Self::InvalidState(msg) => Self::InvalidState(format!("{prefix}: {msg}")),
            Self::Unavailable(msg) => Self::Unavailable(format!("{prefix}: {msg}")),
            other => other,
        }
    }

    /// Whether a collaborator may retry the call with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Stable machine-readable kind name (for logs and collaborator mapping).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidCredentials => "invalid_credentials",
            Self::LockedOut { .. } => "locked_out",
            Self::Expired => "expired",
            Self::Invalid(_) => "invalid",
            Self::InvalidState(_) => "invalid_state",
            Self::Unavailable(_) => "unavailable",
        }
    }
}
