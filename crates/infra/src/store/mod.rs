//! Store boundaries for the authority subsystem.
//!
//! Each store is an async trait with an in-memory implementation. Every
//! operation that must be atomic (uniqueness checks, per-user lockout
//! counting, token rotation) is a single trait call, so implementations can
//! map it onto one transaction or compare-and-swap.

pub mod audit;
pub mod bindings;
pub mod directory;
pub mod identity;
pub mod roles;
pub mod sessions;

pub use audit::{AuditLog, InMemoryAuditLog};
pub use bindings::{BindingStore, BindingUpdate, InMemoryBindingStore};
pub use directory::{DirectoryStore, InMemoryDirectory};
pub use identity::{IdentityStore, InMemoryIdentityStore, UserMutation};
pub use roles::{InMemoryRoleStore, RoleStore};
pub use sessions::{InMemorySessionStore, Rotation, SessionStore};

use ppghub_core::AuthError;

pub(crate) fn poisoned() -> AuthError {
    AuthError::unavailable("lock poisoned")
}
