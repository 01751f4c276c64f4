//! `ppghub-auth` — pure authorization and session domain.
//!
//! This crate is intentionally decoupled from storage and transport: every
//! type here is plain data plus the state transitions it allows.

pub mod audit;
pub mod binding;
pub mod capability;
pub mod resolve;
pub mod role;
pub mod scope;
pub mod session;
pub mod user;

pub use audit::{AuditEntry, AuditFilter, AuditRecord};
pub use binding::{BindingKey, BindingStatus, NewBinding, ScopeBinding};
pub use capability::{Capability, CapabilitySet};
pub use resolve::{
    AuthorizationExplanation, AuthzError, Contribution, DenialKind, DenialReason, MatchReason,
    RequiresCapability, Resolution, ResolutionPolicy, match_binding, resolve,
};
pub use role::{AccessLevel, Role, RoleDefinition, RoleName, default_catalog};
pub use scope::{BindingScope, Institution, Program, Scope};
pub use session::{Session, SessionPolicy, SessionStatus, TokenHash};
pub use user::{
    CredentialHash, FailureOutcome, LockoutPolicy, LockoutState, NewUser, ProfileChange, User,
    UserSnapshot, normalize_email,
};
