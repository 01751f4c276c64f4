//! `ppghub-authority` — the scoped authorization and session authority.
//!
//! Six services share one configuration, one clock and one audit trail:
//! - [`IdentityService`]: users, credentials, lockout
//! - [`RoleCatalog`]: roles and their capability sets
//! - [`BindingLedger`]: time-bounded (user, scope, role) bindings
//! - [`AuthorizationResolver`]: effective capabilities per scope
//! - [`SessionAuthority`]: login, refresh rotation, validation, revocation
//! - [`AuditRecorder`]: the append-only audit trail
//!
//! [`Authority`] wires them together.

pub mod audit;
pub mod authority;
pub mod context;
pub mod directory;
pub mod guard;
pub mod identity;
pub mod ledger;
pub mod resolver;
pub mod roles;
pub mod sessions;

pub use audit::{AuditCursor, AuditRecorder};
pub use authority::{Authority, Stores};
pub use context::{RequestContext, Runtime};
pub use directory::ProgramDirectory;
pub use guard::RoleGuards;
pub use identity::{IdentityService, Registration};
pub use ledger::{BindingLedger, GrantRequest};
pub use resolver::AuthorizationResolver;
pub use roles::RoleCatalog;
pub use sessions::{IssuedSession, SessionAuthority};
