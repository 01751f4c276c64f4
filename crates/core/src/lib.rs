//! `ppghub-core` — foundation types for the authority subsystem.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod clock;
pub mod error;
pub mod id;
pub mod meta;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AuthError, AuthResult};
pub use id::{AuditId, BindingId, ExternalId, InstitutionId, ProgramId, RoleId, SessionId, UserId};
pub use meta::ClientMeta;
