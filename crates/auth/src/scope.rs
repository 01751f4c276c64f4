//! Multi-tenant hierarchy: institution → program, and the scopes bindings
//! and authorization questions are expressed in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ppghub_core::{InstitutionId, ProgramId};

/// An institution (tenant root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    pub id: InstitutionId,
    pub name: String,
    pub acronym: String,
    pub created_at: DateTime<Utc>,
}

/// An academic program owned by exactly one institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    pub institution_id: InstitutionId,
    pub acronym: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// The scope an authorization question is asked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Scope {
    /// A single program.
    Program(ProgramId),
    /// The global sentinel.
    Global,
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Scope::Program(id) => write!(f, "program:{id}"),
            Scope::Global => f.write_str("global"),
        }
    }
}

/// What a binding is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum BindingScope {
    /// A single program.
    Program(ProgramId),
    /// Every program of an institution (institution-level administration).
    Institution(InstitutionId),
}

impl core::fmt::Display for BindingScope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BindingScope::Program(id) => write!(f, "program:{id}"),
            BindingScope::Institution(id) => write!(f, "institution:{id}"),
        }
    }
}

impl From<ProgramId> for BindingScope {
    fn from(value: ProgramId) -> Self {
        BindingScope::Program(value)
    }
}

impl From<InstitutionId> for BindingScope {
    fn from(value: InstitutionId) -> Self {
        BindingScope::Institution(value)
    }
}
