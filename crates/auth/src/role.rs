use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ppghub_core::{AuthError, AuthResult, RoleId};

use crate::{Capability, CapabilitySet};

/// Role name (unique within the catalog).
///
/// Names are normalised to trimmed lower case so "Coordenador" and
/// "coordenador" cannot coexist.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleName(Cow<'static, str>);

impl RoleName {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        let name: Cow<'static, str> = name.into();
        if name.trim() == name && !name.chars().any(|c| c.is_uppercase()) {
            Self(name)
        } else {
            Self(Cow::Owned(name.trim().to_lowercase()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for RoleName {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RoleName {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Advisory privilege rank (higher = more privileged).
///
/// Used for ordering and coarse checks ("at least coordinator"); never a
/// substitute for an explicit capability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessLevel(u8);

impl AccessLevel {
    pub const fn new(level: u8) -> Self {
        Self(level)
    }

    pub const fn get(self) -> u8 {
        self.0
    }
}

impl core::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Administrable description of a role (seed / upsert input).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub name: RoleName,
    #[serde(default)]
    pub description: Option<String>,
    pub access_level: AccessLevel,
    pub capabilities: CapabilitySet,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl RoleDefinition {
    pub fn new(name: impl Into<RoleName>, access_level: u8, capabilities: CapabilitySet) -> Self {
        Self {
            name: name.into(),
            description: None,
            access_level: AccessLevel::new(access_level),
            capabilities,
            active: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.name.as_str().is_empty() {
            return Err(AuthError::invalid_state("role name cannot be empty"));
        }
        Ok(())
    }
}

/// A role stored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: RoleName,
    pub description: Option<String>,
    pub access_level: AccessLevel,
    pub capabilities: CapabilitySet,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn from_definition(id: RoleId, def: RoleDefinition, at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: def.name,
            description: def.description,
            access_level: def.access_level,
            capabilities: def.capabilities,
            active: def.active,
            created_at: at,
            updated_at: at,
        }
    }

    /// Apply an administrative update, keeping identity and creation time.
    pub fn updated(&self, def: RoleDefinition, at: DateTime<Utc>) -> Self {
        Self {
            id: self.id,
            name: def.name,
            description: def.description,
            access_level: def.access_level,
            capabilities: def.capabilities,
            active: def.active,
            created_at: self.created_at,
            updated_at: at,
        }
    }

    /// Capabilities this role currently grants (nothing when deactivated).
    pub fn effective_capabilities(&self) -> CapabilitySet {
        if self.active {
            self.capabilities.clone()
        } else {
            CapabilitySet::new()
        }
    }

    pub fn is_at_least(&self, level: AccessLevel) -> bool {
        self.access_level >= level
    }
}

/// The academic role catalog seeded when no other catalog is configured.
pub fn default_catalog() -> Vec<RoleDefinition> {
    use Capability::*;

    vec![
        RoleDefinition::new("administrador", 5, CapabilitySet::all())
            .with_description("Institution administrator"),
        RoleDefinition::new(
            "coordenador",
            4,
            CapabilitySet::from([
                ManageProgram,
                ManageBindings,
                ViewAnalytics,
                ViewAudit,
                ManageCourses,
                ManageEnrollments,
                ManageCommittees,
                ViewRecords,
            ]),
        )
        .with_description("Program coordinator"),
        RoleDefinition::new(
            "secretaria",
            3,
            CapabilitySet::from([ManageEnrollments, ManageCourses, ViewRecords]),
        )
        .with_description("Program office staff"),
        RoleDefinition::new(
            "docente",
            2,
            CapabilitySet::from([ManageCourses, RecordGrades, ManageTheses, ManageCommittees]),
        )
        .with_description("Faculty member"),
        RoleDefinition::new("discente", 1, CapabilitySet::from([ViewRecords]))
            .with_description("Graduate student"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_names_are_normalised() {
        assert_eq!(RoleName::new("  Coordenador ").as_str(), "coordenador");
        assert_eq!(RoleName::new("docente"), RoleName::from("docente"));
    }

    #[test]
    fn inactive_role_grants_nothing() {
        let def = RoleDefinition::new("docente", 2, CapabilitySet::from([Capability::RecordGrades]));
        let mut role = Role::from_definition(RoleId::new(1), def, Utc::now());
        assert!(role.effective_capabilities().contains(Capability::RecordGrades));

        role.active = false;
        assert!(role.effective_capabilities().is_empty());
    }

    #[test]
    fn default_catalog_is_ordered_by_access_level() {
        let catalog = default_catalog();
        let levels: Vec<u8> = catalog.iter().map(|r| r.access_level.get()).collect();
        assert_eq!(levels, vec![5, 4, 3, 2, 1]);
        assert!(catalog[0].capabilities.is_superset(&catalog[1].capabilities));
    }
}
