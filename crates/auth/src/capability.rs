use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use ppghub_core::AuthError;

/// A single named permission granted by a role.
///
/// Capabilities form a closed set: an authorization decision can only ever
/// ask about a flag that exists here, so a typo is a compile error rather
/// than a silently-denied (or silently-granted) request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    ManageInstitution,
    ManageProgram,
    ManageUsers,
    ManageRoles,
    ManageBindings,
    ViewAnalytics,
    ViewAudit,
    ManageCourses,
    ManageEnrollments,
    RecordGrades,
    ManageTheses,
    ManageCommittees,
    ViewRecords,
}

impl Capability {
    pub const ALL: [Capability; 13] = [
        Capability::ManageInstitution,
        Capability::ManageProgram,
        Capability::ManageUsers,
        Capability::ManageRoles,
        Capability::ManageBindings,
        Capability::ViewAnalytics,
        Capability::ViewAudit,
        Capability::ManageCourses,
        Capability::ManageEnrollments,
        Capability::RecordGrades,
        Capability::ManageTheses,
        Capability::ManageCommittees,
        Capability::ViewRecords,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ManageInstitution => "manage_institution",
            Capability::ManageProgram => "manage_program",
            Capability::ManageUsers => "manage_users",
            Capability::ManageRoles => "manage_roles",
            Capability::ManageBindings => "manage_bindings",
            Capability::ViewAnalytics => "view_analytics",
            Capability::ViewAudit => "view_audit",
            Capability::ManageCourses => "manage_courses",
            Capability::ManageEnrollments => "manage_enrollments",
            Capability::RecordGrades => "record_grades",
            Capability::ManageTheses => "manage_theses",
            Capability::ManageCommittees => "manage_committees",
            Capability::ViewRecords => "view_records",
        }
    }
}

impl core::fmt::Display for Capability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for Capability {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| AuthError::invalid(format!("unknown capability '{s}'")))
    }
}

/// A set of capabilities (duplicates merged, ordered for stable output).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recognised capability.
    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    /// Merge `other` into `self` (permissions only ever accumulate).
    pub fn extend_from(&mut self, other: &CapabilitySet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn union(&self, other: &CapabilitySet) -> CapabilitySet {
        self.0.union(&other.0).copied().collect()
    }

    /// Capabilities present in `self` but missing from `other`.
    pub fn difference(&self, other: &CapabilitySet) -> CapabilitySet {
        self.0.difference(&other.0).copied().collect()
    }

    pub fn is_superset(&self, other: &CapabilitySet) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(|c| c.as_str()).collect()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Capability; N]> for CapabilitySet {
    fn from(value: [Capability; N]) -> Self {
        value.into_iter().collect()
    }
}
