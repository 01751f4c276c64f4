use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ppghub_auth::{Institution, Program};
use ppghub_core::{AuthError, AuthResult, InstitutionId, ProgramId};

use super::poisoned;

/// Institutions and their programs.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// `Conflict` when the acronym is taken.
    async fn insert_institution(
        &self,
        name: String,
        acronym: String,
        at: DateTime<Utc>,
    ) -> AuthResult<Institution>;

    /// `NotFound` for an unknown institution; `Conflict` when the acronym is
    /// taken within the institution.
    async fn insert_program(
        &self,
        institution_id: InstitutionId,
        acronym: String,
        name: String,
        at: DateTime<Utc>,
    ) -> AuthResult<Program>;

    async fn institution(&self, id: InstitutionId) -> AuthResult<Option<Institution>>;

    async fn program(&self, id: ProgramId) -> AuthResult<Option<Program>>;

    async fn programs_of(&self, institution_id: InstitutionId) -> AuthResult<Vec<Program>>;

    /// Snapshot of program → owning institution.
    async fn program_owners(&self) -> AuthResult<HashMap<ProgramId, InstitutionId>>;

    async fn discard_institution(&self, id: InstitutionId) -> AuthResult<()>;

    async fn discard_program(&self, id: ProgramId) -> AuthResult<()>;
}

#[derive(Debug, Default)]
struct Directory {
    institutions: BTreeMap<InstitutionId, Institution>,
    programs: BTreeMap<ProgramId, Program>,
    next_institution: u64,
    next_program: u64,
}

/// In-memory directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    inner: RwLock<Directory>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

fn same_acronym(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

#[async_trait]
impl DirectoryStore for InMemoryDirectory {
    async fn insert_institution(
        &self,
        name: String,
        acronym: String,
        at: DateTime<Utc>,
    ) -> AuthResult<Institution> {
        let mut dir = self.inner.write().map_err(|_| poisoned())?;
        if dir.institutions.values().any(|i| same_acronym(&i.acronym, &acronym)) {
            return Err(AuthError::conflict(format!("institution '{acronym}' already exists")));
        }
        dir.next_institution += 1;
        let institution = Institution {
            id: InstitutionId::new(dir.next_institution),
            name,
            acronym,
            created_at: at,
        };
        dir.institutions.insert(institution.id, institution.clone());
        Ok(institution)
    }

    async fn insert_program(
        &self,
        institution_id: InstitutionId,
        acronym: String,
        name: String,
        at: DateTime<Utc>,
    ) -> AuthResult<Program> {
        let mut dir = self.inner.write().map_err(|_| poisoned())?;
        if !dir.institutions.contains_key(&institution_id) {
            return Err(AuthError::not_found(format!("institution {institution_id}")));
        }
        if dir
            .programs
            .values()
            .any(|p| p.institution_id == institution_id && same_acronym(&p.acronym, &acronym))
        {
            return Err(AuthError::conflict(format!(
                "program '{acronym}' already exists in institution {institution_id}"
            )));
        }
        dir.next_program += 1;
        let program = Program {
            id: ProgramId::new(dir.next_program),
            institution_id,
            acronym,
            name,
            created_at: at,
        };
        dir.programs.insert(program.id, program.clone());
        Ok(program)
    }

    async fn institution(&self, id: InstitutionId) -> AuthResult<Option<Institution>> {
        let dir = self.inner.read().map_err(|_| poisoned())?;
        Ok(dir.institutions.get(&id).cloned())
    }

    async fn program(&self, id: ProgramId) -> AuthResult<Option<Program>> {
        let dir = self.inner.read().map_err(|_| poisoned())?;
        Ok(dir.programs.get(&id).cloned())
    }

    async fn programs_of(&self, institution_id: InstitutionId) -> AuthResult<Vec<Program>> {
        let dir = self.inner.read().map_err(|_| poisoned())?;
        Ok(dir
            .programs
            .values()
            .filter(|p| p.institution_id == institution_id)
            .cloned()
            .collect())
    }

    async fn program_owners(&self) -> AuthResult<HashMap<ProgramId, InstitutionId>> {
        let dir = self.inner.read().map_err(|_| poisoned())?;
        Ok(dir
            .programs
            .values()
            .map(|p| (p.id, p.institution_id))
            .collect())
    }

    async fn discard_institution(&self, id: InstitutionId) -> AuthResult<()> {
        let mut dir = self.inner.write().map_err(|_| poisoned())?;
        if dir.programs.values().any(|p| p.institution_id == id) {
            return Err(AuthError::invalid_state(format!("institution {id} still has programs")));
        }
        dir.institutions.remove(&id);
        Ok(())
    }

    async fn discard_program(&self, id: ProgramId) -> AuthResult<()> {
        let mut dir = self.inner.write().map_err(|_| poisoned())?;
        dir.programs.remove(&id);
        Ok(())
    }
}
