//! Institutions and their programs: the scopes bindings refer to.

use std::sync::Arc;

use ppghub_auth::audit::actions;
use ppghub_auth::{AuditEntry, Institution, Program};
use ppghub_core::{AuthError, AuthResult, InstitutionId, ProgramId};
use ppghub_infra::store::DirectoryStore;

use crate::audit::AuditRecorder;
use crate::context::{RequestContext, Runtime};

#[derive(Clone)]
pub struct ProgramDirectory {
    store: Arc<dyn DirectoryStore>,
    audit: AuditRecorder,
    rt: Runtime,
}

impl ProgramDirectory {
    pub fn new(store: Arc<dyn DirectoryStore>, audit: AuditRecorder, rt: Runtime) -> Self {
        Self { store, audit, rt }
    }

    /// `Conflict` when the acronym is already registered.
    pub async fn register_institution(
        &self,
        ctx: &RequestContext,
        name: impl Into<String>,
        acronym: impl Into<String>,
    ) -> AuthResult<Institution> {
        let (name, acronym) = (required("name", name)?, required("acronym", acronym)?);
        let institution = self
            .rt
            .io(
                "directory.insert_institution",
                self.store.insert_institution(name, acronym, self.rt.now()),
            )
            .await?;

        let entry = AuditEntry::new(actions::INSTITUTION_REGISTERED, "institution", institution.id)
            .actor(ctx.actor())
            .client(ctx.client().clone())
            .after(&institution);
        self.audit
            .record_or_undo(entry, || async {
                self.rt
                    .io(
                        "directory.discard_institution",
                        self.store.discard_institution(institution.id),
                    )
                    .await
            })
            .await?;

        tracing::info!(institution_id = %institution.id, acronym = %institution.acronym, "institution registered");
        Ok(institution)
    }

    /// `NotFound` for an unknown institution, `Conflict` for a taken acronym.
    pub async fn register_program(
        &self,
        ctx: &RequestContext,
        institution_id: InstitutionId,
        acronym: impl Into<String>,
        name: impl Into<String>,
    ) -> AuthResult<Program> {
        let (acronym, name) = (required("acronym", acronym)?, required("name", name)?);
        let program = self
            .rt
            .io(
                "directory.insert_program",
                self.store
                    .insert_program(institution_id, acronym, name, self.rt.now()),
            )
            .await?;

        let entry = AuditEntry::new(actions::PROGRAM_REGISTERED, "program", program.id)
            .actor(ctx.actor())
            .client(ctx.client().clone())
            .after(&program);
        self.audit
            .record_or_undo(entry, || async {
                self.rt
                    .io("directory.discard_program", self.store.discard_program(program.id))
                    .await
            })
            .await?;

        tracing::info!(
            program_id = %program.id,
            institution_id = %institution_id,
            acronym = %program.acronym,
            "program registered"
        );
        Ok(program)
    }

    pub async fn institution(&self, id: InstitutionId) -> AuthResult<Institution> {
        self.rt
            .io("directory.institution", self.store.institution(id))
            .await?
            .ok_or_else(|| AuthError::not_found(format!("institution {id}")))
    }

    pub async fn program(&self, id: ProgramId) -> AuthResult<Program> {
        self.rt
            .io("directory.program", self.store.program(id))
            .await?
            .ok_or_else(|| AuthError::not_found(format!("program {id}")))
    }

    pub async fn institution_of(&self, program_id: ProgramId) -> AuthResult<InstitutionId> {
        Ok(self.program(program_id).await?.institution_id)
    }

    pub async fn programs_of(&self, institution_id: InstitutionId) -> AuthResult<Vec<Program>> {
        self.institution(institution_id).await?;
        self.rt
            .io("directory.programs_of", self.store.programs_of(institution_id))
            .await
    }
}

impl core::fmt::Debug for ProgramDirectory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProgramDirectory").finish_non_exhaustive()
    }
}

fn required(field: &str, value: impl Into<String>) -> AuthResult<String> {
    let value = value.into().trim().to_string();
    if value.is_empty() {
        return Err(AuthError::invalid_state(format!("{field} must not be empty")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ppghub_core::SystemClock;
    use ppghub_infra::store::{InMemoryAuditLog, InMemoryDirectory};

    use super::*;

    fn directory(audit_capacity: Option<usize>) -> ProgramDirectory {
        let rt = Runtime::new(Arc::new(SystemClock), Duration::from_secs(5));
        let log = match audit_capacity {
            Some(cap) => InMemoryAuditLog::with_capacity_limit(cap),
            None => InMemoryAuditLog::new(),
        };
        ProgramDirectory::new(
            Arc::new(InMemoryDirectory::new()),
            AuditRecorder::new(Arc::new(log), rt.clone()),
            rt,
        )
    }

    #[tokio::test]
    async fn programs_belong_to_their_institution() {
        let dir = directory(None);
        let ctx = RequestContext::system();
        let ufx = dir.register_institution(&ctx, "Universidade Federal X", "UFX").await.unwrap();
        let ppgcc = dir.register_program(&ctx, ufx.id, "PPGCC", "Computação").await.unwrap();
        dir.register_program(&ctx, ufx.id, "PPGEE", "Engenharia Elétrica").await.unwrap();

        assert_eq!(dir.institution_of(ppgcc.id).await.unwrap(), ufx.id);
        assert_eq!(dir.programs_of(ufx.id).await.unwrap().len(), 2);
        assert!(matches!(
            dir.programs_of(InstitutionId::new(99)).await,
            Err(AuthError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn audit_failure_rolls_back_registration() {
        let dir = directory(Some(1));
        let ctx = RequestContext::system();
        let ufx = dir.register_institution(&ctx, "UFX", "UFX").await.unwrap();

        let err = dir.register_program(&ctx, ufx.id, "PPGCC", "Computação").await.unwrap_err();
        assert!(matches!(err, AuthError::Unavailable(_)));
        assert!(dir.programs_of(ufx.id).await.unwrap().is_empty());
    }
}
