//! Scope Binding Ledger service.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use ppghub_auth::audit::actions;
use ppghub_auth::{AuditEntry, BindingKey, BindingScope, BindingStatus, NewBinding, ScopeBinding};
use ppghub_core::{AuthError, AuthResult, BindingId, ProgramId, RoleId, UserId};
use ppghub_infra::store::{BindingStore, BindingUpdate, DirectoryStore, IdentityStore, RoleStore};

use crate::audit::AuditRecorder;
use crate::context::{RequestContext, Runtime};
use crate::guard::RoleGuards;

const ENTITY: &str = "binding";

/// A request to bind a user to a role in a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRequest {
    pub user_id: UserId,
    pub scope: BindingScope,
    pub role_id: RoleId,
    /// Defaults to the time of the grant.
    pub effective_from: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl GrantRequest {
    pub fn new(user_id: UserId, scope: impl Into<BindingScope>, role_id: RoleId) -> Self {
        Self {
            user_id,
            scope: scope.into(),
            role_id,
            effective_from: None,
            notes: None,
        }
    }

    pub fn effective_from(mut self, at: DateTime<Utc>) -> Self {
        self.effective_from = Some(at);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Time-bounded (user, scope, role) bindings. Nothing is ever deleted.
#[derive(Clone)]
pub struct BindingLedger {
    store: Arc<dyn BindingStore>,
    identities: Arc<dyn IdentityStore>,
    roles: Arc<dyn RoleStore>,
    directory: Arc<dyn DirectoryStore>,
    guards: RoleGuards,
    audit: AuditRecorder,
    rt: Runtime,
}

impl BindingLedger {
    pub fn new(
        store: Arc<dyn BindingStore>,
        identities: Arc<dyn IdentityStore>,
        roles: Arc<dyn RoleStore>,
        directory: Arc<dyn DirectoryStore>,
        guards: RoleGuards,
        audit: AuditRecorder,
        rt: Runtime,
    ) -> Self {
        Self {
            store,
            identities,
            roles,
            directory,
            guards,
            audit,
            rt,
        }
    }

    /// Create an `Active` binding.
    ///
    /// `NotFound` for an unknown or inactive user, an unknown role or an
    /// unregistered scope; `InvalidState` for an inactive role; `Conflict`
    /// while an open binding holds the same triple. A concurrent update of
    /// the role's capabilities finishes before or after the grant as a whole.
    pub async fn grant(&self, ctx: &RequestContext, request: GrantRequest) -> AuthResult<ScopeBinding> {
        let _guard = self
            .rt
            .io("roles.guard", async { Ok(self.guards.shared(request.role_id).await) })
            .await?;
        self.check_grantable(&request).await?;

        let now = self.rt.now();
        let new = NewBinding {
            key: BindingKey {
                user_id: request.user_id,
                scope: request.scope,
                role_id: request.role_id,
            },
            bound_at: request.effective_from.unwrap_or(now),
            granted_by: ctx.actor(),
            notes: request.notes,
        };

        let binding = self
            .rt
            .io("bindings.insert", self.store.insert_if_absent(new, now))
            .await?;

        let entry = AuditEntry::new(actions::BINDING_GRANTED, ENTITY, binding.id)
            .actor(ctx.actor())
            .client(ctx.client().clone())
            .after(&binding);
        self.audit
            .record_or_undo(entry, || async {
                self.rt
                    .io("bindings.discard", self.store.discard(binding.id))
                    .await
            })
            .await?;

        tracing::info!(
            binding_id = %binding.id,
            user_id = %binding.user_id,
            role_id = %binding.role_id,
            scope = %binding.scope,
            "binding granted"
        );
        Ok(binding)
    }

    /// End an `Active` binding at `effective_to`.
    pub async fn revoke(
        &self,
        ctx: &RequestContext,
        id: BindingId,
        effective_to: DateTime<Utc>,
    ) -> AuthResult<ScopeBinding> {
        let binding = self
            .transition(ctx, id, actions::BINDING_REVOKED, &mut |b: &mut ScopeBinding| {
                b.end(effective_to)
            })
            .await?;
        tracing::info!(binding_id = %id, user_id = %binding.user_id, "binding revoked");
        Ok(binding)
    }

    pub async fn suspend(&self, ctx: &RequestContext, id: BindingId) -> AuthResult<ScopeBinding> {
        let binding = self
            .transition(ctx, id, actions::BINDING_SUSPENDED, &mut |b: &mut ScopeBinding| {
                b.suspend()
            })
            .await?;
        tracing::info!(binding_id = %id, user_id = %binding.user_id, "binding suspended");
        Ok(binding)
    }

    pub async fn reinstate(&self, ctx: &RequestContext, id: BindingId) -> AuthResult<ScopeBinding> {
        let binding = self
            .transition(ctx, id, actions::BINDING_REINSTATED, &mut |b: &mut ScopeBinding| {
                b.reinstate()
            })
            .await?;
        tracing::info!(binding_id = %id, user_id = %binding.user_id, "binding reinstated");
        Ok(binding)
    }

    pub async fn get(&self, id: BindingId) -> AuthResult<ScopeBinding> {
        self.rt
            .io("bindings.get", self.store.get(id))
            .await?
            .ok_or_else(|| AuthError::not_found(format!("binding {id}")))
    }

    /// Bindings in force right now: `Active` with `now` inside the window.
    pub async fn active_bindings_for(&self, user_id: UserId) -> AuthResult<Vec<ScopeBinding>> {
        let now = self.rt.now();
        let mut bindings = self.history_for(user_id).await?;
        bindings.retain(|b| b.is_effective(now));
        Ok(bindings)
    }

    /// Every binding the user ever held, oldest first.
    pub async fn history_for(&self, user_id: UserId) -> AuthResult<Vec<ScopeBinding>> {
        self.rt
            .io("bindings.for_user", self.store.for_user(user_id))
            .await
    }

    /// End every `Active` binding of the user in one program.
    ///
    /// Suspended bindings are left for an explicit decision. Each revocation
    /// is audited on its own and stays in place if a later one fails; the
    /// error then reports how many of the targets were ended. Calling again
    /// resumes the sweep, since only bindings still `Active` are targeted and
    /// one ended concurrently is skipped.
    pub async fn end_program_membership(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
        program_id: ProgramId,
        at: DateTime<Utc>,
    ) -> AuthResult<Vec<ScopeBinding>> {
        let scope = BindingScope::Program(program_id);
        let targets: Vec<BindingId> = self
            .history_for(user_id)
            .await?
            .into_iter()
            .filter(|b| b.scope == scope && b.status == BindingStatus::Active)
            .map(|b| b.id)
            .collect();

        let total = targets.len();
        let mut ended = Vec::with_capacity(total);
        for id in targets {
            match self.revoke(ctx, id, at).await {
                Ok(binding) => ended.push(binding),
                Err(AuthError::InvalidState(reason)) => {
                    tracing::debug!(binding_id = %id, reason = %reason, "binding left the sweep");
                }
                Err(err) => {
                    tracing::warn!(
                        user_id = %user_id,
                        program_id = %program_id,
                        ended = ended.len(),
                        total,
                        error = %err,
                        "program membership partially ended"
                    );
                    return Err(err.context(format!("ended {} of {total} bindings", ended.len())));
                }
            }
        }
        tracing::info!(
            user_id = %user_id,
            program_id = %program_id,
            ended = ended.len(),
            "program membership ended"
        );
        Ok(ended)
    }

    pub async fn count_active_for_role(&self, role_id: RoleId) -> AuthResult<usize> {
        self.rt
            .io(
                "bindings.count_active_for_role",
                self.store.count_active_for_role(role_id),
            )
            .await
    }

    async fn check_grantable(&self, request: &GrantRequest) -> AuthResult<()> {
        let user = self
            .rt
            .io("identity.get", self.identities.get(request.user_id))
            .await?;
        if !user.is_some_and(|u| u.active) {
            return Err(AuthError::not_found(format!("active user {}", request.user_id)));
        }

        let role = self
            .rt
            .io("roles.get", self.roles.get(request.role_id))
            .await?
            .ok_or_else(|| AuthError::not_found(format!("role {}", request.role_id)))?;
        if !role.active {
            return Err(AuthError::invalid_state(format!(
                "role '{}' is inactive and cannot be granted",
                role.name
            )));
        }

        let registered = match request.scope {
            BindingScope::Program(id) => self
                .rt
                .io("directory.program", self.directory.program(id))
                .await?
                .is_some(),
            BindingScope::Institution(id) => self
                .rt
                .io("directory.institution", self.directory.institution(id))
                .await?
                .is_some(),
        };
        if !registered {
            return Err(AuthError::not_found(format!("scope {}", request.scope)));
        }
        Ok(())
    }

    async fn transition(
        &self,
        ctx: &RequestContext,
        id: BindingId,
        action: &'static str,
        update: BindingUpdate<'_>,
    ) -> AuthResult<ScopeBinding> {
        let (before, after) = self
            .rt
            .io("bindings.update", self.store.update(id, update))
            .await?;

        let entry = AuditEntry::new(action, ENTITY, id)
            .actor(ctx.actor())
            .client(ctx.client().clone())
            .before(&before)
            .and_then(|e| e.after(&after));
        self.audit
            .record_or_undo(entry, || async {
                self.rt
                    .io("bindings.restore", self.store.restore(before.clone()))
                    .await
            })
            .await?;
        Ok(after)
    }
}

impl core::fmt::Debug for BindingLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BindingLedger").finish_non_exhaustive()
    }
}
