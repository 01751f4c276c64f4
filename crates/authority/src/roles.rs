//! Role Catalog service.

use std::sync::Arc;

use ppghub_auth::audit::actions;
use ppghub_auth::{AuditEntry, CapabilitySet, Role, RoleDefinition, RoleName};
use ppghub_core::{AuthError, AuthResult, RoleId};
use ppghub_infra::store::{BindingStore, RoleStore};
use ppghub_infra::{Page, Pagination};

use crate::audit::AuditRecorder;
use crate::context::{RequestContext, Runtime};
use crate::guard::RoleGuards;

const ENTITY: &str = "role";

/// Read-mostly catalog of roles and their capability sets.
#[derive(Clone)]
pub struct RoleCatalog {
    store: Arc<dyn RoleStore>,
    bindings: Arc<dyn BindingStore>,
    guards: RoleGuards,
    audit: AuditRecorder,
    rt: Runtime,
}

impl RoleCatalog {
    pub fn new(
        store: Arc<dyn RoleStore>,
        bindings: Arc<dyn BindingStore>,
        guards: RoleGuards,
        audit: AuditRecorder,
        rt: Runtime,
    ) -> Self {
        Self {
            store,
            bindings,
            guards,
            audit,
            rt,
        }
    }

    /// Insert every definition whose name is not in the catalog yet.
    ///
    /// Existing roles are left as they are. Returns how many were added.
    pub async fn seed(&self, definitions: Vec<RoleDefinition>) -> AuthResult<usize> {
        let ctx = RequestContext::system();
        let mut added = 0;
        for def in definitions {
            def.validate()?;
            if self.find(&def.name).await?.is_some() {
                continue;
            }
            self.insert(&ctx, def).await?;
            added += 1;
        }
        if added > 0 {
            tracing::info!(added, "role catalog seeded");
        }
        Ok(added)
    }

    /// Effective capabilities of the named role (empty while inactive).
    pub async fn capabilities_of(&self, name: &str) -> AuthResult<CapabilitySet> {
        Ok(self.get_by_name(name).await?.effective_capabilities())
    }

    pub async fn get(&self, id: RoleId) -> AuthResult<Role> {
        self.rt
            .io("roles.get", self.store.get(id))
            .await?
            .ok_or_else(|| AuthError::not_found(format!("role {id}")))
    }

    pub async fn get_by_name(&self, name: &str) -> AuthResult<Role> {
        self.find(&RoleName::from(name.to_string()))
            .await?
            .ok_or_else(|| AuthError::not_found(format!("role '{name}'")))
    }

    /// Roles ranked by access level, most privileged first.
    pub async fn list(&self, pagination: Pagination) -> AuthResult<Page<Role>> {
        let roles = self.rt.io("roles.list", self.store.list()).await?;
        Ok(pagination.apply(roles))
    }

    /// Create or update a role by name.
    ///
    /// An update that takes capabilities away from a role still held by
    /// active bindings (including deactivating it) fails with `InvalidState`
    /// unless `confirm_removal` is set. Grants of the role wait until the
    /// update is done.
    pub async fn upsert_role(
        &self,
        ctx: &RequestContext,
        def: RoleDefinition,
        confirm_removal: bool,
    ) -> AuthResult<Role> {
        def.validate()?;

        let Some(existing) = self.find(&def.name).await? else {
            return self.insert(ctx, def).await;
        };

        let _guard = self
            .rt
            .io("roles.guard", async { Ok(self.guards.exclusive(existing.id).await) })
            .await?;
        let current = self.get(existing.id).await?;

        let now = self.rt.now();
        let next = current.updated(def, now);
        let removed = current
            .effective_capabilities()
            .difference(&next.effective_capabilities());

        if !removed.is_empty() {
            let holders = self
                .rt
                .io(
                    "bindings.count_active_for_role",
                    self.bindings.count_active_for_role(current.id),
                )
                .await?;
            if holders > 0 && !confirm_removal {
                return Err(AuthError::invalid_state(format!(
                    "role '{}' is held by {holders} active binding(s); removing [{}] requires confirmation",
                    current.name,
                    removed.names().join(", ")
                )));
            }
            if holders > 0 {
                tracing::warn!(
                    role_id = %current.id,
                    holders,
                    removed = ?removed.names(),
                    "capabilities removed from a role in use"
                );
            }
        }

        self.rt
            .io("roles.replace", self.store.replace(next.clone()))
            .await?;

        let entry = AuditEntry::new(actions::ROLE_UPDATED, ENTITY, current.id)
            .actor(ctx.actor())
            .client(ctx.client().clone())
            .before(&current)
            .and_then(|e| e.after(&next));
        self.audit
            .record_or_undo(entry, || async {
                self.rt
                    .io("roles.replace", self.store.replace(current.clone()))
                    .await
            })
            .await?;

        tracing::info!(role_id = %next.id, role = %next.name, active = next.active, "role updated");
        Ok(next)
    }

    async fn find(&self, name: &RoleName) -> AuthResult<Option<Role>> {
        self.rt
            .io("roles.get_by_name", self.store.get_by_name(name))
            .await
    }

    async fn insert(&self, ctx: &RequestContext, def: RoleDefinition) -> AuthResult<Role> {
        let role = self
            .rt
            .io("roles.insert", self.store.insert(def, self.rt.now()))
            .await?;

        let entry = AuditEntry::new(actions::ROLE_CREATED, ENTITY, role.id)
            .actor(ctx.actor())
            .client(ctx.client().clone())
            .after(&role);
        self.audit
            .record_or_undo(entry, || async {
                self.rt.io("roles.discard", self.store.discard(role.id)).await
            })
            .await?;

        tracing::info!(role_id = %role.id, role = %role.name, "role created");
        Ok(role)
    }
}

impl core::fmt::Debug for RoleCatalog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RoleCatalog").finish_non_exhaustive()
    }
}
