//! Authorization Resolver service.
//!
//! Reads are snapshots taken without locking; a grant or revoke completing
//! concurrently may or may not be visible to a resolution already running.
//! Nothing is cached between calls.

use std::collections::HashMap;
use std::sync::Arc;

use ppghub_auth::{
    AccessLevel, AuthorizationExplanation, AuthzError, Capability, CapabilitySet,
    RequiresCapability, Resolution, ResolutionPolicy, Role, Scope, resolve,
};
use ppghub_core::{AuthResult, RoleId, UserId};
use ppghub_infra::store::{BindingStore, DirectoryStore, RoleStore};

use crate::context::Runtime;

#[derive(Clone)]
pub struct AuthorizationResolver {
    bindings: Arc<dyn BindingStore>,
    roles: Arc<dyn RoleStore>,
    directory: Arc<dyn DirectoryStore>,
    policy: ResolutionPolicy,
    rt: Runtime,
}

impl AuthorizationResolver {
    pub fn new(
        bindings: Arc<dyn BindingStore>,
        roles: Arc<dyn RoleStore>,
        directory: Arc<dyn DirectoryStore>,
        policy: ResolutionPolicy,
        rt: Runtime,
    ) -> Self {
        Self {
            bindings,
            roles,
            directory,
            policy,
            rt,
        }
    }

    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    /// Full resolution with the bindings that contributed to it.
    pub async fn resolution(&self, user_id: UserId, scope: Scope) -> AuthResult<Resolution> {
        let bindings = self
            .rt
            .io("bindings.for_user", self.bindings.for_user(user_id))
            .await?;
        let roles: HashMap<RoleId, Role> = self
            .rt
            .io("roles.list", self.roles.list())
            .await?
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        let owners = self
            .rt
            .io("directory.program_owners", self.directory.program_owners())
            .await?;

        let resolution = resolve(
            user_id,
            &bindings,
            scope,
            self.rt.now(),
            &self.policy,
            |id| roles.get(&id),
            |program| owners.get(&program).copied(),
        );
        tracing::trace!(
            user_id = %user_id,
            scope = %scope,
            matched = resolution.contributions.len(),
            "capabilities resolved"
        );
        Ok(resolution)
    }

    /// Union of the capabilities of every binding in force for `scope`.
    pub async fn resolve(&self, user_id: UserId, scope: Scope) -> AuthResult<CapabilitySet> {
        Ok(self.resolution(user_id, scope).await?.capabilities)
    }

    pub async fn has_capability(
        &self,
        user_id: UserId,
        scope: Scope,
        capability: Capability,
    ) -> AuthResult<bool> {
        Ok(self.resolution(user_id, scope).await?.has(capability))
    }

    pub async fn explain(
        &self,
        user_id: UserId,
        scope: Scope,
        capability: Capability,
    ) -> AuthResult<AuthorizationExplanation> {
        Ok(self.resolution(user_id, scope).await?.explain(capability))
    }

    /// Advisory rank of the most privileged matching role.
    ///
    /// Never a substitute for a capability check.
    pub async fn highest_access_level(
        &self,
        user_id: UserId,
        scope: Scope,
    ) -> AuthResult<Option<AccessLevel>> {
        Ok(self.resolution(user_id, scope).await?.highest_access_level())
    }

    /// Check every capability `action` requires.
    pub async fn authorize_action<A>(
        &self,
        user_id: UserId,
        scope: Scope,
        action: &A,
    ) -> Result<(), AuthzError>
    where
        A: RequiresCapability + ?Sized,
    {
        let resolution = self.resolution(user_id, scope).await?;
        let outcome = resolution.require(action);
        if let Err(AuthzError::Forbidden { capability, .. }) = &outcome {
            tracing::debug!(user_id = %user_id, scope = %scope, capability = %capability, "action forbidden");
        }
        outcome
    }
}

impl core::fmt::Debug for AuthorizationResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuthorizationResolver")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
