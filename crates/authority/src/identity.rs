//! Identity Store service: users, credentials, and the lockout automaton.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use ppghub_auth::audit::actions;
use ppghub_auth::{
    AuditEntry, LockoutPolicy, NewUser, ProfileChange, User, UserSnapshot, normalize_email,
};
use ppghub_core::{AuthError, AuthResult, ExternalId, UserId};
use ppghub_infra::store::{IdentityStore, SessionStore};
use ppghub_infra::{CredentialHasher, Page, Pagination};

use crate::audit::AuditRecorder;
use crate::context::{RequestContext, Runtime};

const ENTITY: &str = "user";

/// Input for [`IdentityService::create`].
#[derive(Clone)]
pub struct Registration {
    pub email: String,
    pub full_name: String,
    pub password: String,
    /// Generated when absent.
    pub external_id: Option<ExternalId>,
    pub verified: bool,
}

impl Registration {
    pub fn new(
        email: impl Into<String>,
        full_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            full_name: full_name.into(),
            password: password.into(),
            external_id: None,
            verified: false,
        }
    }

    pub fn external_id(mut self, external_id: ExternalId) -> Self {
        self.external_id = Some(external_id);
        self
    }

    pub fn verified(mut self) -> Self {
        self.verified = true;
        self
    }
}

impl core::fmt::Debug for Registration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registration")
            .field("email", &self.email)
            .field("full_name", &self.full_name)
            .field("password", &"<redacted>")
            .field("external_id", &self.external_id)
            .field("verified", &self.verified)
            .finish()
    }
}

#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn IdentityStore>,
    sessions: Arc<dyn SessionStore>,
    hasher: Arc<CredentialHasher>,
    audit: AuditRecorder,
    rt: Runtime,
    lockout: LockoutPolicy,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionStore>,
        hasher: Arc<CredentialHasher>,
        audit: AuditRecorder,
        rt: Runtime,
        lockout: LockoutPolicy,
    ) -> Self {
        Self {
            store,
            sessions,
            hasher,
            audit,
            rt,
            lockout,
        }
    }

    pub fn lockout_policy(&self) -> &LockoutPolicy {
        &self.lockout
    }

    /// Register a new identity. `Conflict` on a taken email or external id.
    pub async fn create(
        &self,
        ctx: &RequestContext,
        registration: Registration,
    ) -> AuthResult<UserSnapshot> {
        let email = normalize_email(&registration.email)?;
        let full_name = registration.full_name.trim().to_string();
        if full_name.is_empty() {
            return Err(AuthError::invalid_state("full name must not be empty"));
        }
        if registration.password.is_empty() {
            return Err(AuthError::invalid_state("password must not be empty"));
        }

        let credential = self.hasher.hash_blocking(registration.password).await?;
        let new = NewUser {
            external_id: registration.external_id.unwrap_or_default(),
            email,
            full_name,
            credential,
            verified: registration.verified,
        };

        let user = self
            .rt
            .io("identity.insert", self.store.insert(new, self.rt.now()))
            .await?;
        let snapshot = user.snapshot();

        let entry = AuditEntry::new(actions::USER_CREATED, ENTITY, user.id)
            .actor(ctx.actor())
            .client(ctx.client().clone())
            .after(&snapshot);
        self.audit
            .record_or_undo(entry, || async {
                self.rt
                    .io("identity.discard", self.store.discard(user.id))
                    .await
            })
            .await?;

        tracing::info!(user_id = %user.id, "user registered");
        Ok(snapshot)
    }

    pub async fn get(&self, id: UserId) -> AuthResult<UserSnapshot> {
        Ok(self.load(id).await?.snapshot())
    }

    pub async fn find_by_email(&self, email: &str) -> AuthResult<UserSnapshot> {
        let email = normalize_email(email)?;
        self.rt
            .io("identity.find_by_email", self.store.find_by_email(&email))
            .await?
            .map(|u| u.snapshot())
            .ok_or_else(|| AuthError::not_found(format!("no user with email '{email}'")))
    }

    /// Users ordered by id, optionally only active (or only inactive) ones.
    pub async fn list(
        &self,
        active: Option<bool>,
        pagination: Pagination,
    ) -> AuthResult<Page<UserSnapshot>> {
        let users = self
            .rt
            .io("identity.list", self.store.list(active))
            .await?;
        Ok(pagination.apply(users).map(|u| u.snapshot()))
    }

    /// Check a password and drive the lockout automaton.
    ///
    /// `NotFound` for unknown or inactive accounts, `LockedOut` while locked,
    /// `InvalidCredentials` on mismatch. Counting and locking happen under
    /// the user's own lock, so concurrent attempts are all counted.
    pub async fn verify_credentials(&self, email: &str, password: &str) -> AuthResult<UserSnapshot> {
        let candidate = match normalize_email(email) {
            Ok(email) => {
                self.rt
                    .io("identity.find_by_email", self.store.find_by_email(&email))
                    .await?
            }
            Err(_) => None,
        };

        let user = match candidate {
            Some(user) if user.active => user,
            _ => {
                // equalise timing with the known-account path
                self.hasher.verify_blocking(password.to_string(), None).await?;
                return Err(AuthError::not_found("no active user for email"));
            }
        };

        user.ensure_can_authenticate(self.rt.now())?;

        let matched = self
            .hasher
            .verify_blocking(password.to_string(), Some(user.credential.clone()))
            .await?;

        let now = self.rt.now();
        if matched {
            let user = self
                .rt
                .io(
                    "identity.update",
                    self.store.update(user.id, &mut |u: &mut User| u.register_success(now)),
                )
                .await?;
            return Ok(user.snapshot());
        }

        let policy = self.lockout;
        let mut outcome = None;
        let updated = self
            .rt
            .io(
                "identity.update",
                self.store.update(user.id, &mut |u: &mut User| {
                    outcome = Some(u.register_failure(now, &policy)?);
                    Ok(())
                }),
            )
            .await?;

        if let Some(until) = outcome.and_then(|o| o.locked_until) {
            tracing::warn!(
                user_id = %updated.id,
                failed_attempts = updated.failed_attempts,
                locked_until = %until,
                "account locked after repeated failures"
            );
            let entry = AuditEntry::new(actions::USER_LOCKED_OUT, ENTITY, updated.id)
                .after(&updated.snapshot());
            self.audit.record_best_effort(entry).await;
        }

        Err(AuthError::InvalidCredentials)
    }

    /// Soft-delete the user and revoke every live session.
    ///
    /// Deactivating an already inactive user only re-sweeps its sessions.
    pub async fn deactivate(&self, ctx: &RequestContext, id: UserId) -> AuthResult<UserSnapshot> {
        let current = self.load(id).await?;
        let user = if current.active {
            let now = self.rt.now();
            self.mutate_audited(ctx, id, actions::USER_DEACTIVATED, move |u| u.deactivate(now))
                .await?
        } else {
            current
        };

        let revoked = self.revoke_sessions(id).await;
        tracing::info!(user_id = %id, revoked_sessions = revoked, "user deactivated");
        Ok(user.snapshot())
    }

    pub async fn reactivate(&self, ctx: &RequestContext, id: UserId) -> AuthResult<UserSnapshot> {
        let now = self.rt.now();
        let user = self
            .mutate_audited(ctx, id, actions::USER_REACTIVATED, move |u| u.reactivate(now))
            .await?;
        tracing::info!(user_id = %id, "user reactivated");
        Ok(user.snapshot())
    }

    /// Edit name and/or email. `Conflict` when the email belongs to another
    /// user; a changed email must be verified again.
    pub async fn update_profile(
        &self,
        ctx: &RequestContext,
        id: UserId,
        change: ProfileChange,
    ) -> AuthResult<UserSnapshot> {
        if change.is_empty() {
            return Err(AuthError::invalid_state("profile change has no fields"));
        }
        let now = self.rt.now();
        let (before, after) = self
            .rt
            .io(
                "identity.update_profile",
                self.store.update_profile(id, &change, now),
            )
            .await?;

        let entry = AuditEntry::new(actions::USER_PROFILE_UPDATED, ENTITY, id)
            .actor(ctx.actor())
            .client(ctx.client().clone())
            .before(&before.snapshot())
            .and_then(|e| e.after(&after.snapshot()));
        let revert = ProfileChange::default()
            .email(before.email.clone())
            .full_name(before.full_name.clone());
        self.audit
            .record_or_undo(entry, || async {
                self.rt
                    .io(
                        "identity.update_profile",
                        self.store.update_profile(id, &revert, now),
                    )
                    .await?;
                self.restore(before.clone()).await
            })
            .await?;

        tracing::info!(user_id = %id, email_changed = before.email != after.email, "profile updated");
        Ok(after.snapshot())
    }

    pub async fn mark_verified(&self, ctx: &RequestContext, id: UserId) -> AuthResult<UserSnapshot> {
        let now = self.rt.now();
        let user = self
            .mutate_audited(ctx, id, actions::USER_VERIFIED, move |u| {
                u.mark_verified(now);
                Ok(())
            })
            .await?;
        Ok(user.snapshot())
    }

    /// Replace the password, reopen a locked account, and end every session
    /// issued under the old credential.
    pub async fn reset_credentials(
        &self,
        ctx: &RequestContext,
        id: UserId,
        new_password: String,
    ) -> AuthResult<UserSnapshot> {
        if new_password.is_empty() {
            return Err(AuthError::invalid_state("password must not be empty"));
        }
        let credential = self.hasher.hash_blocking(new_password).await?;
        let now = self.rt.now();
        let user = self
            .mutate_audited(ctx, id, actions::USER_CREDENTIALS_RESET, move |u| {
                u.replace_credential(credential.clone(), now);
                Ok(())
            })
            .await?;

        let revoked = self.revoke_sessions(id).await;
        tracing::info!(user_id = %id, revoked_sessions = revoked, "credentials reset");
        Ok(user.snapshot())
    }

    /// Administrative lock until `until`; live sessions are revoked.
    pub async fn lock(
        &self,
        ctx: &RequestContext,
        id: UserId,
        until: DateTime<Utc>,
    ) -> AuthResult<UserSnapshot> {
        let now = self.rt.now();
        let user = self
            .mutate_audited(ctx, id, actions::USER_LOCKED, move |u| u.lock_until(until, now))
            .await?;

        let revoked = self.revoke_sessions(id).await;
        tracing::info!(user_id = %id, locked_until = %until, revoked_sessions = revoked, "user locked");
        Ok(user.snapshot())
    }

    pub async fn unlock(&self, ctx: &RequestContext, id: UserId) -> AuthResult<UserSnapshot> {
        let now = self.rt.now();
        let user = self
            .mutate_audited(ctx, id, actions::USER_UNLOCKED, move |u| {
                u.unlock(now);
                Ok(())
            })
            .await?;
        tracing::info!(user_id = %id, "user unlocked");
        Ok(user.snapshot())
    }

    async fn load(&self, id: UserId) -> AuthResult<User> {
        self.rt
            .io("identity.get", self.store.get(id))
            .await?
            .ok_or_else(|| AuthError::not_found(format!("user {id}")))
    }

    /// Sweep the user's live sessions.
    ///
    /// The committed change has already moved the session epoch, which the
    /// Session Authority checks on every use; a failed sweep only leaves
    /// rows to be revoked lazily.
    async fn revoke_sessions(&self, id: UserId) -> usize {
        match self
            .rt
            .io(
                "sessions.revoke_all",
                self.sessions.revoke_all(id, self.rt.now()),
            )
            .await
        {
            Ok(revoked) => revoked.len(),
            Err(err) => {
                tracing::warn!(user_id = %id, error = %err, "session sweep failed");
                0
            }
        }
    }

    /// Apply `mutation`, then audit it; the prior state is put back when the
    /// audit write fails.
    async fn mutate_audited<M>(
        &self,
        ctx: &RequestContext,
        id: UserId,
        action: &'static str,
        mut mutation: M,
    ) -> AuthResult<User>
    where
        M: FnMut(&mut User) -> AuthResult<()> + Send,
    {
        let mut before: Option<User> = None;
        let after = self
            .rt
            .io(
                "identity.update",
                self.store.update(id, &mut |u: &mut User| {
                    before = Some(u.clone());
                    mutation(u)
                }),
            )
            .await?;
        let before = before.ok_or_else(|| AuthError::unavailable("identity store skipped mutation"))?;

        let entry = AuditEntry::new(action, ENTITY, id)
            .actor(ctx.actor())
            .client(ctx.client().clone())
            .before(&before.snapshot())
            .and_then(|e| e.after(&after.snapshot()));
        self.audit
            .record_or_undo(entry, || self.restore(before))
            .await?;
        Ok(after)
    }

    async fn restore(&self, previous: User) -> AuthResult<()> {
        let id = previous.id;
        self.rt
            .io(
                "identity.restore",
                self.store.update(id, &mut |u: &mut User| {
                    *u = previous.clone();
                    Ok(())
                }),
            )
            .await
            .map(|_| ())
    }
}

impl core::fmt::Debug for IdentityService {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdentityService")
            .field("lockout", &self.lockout)
            .finish_non_exhaustive()
    }
}
