//! Session Authority: login, rotation, validation and revocation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;

use ppghub_auth::audit::actions;
use ppghub_auth::{AuditEntry, Session, SessionPolicy};
use ppghub_core::{AuthError, AuthResult, ClientMeta, SessionId, UserId};
use ppghub_infra::store::{Rotation, SessionStore};
use ppghub_infra::{TokenPair, hash_token};

use crate::audit::AuditRecorder;
use crate::context::{RequestContext, Runtime};
use crate::identity::IdentityService;

const ENTITY: &str = "session";

/// What a successful login or refresh hands back to the caller.
///
/// The raw tokens exist only here; the store keeps their hashes.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub tokens: TokenPair,
    pub expires_at: DateTime<Utc>,
}

impl IssuedSession {
    fn new(session: &Session, tokens: TokenPair) -> Self {
        Self {
            session_id: session.id,
            user_id: session.user_id,
            tokens,
            expires_at: session.expires_at,
        }
    }

    pub fn access_token(&self) -> &str {
        self.tokens.access.expose()
    }

    pub fn refresh_token(&self) -> &str {
        self.tokens.refresh.expose()
    }
}

#[derive(Clone)]
pub struct SessionAuthority {
    sessions: Arc<dyn SessionStore>,
    identity: IdentityService,
    audit: AuditRecorder,
    rt: Runtime,
    policy: SessionPolicy,
}

impl SessionAuthority {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        identity: IdentityService,
        audit: AuditRecorder,
        rt: Runtime,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            sessions,
            identity,
            audit,
            rt,
            policy,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Check credentials and issue a session.
    ///
    /// Unknown accounts and wrong passwords both surface as
    /// `InvalidCredentials`; only the logs tell them apart.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: ClientMeta,
    ) -> AuthResult<IssuedSession> {
        let user = match self.identity.verify_credentials(email, password).await {
            Ok(user) => user,
            Err(AuthError::NotFound(reason)) => {
                tracing::debug!(reason = %reason, "login rejected: no active account");
                return Err(AuthError::InvalidCredentials);
            }
            Err(AuthError::InvalidCredentials) => {
                tracing::debug!("login rejected: credential mismatch");
                return Err(AuthError::InvalidCredentials);
            }
            Err(err) => return Err(err),
        };

        let tokens = TokenPair::generate();
        let session = Session::issue(
            user.id,
            user.session_epoch,
            tokens.access.hash(),
            tokens.refresh.hash(),
            client.clone(),
            self.rt.now(),
            &self.policy,
        );
        self.rt
            .io("sessions.insert", self.sessions.insert(session.clone()))
            .await?;

        tracing::info!(user_id = %user.id, session_id = %session.id, "session issued");
        self.audit
            .record_best_effort(
                auth_entry(actions::SESSION_LOGIN, session.id, user.id, &client).after(&session),
            )
            .await;

        Ok(IssuedSession::new(&session, tokens))
    }

    /// Rotate to a fresh token pair.
    ///
    /// `NotFound` for a never-issued refresh token, `Expired` past the
    /// session's expiry, `Invalid` for revoked sessions and for sessions
    /// whose owner was deactivated, locked or reset since login. Presenting
    /// a refresh token that was already consumed revokes the whole session.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<IssuedSession> {
        let presented = hash_token(refresh_token);
        let next = TokenPair::generate();

        let rotation = self
            .rt
            .io(
                "sessions.rotate",
                self.sessions.rotate(
                    &presented,
                    next.access.hash(),
                    next.refresh.hash(),
                    self.rt.now(),
                    &self.policy,
                ),
            )
            .await?;

        match rotation {
            Rotation::Rotated(session) => {
                self.ensure_honoured(&session).await?;
                tracing::info!(
                    user_id = %session.user_id,
                    session_id = %session.id,
                    rotations = session.rotations,
                    "session refreshed"
                );
                self.audit
                    .record_best_effort(
                        auth_entry(actions::SESSION_REFRESHED, session.id, session.user_id, &session.client)
                            .after(&session),
                    )
                    .await;
                Ok(IssuedSession::new(&session, next))
            }
            Rotation::Replayed(session) => {
                tracing::warn!(
                    user_id = %session.user_id,
                    session_id = %session.id,
                    "consumed refresh token presented again; session revoked"
                );
                self.audit
                    .record_best_effort(
                        auth_entry(actions::SESSION_REPLAY_DETECTED, session.id, session.user_id, &session.client)
                            .after(&session),
                    )
                    .await;
                Err(AuthError::invalid("refresh token already used"))
            }
        }
    }

    /// The user bound to a live access token.
    ///
    /// A session found past its expiry is moved to `Expired` and reported
    /// as such on this and every later call. The owner's account is checked
    /// on every call, so a session that escaped a revocation sweep is still
    /// refused.
    pub async fn validate(&self, access_token: &str) -> AuthResult<UserId> {
        let session = self
            .rt
            .io(
                "sessions.touch",
                self.sessions.touch(&hash_token(access_token), self.rt.now()),
            )
            .await
            .inspect_err(|err| tracing::debug!(kind = err.kind(), "token rejected"))?;
        self.ensure_honoured(&session).await?;
        Ok(session.user_id)
    }

    /// End the session behind `access_token`. Repeating it is a no-op.
    pub async fn logout(&self, access_token: &str) -> AuthResult<()> {
        let (session, changed) = self
            .rt
            .io(
                "sessions.logout",
                self.sessions.logout(&hash_token(access_token), self.rt.now()),
            )
            .await?;

        if changed {
            tracing::info!(user_id = %session.user_id, session_id = %session.id, "session logged out");
            self.audit
                .record_best_effort(
                    auth_entry(actions::SESSION_LOGOUT, session.id, session.user_id, &session.client)
                        .after(&session),
                )
                .await;
        }
        Ok(())
    }

    /// Administrative revocation of one session.
    ///
    /// The audit record is written first; revocation cannot be undone, so a
    /// failed audit write leaves the session untouched.
    pub async fn revoke(&self, ctx: &RequestContext, session_id: SessionId) -> AuthResult<Session> {
        let session = self
            .rt
            .io("sessions.get", self.sessions.get(session_id))
            .await?
            .ok_or_else(|| AuthError::not_found(format!("session {session_id}")))?;
        if !session.is_live() {
            return Ok(session);
        }

        let entry = AuditEntry::new(actions::SESSION_REVOKED, ENTITY, session_id)
            .actor(ctx.actor())
            .client(ctx.client().clone())
            .before(&session)?;
        self.audit.record(entry).await?;

        let (session, _) = self
            .rt
            .io("sessions.revoke", self.sessions.revoke(session_id, self.rt.now()))
            .await?;
        tracing::info!(user_id = %session.user_id, session_id = %session_id, "session revoked");
        Ok(session)
    }

    /// Force logout: revoke every live session of the user.
    pub async fn revoke_all(&self, ctx: &RequestContext, user_id: UserId) -> AuthResult<usize> {
        let entry = AuditEntry::new(actions::SESSION_REVOKED, "user", user_id)
            .actor(ctx.actor())
            .client(ctx.client().clone())
            .after(&json!({ "sessions": "all" }))?;
        self.audit.record(entry).await?;

        let revoked = self
            .rt
            .io("sessions.revoke_all", self.sessions.revoke_all(user_id, self.rt.now()))
            .await?;
        tracing::info!(user_id = %user_id, revoked = revoked.len(), "all sessions revoked");
        Ok(revoked.len())
    }

    /// Sessions of the user that are neither terminal nor past expiry.
    pub async fn sessions_of(&self, user_id: UserId) -> AuthResult<Vec<Session>> {
        let now = self.rt.now();
        let mut sessions = self
            .rt
            .io("sessions.for_user", self.sessions.for_user(user_id))
            .await?;
        sessions.retain(|s| s.is_live() && now < s.expires_at);
        Ok(sessions)
    }

    /// Refuse, and revoke, a session its owner's account no longer honours.
    async fn ensure_honoured(&self, session: &Session) -> AuthResult<()> {
        let honoured = match self.identity.get(session.user_id).await {
            Ok(owner) => owner.honours(session.user_epoch),
            Err(AuthError::NotFound(_)) => false,
            Err(err) => return Err(err),
        };
        if honoured {
            return Ok(());
        }

        let now = self.rt.now();
        match self
            .rt
            .io("sessions.revoke", self.sessions.revoke(session.id, now))
            .await
        {
            Ok((revoked, true)) => {
                tracing::info!(
                    user_id = %session.user_id,
                    session_id = %session.id,
                    "session outlived its account state; revoked"
                );
                self.audit
                    .record_best_effort(
                        AuditEntry::new(actions::SESSION_REVOKED, ENTITY, session.id).after(&revoked),
                    )
                    .await;
            }
            Ok((_, false)) => {}
            Err(err) => {
                tracing::warn!(session_id = %session.id, error = %err, "stale session not revoked");
            }
        }
        Err(AuthError::invalid("session no longer honoured for this account"))
    }
}

impl core::fmt::Debug for SessionAuthority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionAuthority")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn auth_entry(
    action: &'static str,
    session_id: SessionId,
    actor: UserId,
    client: &ClientMeta,
) -> AuditEntry {
    AuditEntry::new(action, ENTITY, session_id)
        .actor(Some(actor))
        .client(client.clone())
}
