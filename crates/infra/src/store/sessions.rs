use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use ppghub_auth::{Session, SessionPolicy, TokenHash};
use ppghub_core::{AuthError, AuthResult, SessionId, UserId};

/// Outcome of presenting a refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rotation {
    /// The token was current; the session now carries the new pair.
    Rotated(Session),
    /// The token had already been consumed; the session has been revoked.
    Replayed(Session),
}

/// The session table.
///
/// Tokens are addressed by hash only. Every hash ever issued stays mapped
/// to its session, so a superseded access token or a consumed refresh token
/// is recognised (and rejected) rather than looking unknown.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: Session) -> AuthResult<()>;

    async fn get(&self, id: SessionId) -> AuthResult<Option<Session>>;

    /// Resolve an access token and move its session along at `now`.
    ///
    /// `Invalid` for unknown or superseded tokens and terminal sessions;
    /// `Expired` (persisted) once past expiry.
    async fn touch(&self, token: &TokenHash, now: DateTime<Utc>) -> AuthResult<Session>;

    /// Swap the session's token pair if `presented` is its current refresh
    /// token, as one atomic step. `NotFound` for a never-issued token.
    async fn rotate(
        &self,
        presented: &TokenHash,
        next_access: TokenHash,
        next_refresh: TokenHash,
        now: DateTime<Utc>,
        policy: &SessionPolicy,
    ) -> AuthResult<Rotation>;

    /// End the session behind an access token; `bool` is false when it was
    /// already terminal.
    async fn logout(&self, token: &TokenHash, now: DateTime<Utc>) -> AuthResult<(Session, bool)>;

    async fn revoke(&self, id: SessionId, now: DateTime<Utc>) -> AuthResult<(Session, bool)>;

    /// Revoke every live session of the user; returns the ones that changed.
    async fn revoke_all(&self, user_id: UserId, now: DateTime<Utc>) -> AuthResult<Vec<Session>>;

    /// Every session of the user, oldest first.
    async fn for_user(&self, user_id: UserId) -> AuthResult<Vec<Session>>;
}

/// In-memory session store for tests/dev.
///
/// A session's map entry is its lock: validation, rotation and revocation
/// of one session are serialized, different sessions never contend.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, Session>,
    token_owners: DashMap<TokenHash, SessionId>,
    refresh_owners: DashMap<TokenHash, SessionId>,
    by_user: DashMap<UserId, Vec<SessionId>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn owner(index: &DashMap<TokenHash, SessionId>, hash: &TokenHash) -> Option<SessionId> {
        index.get(hash).map(|r| *r.value())
    }

    fn claim(index: &DashMap<TokenHash, SessionId>, hash: TokenHash, id: SessionId) -> AuthResult<()> {
        match index.entry(hash) {
            Entry::Occupied(_) => Err(AuthError::conflict("token hash already issued")),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(())
            }
        }
    }

    fn with_session<T>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut Session) -> AuthResult<T>,
    ) -> AuthResult<T> {
        let mut entry = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| AuthError::not_found(format!("session {id}")))?;
        f(entry.value_mut())
    }

    fn current_by_token<T>(
        &self,
        token: &TokenHash,
        f: impl FnOnce(&mut Session) -> AuthResult<T>,
    ) -> AuthResult<T> {
        let id = Self::owner(&self.token_owners, token)
            .ok_or_else(|| AuthError::invalid("unknown token"))?;
        self.with_session(id, |session| {
            if session.token_hash.as_ref() != Some(token) {
                return Err(AuthError::invalid("token superseded by refresh"));
            }
            f(session)
        })
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: Session) -> AuthResult<()> {
        let (Some(access), Some(refresh)) = (session.token_hash.clone(), session.refresh_hash.clone())
        else {
            return Err(AuthError::invalid_state("session issued without tokens"));
        };
        let id = session.id;
        let user_id = session.user_id;

        match self.sessions.entry(id) {
            Entry::Occupied(_) => return Err(AuthError::conflict(format!("session {id} exists"))),
            Entry::Vacant(slot) => {
                slot.insert(session);
            }
        }
        Self::claim(&self.token_owners, access, id)?;
        Self::claim(&self.refresh_owners, refresh, id)?;
        self.by_user.entry(user_id).or_default().push(id);
        Ok(())
    }

    async fn get(&self, id: SessionId) -> AuthResult<Option<Session>> {
        Ok(self.sessions.get(&id).map(|s| s.value().clone()))
    }

    async fn touch(&self, token: &TokenHash, now: DateTime<Utc>) -> AuthResult<Session> {
        self.current_by_token(token, |session| {
            session.touch(now)?;
            Ok(session.clone())
        })
    }

    async fn rotate(
        &self,
        presented: &TokenHash,
        next_access: TokenHash,
        next_refresh: TokenHash,
        now: DateTime<Utc>,
        policy: &SessionPolicy,
    ) -> AuthResult<Rotation> {
        let id = Self::owner(&self.refresh_owners, presented)
            .ok_or_else(|| AuthError::not_found("unknown refresh token"))?;

        self.with_session(id, |session| {
            if session.refresh_hash.as_ref() != Some(presented) {
                session.revoke(now);
                return Ok(Rotation::Replayed(session.clone()));
            }

            session.rotate(next_access.clone(), next_refresh.clone(), now, policy)?;
            Self::claim(&self.token_owners, next_access, id)?;
            Self::claim(&self.refresh_owners, next_refresh, id)?;
            Ok(Rotation::Rotated(session.clone()))
        })
    }

    async fn logout(&self, token: &TokenHash, now: DateTime<Utc>) -> AuthResult<(Session, bool)> {
        self.current_by_token(token, |session| {
            let changed = session.logout(now);
            Ok((session.clone(), changed))
        })
    }

    async fn revoke(&self, id: SessionId, now: DateTime<Utc>) -> AuthResult<(Session, bool)> {
        self.with_session(id, |session| {
            let changed = session.revoke(now);
            Ok((session.clone(), changed))
        })
    }

    async fn revoke_all(&self, user_id: UserId, now: DateTime<Utc>) -> AuthResult<Vec<Session>> {
        let ids = self
            .by_user
            .get(&user_id)
            .map(|r| r.value().clone())
            .unwrap_or_default();

        let mut revoked = Vec::new();
        for id in ids {
            if let Some(mut entry) = self.sessions.get_mut(&id) {
                if entry.value_mut().revoke(now) {
                    revoked.push(entry.value().clone());
                }
            }
        }
        Ok(revoked)
    }

    async fn for_user(&self, user_id: UserId) -> AuthResult<Vec<Session>> {
        let ids = self
            .by_user
            .get(&user_id)
            .map(|r| r.value().clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.sessions.get(id).map(|s| s.value().clone()))
            .collect())
    }
}
