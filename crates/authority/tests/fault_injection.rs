use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ppghub_auth::{
    AuditEntry, AuditFilter, AuditRecord, BindingStatus, NewBinding, RoleDefinition, Scope,
    ScopeBinding, Session, SessionPolicy, TokenHash,
};
use ppghub_authority::{Authority, GrantRequest, Registration, RequestContext, Stores};
use ppghub_core::{
    AuditId, AuthError, AuthResult, BindingId, ClientMeta, RoleId, SessionId, SystemClock, UserId,
};
use ppghub_infra::store::{
    AuditLog, BindingStore, BindingUpdate, InMemoryAuditLog, InMemoryBindingStore,
    InMemorySessionStore, Rotation, SessionStore,
};
use ppghub_infra::{AuthConfig, HashingSettings};

/// Audit log that can be switched into a failing state, now or after a
/// number of further appends.
#[derive(Default)]
struct FlakyAuditLog {
    inner: InMemoryAuditLog,
    failing: AtomicBool,
    // appends left plus one; zero when no countdown runs
    countdown: AtomicUsize,
}

impl FlakyAuditLog {
    fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
        self.countdown.store(0, Ordering::SeqCst);
    }

    fn fail_after(&self, appends: usize) {
        self.countdown.store(appends + 1, Ordering::SeqCst);
    }

    fn exhausted(&self) -> bool {
        self.countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                (left > 1).then(|| left - 1)
            })
            == Err(1)
    }
}

#[async_trait]
impl AuditLog for FlakyAuditLog {
    async fn append(&self, entry: AuditEntry, at: DateTime<Utc>) -> AuthResult<AuditRecord> {
        if self.failing.load(Ordering::SeqCst) || self.exhausted() {
            return Err(AuthError::unavailable("audit storage exhausted"));
        }
        self.inner.append(entry, at).await
    }

    async fn scan(
        &self,
        filter: &AuditFilter,
        after: Option<AuditId>,
        limit: usize,
    ) -> AuthResult<Vec<AuditRecord>> {
        self.inner.scan(filter, after, limit).await
    }
}

/// Binding store whose reads never complete.
#[derive(Default)]
struct StalledBindingStore {
    inner: InMemoryBindingStore,
}

#[async_trait]
impl BindingStore for StalledBindingStore {
    async fn insert_if_absent(&self, new: NewBinding, at: DateTime<Utc>) -> AuthResult<ScopeBinding> {
        self.inner.insert_if_absent(new, at).await
    }

    async fn get(&self, id: BindingId) -> AuthResult<Option<ScopeBinding>> {
        self.inner.get(id).await
    }

    async fn update(
        &self,
        id: BindingId,
        update: BindingUpdate<'_>,
    ) -> AuthResult<(ScopeBinding, ScopeBinding)> {
        self.inner.update(id, update).await
    }

    async fn restore(&self, previous: ScopeBinding) -> AuthResult<()> {
        self.inner.restore(previous).await
    }

    async fn discard(&self, id: BindingId) -> AuthResult<()> {
        self.inner.discard(id).await
    }

    async fn for_user(&self, _user_id: UserId) -> AuthResult<Vec<ScopeBinding>> {
        std::future::pending().await
    }

    async fn count_active_for_role(&self, role_id: RoleId) -> AuthResult<usize> {
        self.inner.count_active_for_role(role_id).await
    }
}

/// Session store whose bulk revocation can be made to fail.
#[derive(Default)]
struct SweepFailingSessionStore {
    inner: InMemorySessionStore,
    failing: AtomicBool,
}

impl SweepFailingSessionStore {
    fn fail_sweeps(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for SweepFailingSessionStore {
    async fn insert(&self, session: Session) -> AuthResult<()> {
        self.inner.insert(session).await
    }

    async fn get(&self, id: SessionId) -> AuthResult<Option<Session>> {
        self.inner.get(id).await
    }

    async fn touch(&self, token: &TokenHash, now: DateTime<Utc>) -> AuthResult<Session> {
        self.inner.touch(token, now).await
    }

    async fn rotate(
        &self,
        presented: &TokenHash,
        next_access: TokenHash,
        next_refresh: TokenHash,
        now: DateTime<Utc>,
        policy: &SessionPolicy,
    ) -> AuthResult<Rotation> {
        self.inner
            .rotate(presented, next_access, next_refresh, now, policy)
            .await
    }

    async fn logout(&self, token: &TokenHash, now: DateTime<Utc>) -> AuthResult<(Session, bool)> {
        self.inner.logout(token, now).await
    }

    async fn revoke(&self, id: SessionId, now: DateTime<Utc>) -> AuthResult<(Session, bool)> {
        self.inner.revoke(id, now).await
    }

    async fn revoke_all(&self, user_id: UserId, now: DateTime<Utc>) -> AuthResult<Vec<Session>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthError::unavailable("session storage offline"));
        }
        self.inner.revoke_all(user_id, now).await
    }

    async fn for_user(&self, user_id: UserId) -> AuthResult<Vec<Session>> {
        self.inner.for_user(user_id).await
    }
}

fn config() -> AuthConfig {
    AuthConfig {
        password_hashing: HashingSettings::insecure_fast(),
        ..AuthConfig::default()
    }
}

async fn flaky_authority() -> (Authority, Arc<FlakyAuditLog>) {
    let log = Arc::new(FlakyAuditLog::default());
    let authority = Authority::build(
        config(),
        Stores::in_memory().with_audit(log.clone()),
        Arc::new(SystemClock),
    )
    .await
    .unwrap();
    (authority, log)
}

fn admin() -> RequestContext {
    RequestContext::user(UserId::new(1), ClientMeta::new("10.0.0.1", "console"))
}

#[tokio::test]
async fn failed_audit_undoes_user_creation() {
    let (authority, log) = flaky_authority().await;
    log.fail(true);

    let err = authority
        .identity()
        .create(&admin(), Registration::new("a@ufx.br", "A", "pw"))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Unavailable(_)));
    assert!(matches!(
        authority.identity().find_by_email("a@ufx.br").await,
        Err(AuthError::NotFound(_))
    ));

    log.fail(false);
    authority
        .identity()
        .create(&admin(), Registration::new("a@ufx.br", "A", "pw"))
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_audit_undoes_grant_and_revoke() {
    let (authority, log) = flaky_authority().await;
    let ctx = admin();
    let ufx = authority.directory().register_institution(&ctx, "UFX", "UFX").await.unwrap();
    let p1 = authority
        .directory()
        .register_program(&ctx, ufx.id, "PPGCC", "Computação")
        .await
        .unwrap();
    let user = authority
        .identity()
        .create(&ctx, Registration::new("b@ufx.br", "B", "pw"))
        .await
        .unwrap();
    let docente = authority.roles().get_by_name("docente").await.unwrap().id;

    log.fail(true);
    let err = authority
        .bindings()
        .grant(&ctx, GrantRequest::new(user.id, p1.id, docente))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Unavailable(_)));
    assert!(authority.bindings().history_for(user.id).await.unwrap().is_empty());

    log.fail(false);
    let binding = authority
        .bindings()
        .grant(&ctx, GrantRequest::new(user.id, p1.id, docente))
        .await
        .unwrap();

    log.fail(true);
    let err = authority
        .bindings()
        .revoke(&ctx, binding.id, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Unavailable(_)));
    let stored = authority.bindings().get(binding.id).await.unwrap();
    assert_eq!(stored.status, BindingStatus::Active);
    assert!(stored.unbound_at.is_none());
}

#[tokio::test]
async fn failed_audit_keeps_the_user_active_and_signed_in() {
    let (authority, log) = flaky_authority().await;
    let ctx = admin();
    let user = authority
        .identity()
        .create(&ctx, Registration::new("c@ufx.br", "C", "pw"))
        .await
        .unwrap();
    let issued = authority
        .sessions()
        .login("c@ufx.br", "pw", ClientMeta::default())
        .await
        .unwrap();

    log.fail(true);
    let err = authority.identity().deactivate(&ctx, user.id).await.unwrap_err();
    assert!(matches!(err, AuthError::Unavailable(_)));
    assert!(authority.identity().get(user.id).await.unwrap().active);
    assert_eq!(
        authority.sessions().validate(issued.access_token()).await.unwrap(),
        user.id
    );

    let err = authority.sessions().revoke_all(&ctx, user.id).await.unwrap_err();
    assert!(matches!(err, AuthError::Unavailable(_)));
    assert_eq!(
        authority.sessions().validate(issued.access_token()).await.unwrap(),
        user.id
    );
}

#[tokio::test]
async fn failed_audit_leaves_the_role_unchanged() {
    let (authority, log) = flaky_authority().await;
    let before = authority.roles().get_by_name("discente").await.unwrap();

    log.fail(true);
    let widened = RoleDefinition::new("discente", 1, ppghub_auth::CapabilitySet::all());
    let err = authority
        .roles()
        .upsert_role(&admin(), widened, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Unavailable(_)));
    assert_eq!(authority.roles().get_by_name("discente").await.unwrap(), before);
}

#[tokio::test]
async fn authentication_events_survive_audit_failure() {
    let (authority, log) = flaky_authority().await;
    authority
        .identity()
        .create(&admin(), Registration::new("d@ufx.br", "D", "pw"))
        .await
        .unwrap();

    log.fail(true);
    let issued = authority
        .sessions()
        .login("d@ufx.br", "pw", ClientMeta::default())
        .await
        .unwrap();
    let next = authority.sessions().refresh(issued.refresh_token()).await.unwrap();
    authority.sessions().logout(next.access_token()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stalled_store_surfaces_as_unavailable() {
    let stores = Stores {
        bindings: Arc::new(StalledBindingStore::default()),
        ..Stores::in_memory()
    };
    let authority = Authority::build(
        AuthConfig {
            store_timeout_ms: 250,
            ..config()
        },
        stores,
        Arc::new(SystemClock),
    )
    .await
    .unwrap();

    let err = authority
        .resolver()
        .resolve(UserId::new(1), Scope::Global)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Unavailable(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn failed_session_sweep_still_shuts_the_account_out() {
    let sessions = Arc::new(SweepFailingSessionStore::default());
    let authority = Authority::build(
        config(),
        Stores {
            sessions: sessions.clone(),
            ..Stores::in_memory()
        },
        Arc::new(SystemClock),
    )
    .await
    .unwrap();
    let ctx = admin();
    let gone = authority
        .identity()
        .create(&ctx, Registration::new("e@ufx.br", "E", "pw"))
        .await
        .unwrap();
    let held = authority
        .identity()
        .create(&ctx, Registration::new("f@ufx.br", "F", "pw"))
        .await
        .unwrap();
    let login = |email: &'static str| {
        let authority = authority.clone();
        async move {
            authority
                .sessions()
                .login(email, "pw", ClientMeta::default())
                .await
                .unwrap()
        }
    };
    let first = login("e@ufx.br").await;
    let second = login("e@ufx.br").await;
    let locked_out = login("f@ufx.br").await;

    sessions.fail_sweeps(true);
    let snapshot = authority.identity().deactivate(&ctx, gone.id).await.unwrap();
    assert!(!snapshot.active);
    authority
        .identity()
        .lock(&ctx, held.id, Utc::now() + chrono::Duration::hours(1))
        .await
        .unwrap();
    // the sweep never ran
    assert_eq!(authority.sessions().sessions_of(gone.id).await.unwrap().len(), 2);

    assert!(matches!(
        authority.sessions().validate(first.access_token()).await,
        Err(AuthError::Invalid(_))
    ));
    assert!(matches!(
        authority.sessions().refresh(second.refresh_token()).await,
        Err(AuthError::Invalid(_))
    ));
    assert!(matches!(
        authority.sessions().validate(locked_out.access_token()).await,
        Err(AuthError::Invalid(_))
    ));
    assert!(authority.sessions().sessions_of(gone.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn interrupted_membership_sweep_reports_progress_and_resumes() {
    let (authority, log) = flaky_authority().await;
    let ctx = admin();
    let ufx = authority.directory().register_institution(&ctx, "UFX", "UFX").await.unwrap();
    let p1 = authority
        .directory()
        .register_program(&ctx, ufx.id, "PPGCC", "Computação")
        .await
        .unwrap();
    let user = authority
        .identity()
        .create(&ctx, Registration::new("m@ufx.br", "M", "pw"))
        .await
        .unwrap();
    for role in ["docente", "coordenador"] {
        let role_id = authority.roles().get_by_name(role).await.unwrap().id;
        authority
            .bindings()
            .grant(&ctx, GrantRequest::new(user.id, p1.id, role_id))
            .await
            .unwrap();
    }

    log.fail_after(1);
    let err = authority
        .bindings()
        .end_program_membership(&ctx, user.id, p1.id, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(&err, AuthError::Unavailable(msg) if msg.contains("ended 1 of 2")));
    assert_eq!(authority.bindings().active_bindings_for(user.id).await.unwrap().len(), 1);

    log.fail(false);
    let ended = authority
        .bindings()
        .end_program_membership(&ctx, user.id, p1.id, Utc::now())
        .await
        .unwrap();
    assert_eq!(ended.len(), 1);
    assert!(authority.bindings().active_bindings_for(user.id).await.unwrap().is_empty());
}
