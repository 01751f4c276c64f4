use std::sync::Arc;

use ppghub_core::{AuthError, AuthResult, Clock, SystemClock};
use ppghub_infra::store::{
    AuditLog, BindingStore, DirectoryStore, IdentityStore, InMemoryAuditLog, InMemoryBindingStore,
    InMemoryDirectory, InMemoryIdentityStore, InMemoryRoleStore, InMemorySessionStore, RoleStore,
    SessionStore,
};
use ppghub_infra::{AuthConfig, CredentialHasher};

use crate::audit::AuditRecorder;
use crate::context::Runtime;
use crate::directory::ProgramDirectory;
use crate::guard::RoleGuards;
use crate::identity::IdentityService;
use crate::ledger::BindingLedger;
use crate::resolver::AuthorizationResolver;
use crate::roles::RoleCatalog;
use crate::sessions::SessionAuthority;

/// Backing stores for every component.
#[derive(Clone)]
pub struct Stores {
    pub identity: Arc<dyn IdentityStore>,
    pub roles: Arc<dyn RoleStore>,
    pub bindings: Arc<dyn BindingStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub audit: Arc<dyn AuditLog>,
    pub directory: Arc<dyn DirectoryStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            identity: Arc::new(InMemoryIdentityStore::new()),
            roles: Arc::new(InMemoryRoleStore::new()),
            bindings: Arc::new(InMemoryBindingStore::new()),
            sessions: Arc::new(InMemorySessionStore::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
            directory: Arc::new(InMemoryDirectory::new()),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }
}

/// The authority subsystem wired together from one configuration.
#[derive(Clone)]
pub struct Authority {
    config: Arc<AuthConfig>,
    identity: IdentityService,
    roles: RoleCatalog,
    bindings: BindingLedger,
    resolver: AuthorizationResolver,
    sessions: SessionAuthority,
    audit: AuditRecorder,
    directory: ProgramDirectory,
}

impl Authority {
    /// Validate `config`, wire the services and seed the role catalog.
    pub async fn build(config: AuthConfig, stores: Stores, clock: Arc<dyn Clock>) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::invalid_state(format!("configuration rejected: {e}")))?;

        let rt = Runtime::new(clock, config.store_timeout());
        let hasher = Arc::new(CredentialHasher::new(&config.password_hashing)?);
        let audit = AuditRecorder::new(Arc::clone(&stores.audit), rt.clone());
        let guards = RoleGuards::new();

        let identity = IdentityService::new(
            Arc::clone(&stores.identity),
            Arc::clone(&stores.sessions),
            hasher,
            audit.clone(),
            rt.clone(),
            config.lockout_policy(),
        );
        let roles = RoleCatalog::new(
            Arc::clone(&stores.roles),
            Arc::clone(&stores.bindings),
            guards.clone(),
            audit.clone(),
            rt.clone(),
        );
        let bindings = BindingLedger::new(
            Arc::clone(&stores.bindings),
            Arc::clone(&stores.identity),
            Arc::clone(&stores.roles),
            Arc::clone(&stores.directory),
            guards,
            audit.clone(),
            rt.clone(),
        );
        let resolver = AuthorizationResolver::new(
            Arc::clone(&stores.bindings),
            Arc::clone(&stores.roles),
            Arc::clone(&stores.directory),
            config.resolution_policy(),
            rt.clone(),
        );
        let sessions = SessionAuthority::new(
            Arc::clone(&stores.sessions),
            identity.clone(),
            audit.clone(),
            rt.clone(),
            config.session_policy(),
        );
        let directory = ProgramDirectory::new(Arc::clone(&stores.directory), audit.clone(), rt);

        roles.seed(config.roles.clone()).await?;
        tracing::info!(
            session_ttl_secs = config.session_ttl_secs,
            lockout_threshold = config.lockout_threshold,
            global_scope_roles = ?config.global_scope_roles,
            "authority ready"
        );

        Ok(Self {
            config: Arc::new(config),
            identity,
            roles,
            bindings,
            resolver,
            sessions,
            audit,
            directory,
        })
    }

    /// In-memory stores on the system clock.
    pub async fn in_memory(config: AuthConfig) -> AuthResult<Self> {
        Self::build(config, Stores::in_memory(), Arc::new(SystemClock)).await
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn identity(&self) -> &IdentityService {
        &self.identity
    }

    pub fn roles(&self) -> &RoleCatalog {
        &self.roles
    }

    pub fn bindings(&self) -> &BindingLedger {
        &self.bindings
    }

    pub fn resolver(&self) -> &AuthorizationResolver {
        &self.resolver
    }

    pub fn sessions(&self) -> &SessionAuthority {
        &self.sessions
    }

    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    pub fn directory(&self) -> &ProgramDirectory {
        &self.directory
    }
}

impl core::fmt::Debug for Authority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Authority")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
