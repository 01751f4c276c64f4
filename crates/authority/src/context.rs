//! Per-call and per-process context shared by the services.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use ppghub_core::{AuthResult, ClientMeta, Clock, UserId};
use ppghub_infra::bounded;

/// Who is performing an administrative call, and from where.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    actor: Option<UserId>,
    client: ClientMeta,
}

impl RequestContext {
    pub fn user(actor: UserId, client: ClientMeta) -> Self {
        Self {
            actor: Some(actor),
            client,
        }
    }

    /// An action initiated by the system itself (seeding, cascades).
    pub fn system() -> Self {
        Self::default()
    }

    pub fn actor(&self) -> Option<UserId> {
        self.actor
    }

    pub fn client(&self) -> &ClientMeta {
        &self.client
    }
}

/// Clock plus the deadline applied to every store call.
#[derive(Clone)]
pub struct Runtime {
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl Runtime {
    pub fn new(clock: Arc<dyn Clock>, store_timeout: Duration) -> Self {
        Self {
            clock,
            store_timeout,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run a store call under the configured deadline.
    pub async fn io<T, F>(&self, operation: &'static str, fut: F) -> AuthResult<T>
    where
        F: Future<Output = AuthResult<T>>,
    {
        bounded(self.store_timeout, operation, fut).await
    }
}

impl core::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}
