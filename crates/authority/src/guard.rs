//! Per-role serialization between catalog updates and grants.
//!
//! Grants of a role share its guard; an update of the role's capabilities
//! takes it exclusively, so the holder count it checks cannot change before
//! the update lands.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use ppghub_core::RoleId;

#[derive(Debug, Clone, Default)]
pub struct RoleGuards {
    locks: Arc<DashMap<RoleId, Arc<RwLock<()>>>>,
}

impl RoleGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Held while granting the role.
    pub async fn shared(&self, role_id: RoleId) -> OwnedRwLockReadGuard<()> {
        self.lock_for(role_id).read_owned().await
    }

    /// Held while changing what the role grants.
    pub async fn exclusive(&self, role_id: RoleId) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(role_id).write_owned().await
    }

    fn lock_for(&self, role_id: RoleId) -> Arc<RwLock<()>> {
        Arc::clone(self.locks.entry(role_id).or_default().value())
    }
}
