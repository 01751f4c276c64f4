use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ppghub_auth::{Role, RoleDefinition, RoleName};
use ppghub_core::{AuthError, AuthResult, RoleId};

use super::poisoned;

/// The role catalog's backing store.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Insert a new role; `Conflict` when the name is taken.
    async fn insert(&self, def: RoleDefinition, at: DateTime<Utc>) -> AuthResult<Role>;

    /// Overwrite an existing role (matched by id; the name cannot change).
    async fn replace(&self, role: Role) -> AuthResult<()>;

    async fn get(&self, id: RoleId) -> AuthResult<Option<Role>>;

    async fn get_by_name(&self, name: &RoleName) -> AuthResult<Option<Role>>;

    /// Every role, most privileged first.
    async fn list(&self) -> AuthResult<Vec<Role>>;

    /// Remove a role whose creation is being rolled back.
    async fn discard(&self, id: RoleId) -> AuthResult<()>;
}

#[derive(Debug, Default)]
struct RoleTable {
    by_id: BTreeMap<RoleId, Role>,
    by_name: HashMap<RoleName, RoleId>,
    next_id: u64,
}

/// In-memory role store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRoleStore {
    inner: RwLock<RoleTable>,
}

impl InMemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleStore for InMemoryRoleStore {
    async fn insert(&self, def: RoleDefinition, at: DateTime<Utc>) -> AuthResult<Role> {
        let mut table = self.inner.write().map_err(|_| poisoned())?;
        if table.by_name.contains_key(&def.name) {
            return Err(AuthError::conflict(format!("role '{}' already exists", def.name)));
        }
        table.next_id += 1;
        let id = RoleId::new(table.next_id);
        let role = Role::from_definition(id, def, at);
        table.by_name.insert(role.name.clone(), id);
        table.by_id.insert(id, role.clone());
        Ok(role)
    }

    async fn replace(&self, role: Role) -> AuthResult<()> {
        let mut table = self.inner.write().map_err(|_| poisoned())?;
        let current = table
            .by_id
            .get_mut(&role.id)
            .ok_or_else(|| AuthError::not_found(format!("role {}", role.id)))?;
        if current.name != role.name {
            return Err(AuthError::invalid_state(format!(
                "role {} cannot be renamed from '{}' to '{}'",
                role.id, current.name, role.name
            )));
        }
        *current = role;
        Ok(())
    }

    async fn get(&self, id: RoleId) -> AuthResult<Option<Role>> {
        let table = self.inner.read().map_err(|_| poisoned())?;
        Ok(table.by_id.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &RoleName) -> AuthResult<Option<Role>> {
        let table = self.inner.read().map_err(|_| poisoned())?;
        Ok(table
            .by_name
            .get(name)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn list(&self) -> AuthResult<Vec<Role>> {
        let table = self.inner.read().map_err(|_| poisoned())?;
        let mut roles: Vec<Role> = table.by_id.values().cloned().collect();
        roles.sort_by(|a, b| {
            b.access_level
                .cmp(&a.access_level)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(roles)
    }

    async fn discard(&self, id: RoleId) -> AuthResult<()> {
        let mut table = self.inner.write().map_err(|_| poisoned())?;
        if let Some(role) = table.by_id.remove(&id) {
            table.by_name.remove(&role.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ppghub_auth::default_catalog;

    use super::*;

    #[tokio::test]
    async fn names_are_unique_and_listing_is_ranked() {
        let store = InMemoryRoleStore::new();
        for def in default_catalog().into_iter().rev() {
            store.insert(def, Utc::now()).await.unwrap();
        }
        let dup = store.insert(default_catalog().remove(0), Utc::now()).await;
        assert!(matches!(dup, Err(AuthError::Conflict(_))));

        let names: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name.to_string())
            .collect();
        assert_eq!(names, ["administrador", "coordenador", "secretaria", "docente", "discente"]);
    }

    #[tokio::test]
    async fn replace_keeps_the_name() {
        let store = InMemoryRoleStore::new();
        let role = store.insert(default_catalog().remove(3), Utc::now()).await.unwrap();

        let mut renamed = role.clone();
        renamed.name = RoleName::from("professor");
        assert!(store.replace(renamed).await.is_err());

        let mut narrowed = role.clone();
        narrowed.active = false;
        store.replace(narrowed).await.unwrap();
        let stored = store.get_by_name(&RoleName::from("docente")).await.unwrap().unwrap();
        assert!(!stored.active);
    }
}
