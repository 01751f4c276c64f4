use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ppghub_auth::{BindingKey, BindingStatus, NewBinding, ScopeBinding};
use ppghub_core::{AuthError, AuthResult, BindingId, RoleId, UserId};

use super::poisoned;

/// In-place status change applied to one binding.
pub type BindingUpdate<'a> = &'a mut (dyn FnMut(&mut ScopeBinding) -> AuthResult<()> + Send);

/// The scope binding ledger's backing store.
///
/// Uniqueness is over *open* bindings (Active or Suspended): an ended
/// binding releases its (user, scope, role) slot so the triple can be
/// granted again.
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Check-and-insert as one step; `Conflict` when the key has an open binding.
    async fn insert_if_absent(&self, new: NewBinding, at: DateTime<Utc>) -> AuthResult<ScopeBinding>;

    async fn get(&self, id: BindingId) -> AuthResult<Option<ScopeBinding>>;

    /// Apply `update` and return `(before, after)`.
    ///
    /// Nothing is stored when the update fails. The key of a binding can
    /// never change.
    async fn update(
        &self,
        id: BindingId,
        update: BindingUpdate<'_>,
    ) -> AuthResult<(ScopeBinding, ScopeBinding)>;

    /// Put a previous state back (rollback of an update).
    async fn restore(&self, previous: ScopeBinding) -> AuthResult<()>;

    /// Remove a binding whose grant is being rolled back.
    async fn discard(&self, id: BindingId) -> AuthResult<()>;

    /// Every binding of the user in any status, oldest first.
    async fn for_user(&self, user_id: UserId) -> AuthResult<Vec<ScopeBinding>>;

    /// Number of bindings in `Active` status holding the role.
    async fn count_active_for_role(&self, role_id: RoleId) -> AuthResult<usize>;
}

#[derive(Debug, Default)]
struct BindingTable {
    bindings: BTreeMap<BindingId, ScopeBinding>,
    open: HashMap<BindingKey, BindingId>,
    by_user: HashMap<UserId, Vec<BindingId>>,
    next_id: u64,
}

impl BindingTable {
    fn occupant(&self, key: &BindingKey, except: Option<BindingId>) -> Option<BindingId> {
        self.open.get(key).copied().filter(|id| Some(*id) != except)
    }

    /// Keep the open-slot index in step with a binding's new state.
    fn reindex(&mut self, binding: &ScopeBinding) {
        let key = binding.key();
        if binding.is_open() {
            self.open.insert(key, binding.id);
        } else if self.open.get(&key) == Some(&binding.id) {
            self.open.remove(&key);
        }
    }
}

/// In-memory binding store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryBindingStore {
    inner: RwLock<BindingTable>,
}

impl InMemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BindingStore for InMemoryBindingStore {
    async fn insert_if_absent(&self, new: NewBinding, at: DateTime<Utc>) -> AuthResult<ScopeBinding> {
        let mut table = self.inner.write().map_err(|_| poisoned())?;
        if let Some(existing) = table.occupant(&new.key, None) {
            return Err(AuthError::conflict(format!(
                "user {} already holds role {} in {} (binding {existing})",
                new.key.user_id, new.key.role_id, new.key.scope
            )));
        }

        table.next_id += 1;
        let binding = ScopeBinding::create(BindingId::new(table.next_id), new, at);
        table.reindex(&binding);
        table.by_user.entry(binding.user_id).or_default().push(binding.id);
        table.bindings.insert(binding.id, binding.clone());
        Ok(binding)
    }

    async fn get(&self, id: BindingId) -> AuthResult<Option<ScopeBinding>> {
        let table = self.inner.read().map_err(|_| poisoned())?;
        Ok(table.bindings.get(&id).cloned())
    }

    async fn update(
        &self,
        id: BindingId,
        update: BindingUpdate<'_>,
    ) -> AuthResult<(ScopeBinding, ScopeBinding)> {
        let mut table = self.inner.write().map_err(|_| poisoned())?;
        let before = table
            .bindings
            .get(&id)
            .cloned()
            .ok_or_else(|| AuthError::not_found(format!("binding {id}")))?;

        let mut after = before.clone();
        update(&mut after)?;
        if after.key() != before.key() || after.id != before.id {
            return Err(AuthError::invalid_state(format!("binding {id} cannot change its key")));
        }

        table.reindex(&after);
        table.bindings.insert(id, after.clone());
        Ok((before, after))
    }

    async fn restore(&self, previous: ScopeBinding) -> AuthResult<()> {
        let mut table = self.inner.write().map_err(|_| poisoned())?;
        if !table.bindings.contains_key(&previous.id) {
            return Err(AuthError::not_found(format!("binding {}", previous.id)));
        }
        if previous.is_open() {
            if let Some(other) = table.occupant(&previous.key(), Some(previous.id)) {
                return Err(AuthError::conflict(format!(
                    "cannot restore binding {}: slot taken by binding {other}",
                    previous.id
                )));
            }
        }
        table.reindex(&previous);
        table.bindings.insert(previous.id, previous);
        Ok(())
    }

    async fn discard(&self, id: BindingId) -> AuthResult<()> {
        let mut table = self.inner.write().map_err(|_| poisoned())?;
        if let Some(binding) = table.bindings.remove(&id) {
            let key = binding.key();
            if table.open.get(&key) == Some(&id) {
                table.open.remove(&key);
            }
            if let Some(ids) = table.by_user.get_mut(&binding.user_id) {
                ids.retain(|b| *b != id);
            }
        }
        Ok(())
    }

    async fn for_user(&self, user_id: UserId) -> AuthResult<Vec<ScopeBinding>> {
        let table = self.inner.read().map_err(|_| poisoned())?;
        Ok(table
            .by_user
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| table.bindings.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_active_for_role(&self, role_id: RoleId) -> AuthResult<usize> {
        let table = self.inner.read().map_err(|_| poisoned())?;
        Ok(table
            .bindings
            .values()
            .filter(|b| b.role_id == role_id && b.status == BindingStatus::Active)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ppghub_auth::BindingScope;
    use ppghub_core::ProgramId;

    use super::*;

    fn grant(user: u64, program: u64, role: u64) -> NewBinding {
        NewBinding {
            key: BindingKey {
                user_id: UserId::new(user),
                scope: BindingScope::Program(ProgramId::new(program)),
                role_id: RoleId::new(role),
            },
            bound_at: Utc::now(),
            granted_by: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn open_binding_blocks_regrant_until_ended() {
        let store = InMemoryBindingStore::new();
        let first = store.insert_if_absent(grant(1, 1, 4), Utc::now()).await.unwrap();

        let dup = store.insert_if_absent(grant(1, 1, 4), Utc::now()).await;
        assert!(matches!(dup, Err(AuthError::Conflict(_))));

        // suspension keeps the slot
        store.update(first.id, &mut |b: &mut ScopeBinding| b.suspend()).await.unwrap();
        assert!(store.insert_if_absent(grant(1, 1, 4), Utc::now()).await.is_err());

        store.update(first.id, &mut |b: &mut ScopeBinding| b.reinstate()).await.unwrap();
        let now = Utc::now();
        let (before, after) = store
            .update(first.id, &mut |b: &mut ScopeBinding| b.end(now))
            .await
            .unwrap();
        assert_eq!(before.status, BindingStatus::Active);
        assert_eq!(after.status, BindingStatus::Ended);

        let second = store.insert_if_absent(grant(1, 1, 4), Utc::now()).await.unwrap();
        assert_ne!(second.id, first.id);
        assert_eq!(store.for_user(UserId::new(1)).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_grants_admit_exactly_one() {
        let store = Arc::new(InMemoryBindingStore::new());
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.insert_if_absent(grant(7, 2, 3), Utc::now()).await
            }));
        }

        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
        assert_eq!(store.count_active_for_role(RoleId::new(3)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn restore_refuses_to_reopen_a_taken_slot() {
        let store = InMemoryBindingStore::new();
        let first = store.insert_if_absent(grant(1, 1, 1), Utc::now()).await.unwrap();
        let now = Utc::now();
        store.update(first.id, &mut |b: &mut ScopeBinding| b.end(now)).await.unwrap();
        store.insert_if_absent(grant(1, 1, 1), Utc::now()).await.unwrap();

        let err = store.restore(first).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
    }

    #[tokio::test]
    async fn discard_releases_the_slot() {
        let store = InMemoryBindingStore::new();
        let b = store.insert_if_absent(grant(2, 1, 1), Utc::now()).await.unwrap();
        store.discard(b.id).await.unwrap();

        assert!(store.get(b.id).await.unwrap().is_none());
        assert!(store.for_user(UserId::new(2)).await.unwrap().is_empty());
        store.insert_if_absent(grant(2, 1, 1), Utc::now()).await.unwrap();
    }
}
