use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use ppghub_auth::{NewUser, ProfileChange, User, normalize_email};
use ppghub_core::{AuthError, AuthResult, ExternalId, UserId};

/// In-place change applied to one user under that user's lock.
pub type UserMutation<'a> = &'a mut (dyn FnMut(&mut User) -> AuthResult<()> + Send);

/// User identities and their credential/lockout state.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert a new user; `Conflict` when the email or external id is taken.
    async fn insert(&self, new: NewUser, at: DateTime<Utc>) -> AuthResult<User>;

    async fn get(&self, id: UserId) -> AuthResult<Option<User>>;

    /// Lookup by normalised email.
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>>;

    /// All users ordered by id, optionally filtered by the active flag.
    async fn list(&self, active: Option<bool>) -> AuthResult<Vec<User>>;

    /// Run `mutation` against the user, serialized per user.
    ///
    /// The change is stored only when the mutation succeeds; on error the
    /// stored user is left untouched.
    async fn update(&self, id: UserId, mutation: UserMutation<'_>) -> AuthResult<User>;

    /// Apply a profile edit, keeping email uniqueness across users.
    ///
    /// `Conflict` when the new email belongs to someone else. Returns the
    /// user before and after the edit.
    async fn update_profile(
        &self,
        id: UserId,
        change: &ProfileChange,
        at: DateTime<Utc>,
    ) -> AuthResult<(User, User)>;

    /// Remove a user whose creation is being rolled back.
    async fn discard(&self, id: UserId) -> AuthResult<()>;
}

/// In-memory identity store for tests/dev.
///
/// Each user sits in its own map entry, so the entry lock gives per-user
/// serialization without contention across users.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    users: DashMap<UserId, User>,
    by_email: DashMap<String, UserId>,
    by_external: DashMap<ExternalId, UserId>,
    next_id: AtomicU64,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `email` for `id`; `true` when the claim is new.
    fn reserve_email(&self, email: &str, id: UserId) -> AuthResult<bool> {
        match self.by_email.entry(email.to_string()) {
            Entry::Occupied(slot) if *slot.get() == id => Ok(false),
            Entry::Occupied(_) => Err(AuthError::conflict(format!("email '{email}' already registered"))),
            Entry::Vacant(slot) => {
                slot.insert(id);
                Ok(true)
            }
        }
    }

    fn release_email(&self, email: &str, id: UserId) {
        self.by_email.remove_if(email, |_, owner| *owner == id);
    }

    fn edit(&self, id: UserId, change: &ProfileChange, at: DateTime<Utc>) -> AuthResult<(User, User)> {
        let mut entry = self
            .users
            .get_mut(&id)
            .ok_or_else(|| AuthError::not_found(format!("user {id}")))?;
        let before = entry.value().clone();
        let mut draft = before.clone();
        draft.apply_profile(change, at)?;
        *entry.value_mut() = draft.clone();
        Ok((before, draft))
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn insert(&self, new: NewUser, at: DateTime<Utc>) -> AuthResult<User> {
        // Slots are taken in a fixed order (email, then external id).
        let email_slot = match self.by_email.entry(new.email.clone()) {
            Entry::Occupied(_) => {
                return Err(AuthError::conflict(format!("email '{}' already registered", new.email)));
            }
            Entry::Vacant(slot) => slot,
        };
        let external_slot = match self.by_external.entry(new.external_id) {
            Entry::Occupied(_) => {
                return Err(AuthError::conflict(format!(
                    "external id {} already registered",
                    new.external_id
                )));
            }
            Entry::Vacant(slot) => slot,
        };

        let id = UserId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let user = User::register(id, new, at);
        self.users.insert(id, user.clone());
        external_slot.insert(id);
        email_slot.insert(id);
        Ok(user)
    }

    async fn get(&self, id: UserId) -> AuthResult<Option<User>> {
        Ok(self.users.get(&id).map(|u| u.value().clone()))
    }

    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        let id = self.by_email.get(email).map(|r| *r.value());
        Ok(id.and_then(|id| self.users.get(&id).map(|u| u.value().clone())))
    }

    async fn list(&self, active: Option<bool>) -> AuthResult<Vec<User>> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|u| active.is_none_or(|a| u.active == a))
            .map(|u| u.value().clone())
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn update(&self, id: UserId, mutation: UserMutation<'_>) -> AuthResult<User> {
        let mut entry = self
            .users
            .get_mut(&id)
            .ok_or_else(|| AuthError::not_found(format!("user {id}")))?;

        let mut draft = entry.value().clone();
        mutation(&mut draft)?;
        *entry.value_mut() = draft;
        Ok(entry.value().clone())
    }

    async fn update_profile(
        &self,
        id: UserId,
        change: &ProfileChange,
        at: DateTime<Utc>,
    ) -> AuthResult<(User, User)> {
        // The new address is claimed before the user entry is locked; no two
        // map locks are ever held together.
        let email = change.email.as_deref().map(normalize_email).transpose()?;
        let reserved = match &email {
            Some(email) => self.reserve_email(email, id)?,
            None => false,
        };

        let outcome = self.edit(id, change, at);
        match (&outcome, &email) {
            (Ok((before, after)), _) if before.email != after.email => {
                self.release_email(&before.email, id);
            }
            (Err(_), Some(email)) if reserved => self.release_email(email, id),
            _ => {}
        }
        outcome
    }

    async fn discard(&self, id: UserId) -> AuthResult<()> {
        if let Some((_, user)) = self.users.remove(&id) {
            self.by_email.remove(&user.email);
            self.by_external.remove(&user.external_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ppghub_auth::{CredentialHash, LockoutPolicy};

    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            external_id: ExternalId::new(),
            email: email.to_string(),
            full_name: "Maria Souza".to_string(),
            credential: CredentialHash::new("$argon2id$stub"),
            verified: false,
        }
    }

    #[tokio::test]
    async fn email_and_external_id_are_unique() {
        let store = InMemoryIdentityStore::new();
        let first = store.insert(new_user("maria@ufx.br"), Utc::now()).await.unwrap();
        assert_eq!(first.id, UserId::new(1));

        let err = store.insert(new_user("maria@ufx.br"), Utc::now()).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));

        let mut clash = new_user("other@ufx.br");
        clash.external_id = first.external_id;
        let err = store.insert(clash, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));

        // the rejected insert did not leave its email slot behind
        assert!(store.find_by_email("other@ufx.br").await.unwrap().is_none());
        store.insert(new_user("other@ufx.br"), Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn failed_mutation_leaves_user_untouched() {
        let store = InMemoryIdentityStore::new();
        let user = store.insert(new_user("a@ufx.br"), Utc::now()).await.unwrap();

        let err = store
            .update(user.id, &mut |u: &mut User| {
                u.full_name = "changed".to_string();
                Err(AuthError::invalid_state("nope"))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidState(_)));
        assert_eq!(store.get(user.id).await.unwrap().unwrap().full_name, "Maria Souza");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_failures_are_all_counted() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let user = store.insert(new_user("b@ufx.br"), Utc::now()).await.unwrap();
        let policy = LockoutPolicy {
            threshold: 1000,
            ..LockoutPolicy::default()
        };

        let id = user.id;
        let mut tasks = Vec::new();
        for _ in 0..64 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .update(id, &mut |u: &mut User| {
                        u.register_failure(Utc::now(), &policy).map(|_| ())
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.get(id).await.unwrap().unwrap().failed_attempts, 64);
    }

    #[tokio::test]
    async fn email_change_moves_the_unique_slot() {
        let store = InMemoryIdentityStore::new();
        let ana = store.insert(new_user("ana@ufx.br"), Utc::now()).await.unwrap();
        store.insert(new_user("bia@ufx.br"), Utc::now()).await.unwrap();

        let err = store
            .update_profile(ana.id, &ProfileChange::default().email("BIA@ufx.br"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));

        let (before, after) = store
            .update_profile(ana.id, &ProfileChange::default().email("ana.s@ufx.br"), Utc::now())
            .await
            .unwrap();
        assert_eq!(before.email, "ana@ufx.br");
        assert_eq!(after.email, "ana.s@ufx.br");
        assert_eq!(store.find_by_email("ana.s@ufx.br").await.unwrap().unwrap().id, ana.id);
        assert!(store.find_by_email("ana@ufx.br").await.unwrap().is_none());

        // the old address is free again
        store.insert(new_user("ana@ufx.br"), Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_edit_releases_the_claimed_email() {
        let store = InMemoryIdentityStore::new();
        let ana = store.insert(new_user("ana@ufx.br"), Utc::now()).await.unwrap();

        let change = ProfileChange::default().email("new@ufx.br").full_name("   ");
        let err = store.update_profile(ana.id, &change, Utc::now()).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidState(_)));
        assert!(store.find_by_email("new@ufx.br").await.unwrap().is_none());
        assert_eq!(store.get(ana.id).await.unwrap().unwrap().email, "ana@ufx.br");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_of_one_email_admit_a_single_owner() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let mut ids = Vec::new();
        for i in 0..8 {
            ids.push(store.insert(new_user(&format!("u{i}@ufx.br")), Utc::now()).await.unwrap().id);
        }

        let mut tasks = Vec::new();
        for id in ids {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .update_profile(id, &ProfileChange::default().email("shared@ufx.br"), Utc::now())
                    .await
            }));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                winners += 1;
            }
        }

        assert_eq!(winners, 1);
        let owners = store
            .list(None)
            .await
            .unwrap()
            .into_iter()
            .filter(|u| u.email == "shared@ufx.br")
            .count();
        assert_eq!(owners, 1);
    }

    #[tokio::test]
    async fn discard_frees_unique_slots() {
        let store = InMemoryIdentityStore::new();
        let user = store.insert(new_user("c@ufx.br"), Utc::now()).await.unwrap();
        store.discard(user.id).await.unwrap();

        assert!(store.get(user.id).await.unwrap().is_none());
        store.insert(new_user("c@ufx.br"), Utc::now()).await.unwrap();
    }
}
