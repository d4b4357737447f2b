use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{error, trace};

use crate::{
    CoreError, CoreResult, CourseStore, EntityKey, EntityKind, Group, GroupId, Organization,
    Persist, ProfileStore, UserProfile,
};

type LockMap = Mutex<HashMap<EntityKey, Arc<AsyncMutex<()>>>>;

/// Proof that the holder owns the persistence lock of one entity.
/// Dropping it releases the lock.
#[derive(Debug)]
pub struct EntityGuard {
    key: EntityKey,
    lock: Option<OwnedMutexGuard<()>>,
    mutex: Arc<AsyncMutex<()>>,
    locks: Arc<LockMap>,
}

impl EntityGuard {
    pub fn key(&self) -> &EntityKey {
        &self.key
    }
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        // New waiters clone the mutex only while holding the map, so once the
        // lock is released here a count of two (map entry and `self.mutex`)
        // means nobody else wants this entity.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.lock.take());
        if Arc::strong_count(&self.mutex) == 2 {
            locks.remove(&self.key);
        }
    }
}

/// Per-entity write locks in front of a store.
///
/// Loads and commits require the [`EntityGuard`] of the entity, so a
/// validate, mutate, commit sequence run under one guard can't interleave
/// with another writer of the same entity in this process.
pub struct PersistenceGuard<S> {
    store: Arc<S>,
    locks: Arc<LockMap>,
}

impl<S> PersistenceGuard<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: Arc::default(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Waits for the entity's lock. Entries are dropped from the registry
    /// once the last guard or waiter for them is gone.
    pub async fn lock(&self, key: EntityKey) -> EntityGuard {
        let mutex = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();

        let lock = mutex.clone().lock_owned().await;
        trace!(kind = %key.kind(), %key, "Entity locked");
        EntityGuard {
            key,
            lock: Some(lock),
            mutex,
            locks: self.locks.clone(),
        }
    }

    /// Number of entities with a live guard or waiter.
    pub fn tracked_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn check_guard(guard: &EntityGuard, key: &EntityKey) -> CoreResult<()> {
        if guard.key() == key {
            return Ok(());
        }

        error!(held = %guard.key(), wanted = %key, "Store access with a foreign guard");
        Err(CoreError::Persistence {
            kind: key.kind(),
            key: key.to_string(),
            cause: format!("guard is held for {} {}", guard.key().kind(), guard.key()),
        })
    }

    fn persistence_error(key: &EntityKey, err: anyhow::Error) -> CoreError {
        error!(kind = %key.kind(), %key, "Store failure: {err:#}");
        CoreError::Persistence {
            kind: key.kind(),
            key: key.to_string(),
            cause: format!("{err:#}"),
        }
    }
}

impl<S: ProfileStore> PersistenceGuard<S> {
    pub async fn find_user(
        &self,
        guard: &EntityGuard,
        username: &str,
    ) -> CoreResult<Option<UserProfile>> {
        let key = EntityKey::user(username);
        Self::check_guard(guard, &key)?;
        self.store
            .load_user(username)
            .await
            .map_err(|err| Self::persistence_error(&key, err))
    }

    pub async fn load_user(&self, guard: &EntityGuard, username: &str) -> CoreResult<UserProfile> {
        self.find_user(guard, username)
            .await?
            .ok_or_else(|| CoreError::not_found(EntityKind::User, username))
    }

    pub async fn commit_user(&self, guard: &EntityGuard, profile: &UserProfile) -> CoreResult<()> {
        let key = profile.entity_key();
        Self::check_guard(guard, &key)?;
        self.store
            .save_user(profile)
            .await
            .map_err(|err| Self::persistence_error(&key, err))?;
        trace!(%key, "User committed");
        Ok(())
    }
}

impl<S: CourseStore> PersistenceGuard<S> {
    pub async fn find_organization(
        &self,
        guard: &EntityGuard,
        course: &str,
    ) -> CoreResult<Option<Organization>> {
        let key = EntityKey::organization(course);
        Self::check_guard(guard, &key)?;
        self.store
            .load_organization(course)
            .await
            .map_err(|err| Self::persistence_error(&key, err))
    }

    pub async fn load_organization(
        &self,
        guard: &EntityGuard,
        course: &str,
    ) -> CoreResult<Organization> {
        self.find_organization(guard, course)
            .await?
            .ok_or_else(|| CoreError::not_found(EntityKind::Organization, course))
    }

    pub async fn commit_organization(
        &self,
        guard: &EntityGuard,
        organization: &Organization,
    ) -> CoreResult<()> {
        let key = organization.entity_key();
        Self::check_guard(guard, &key)?;
        self.store
            .save_organization(organization)
            .await
            .map_err(|err| Self::persistence_error(&key, err))?;
        trace!(%key, "Organization committed");
        Ok(())
    }

    pub async fn load_group(
        &self,
        guard: &EntityGuard,
        course: &str,
        id: GroupId,
    ) -> CoreResult<Group> {
        let key = EntityKey::group(course, id);
        Self::check_guard(guard, &key)?;
        self.store
            .load_group(course, id)
            .await
            .map_err(|err| Self::persistence_error(&key, err))?
            .ok_or_else(|| CoreError::not_found(key.kind(), &key))
    }

    pub async fn commit_group(&self, guard: &EntityGuard, group: &Group) -> CoreResult<()> {
        let key = group.entity_key();
        Self::check_guard(guard, &key)?;
        self.store
            .save_group(group)
            .await
            .map_err(|err| Self::persistence_error(&key, err))?;
        trace!(%key, "Group committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::MemoryStore;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_key_is_exclusive() {
        let guard = Arc::new(PersistenceGuard::new(Arc::new(MemoryStore::new())));
        let inside = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                let inside = inside.clone();
                tokio::spawn(async move {
                    let _held = guard.lock(EntityKey::organization("dat100")).await;
                    let before = inside.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    assert_eq!(before, 0, "two holders of the same guard");
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let guard = PersistenceGuard::new(Arc::new(MemoryStore::new()));
        let _org = guard.lock(EntityKey::organization("dat100")).await;
        let _group = guard.lock(EntityKey::group("dat100", 1)).await;
        let _other = guard.lock(EntityKey::organization("dat200")).await;
    }

    #[tokio::test]
    async fn commit_requires_the_matching_guard() {
        let guard = PersistenceGuard::new(Arc::new(MemoryStore::new()));
        let held = guard.lock(EntityKey::organization("dat200")).await;

        let err = guard
            .commit_organization(&held, &Organization::new("dat100"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Persistence {
                kind: EntityKind::Organization,
                ..
            }
        ));
        assert!(!guard
            .store()
            .contains(&EntityKey::organization("dat100")));
    }

    #[tokio::test]
    async fn missing_entities_are_not_found() {
        let guard = PersistenceGuard::new(Arc::new(MemoryStore::new()));
        let held = guard.lock(EntityKey::group("dat100", 9)).await;

        assert_eq!(
            guard.load_group(&held, "dat100", 9).await.unwrap_err(),
            CoreError::not_found(EntityKind::Group, "dat100/9")
        );
    }

    #[tokio::test]
    async fn released_locks_leave_the_registry() {
        let guard = PersistenceGuard::new(Arc::new(MemoryStore::new()));
        for id in 0..1_000 {
            let _held = guard.lock(EntityKey::group("dat100", id)).await;
        }
        assert_eq!(guard.tracked_locks(), 0);

        let first = guard.lock(EntityKey::organization("dat100")).await;
        let _other = guard.lock(EntityKey::organization("dat200")).await;
        assert_eq!(guard.tracked_locks(), 2);
        drop(first);
        assert_eq!(guard.tracked_locks(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waiters_keep_the_entry_alive() {
        let guard = Arc::new(PersistenceGuard::new(Arc::new(MemoryStore::new())));
        let held = guard.lock(EntityKey::organization("dat100")).await;

        let waiter = {
            let guard = guard.clone();
            tokio::spawn(async move {
                let _next = guard.lock(EntityKey::organization("dat100")).await;
                guard.tracked_locks()
            })
        };
        // Registry entry, the holder (twice) and the waiter (twice).
        while Arc::strong_count(&held.mutex) < 5 {
            tokio::task::yield_now().await;
        }
        drop(held);

        assert_eq!(waiter.await.unwrap(), 1);
        assert_eq!(guard.tracked_locks(), 0);
    }
}
