use std::sync::Arc;

use tracing::{info, instrument};

use crate::{
    validate_handle, CoreResult, EntityKey, PersistenceGuard, ProfileStore, RemoteIdentity,
    ScoreSnapshot, Trophy, UserProfile,
};

/// Score, level and trophy operations on stored profiles.
///
/// Each call locks the profile, loads it, applies the change and commits it
/// before the lock is released.
pub struct ProfileService<S> {
    guard: Arc<PersistenceGuard<S>>,
}

impl<S> Clone for ProfileService<S> {
    fn clone(&self) -> Self {
        Self {
            guard: self.guard.clone(),
        }
    }
}

impl<S: ProfileStore> ProfileService<S> {
    pub fn new(guard: Arc<PersistenceGuard<S>>) -> Self {
        Self { guard }
    }

    async fn mutate<R: Send>(
        &self,
        username: &str,
        apply: impl FnOnce(&mut UserProfile) -> R + Send,
    ) -> CoreResult<R> {
        validate_handle("username", username)?;

        let guard = self.guard.lock(EntityKey::user(username)).await;
        let mut profile = self.guard.load_user(&guard, username).await?;
        let result = apply(&mut profile);
        self.guard.commit_user(&guard, &profile).await?;
        Ok(result)
    }

    /// Creates an empty profile. Returns false if the account already exists.
    #[instrument(skip(self))]
    pub async fn register(&self, username: &str) -> CoreResult<bool> {
        validate_handle("username", username)?;

        let guard = self.guard.lock(EntityKey::user(username)).await;
        if self.guard.find_user(&guard, username).await?.is_some() {
            return Ok(false);
        }

        let mut profile = UserProfile::new(username);
        profile.activate();
        self.guard.commit_user(&guard, &profile).await?;
        info!("Registered new user {username}");
        Ok(true)
    }

    /// Refreshes profile data from the identity provider, registering the
    /// account first if needed.
    #[instrument(skip(self, identity), fields(user = identity.login))]
    pub async fn import_identity(&self, identity: &RemoteIdentity) -> CoreResult<()> {
        validate_handle("username", &identity.login)?;

        let guard = self.guard.lock(EntityKey::user(&identity.login)).await;
        let mut profile = match self.guard.find_user(&guard, &identity.login).await? {
            Some(profile) => profile,
            None => {
                let mut profile = UserProfile::new(&identity.login);
                profile.activate();
                profile
            }
        };
        profile.import_identity(identity);
        self.guard.commit_user(&guard, &profile).await
    }

    #[instrument(skip(self))]
    pub async fn award(&self, username: &str, amount: u32) -> CoreResult<ScoreSnapshot> {
        self.mutate(username, |profile| {
            profile.increase_score(amount);
            profile.score()
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn penalize(&self, username: &str, amount: u32) -> CoreResult<ScoreSnapshot> {
        self.mutate(username, |profile| {
            profile.decrease_score(amount);
            profile.score()
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn level_up(&self, username: &str) -> CoreResult<u32> {
        self.mutate(username, |profile| {
            profile.increase_level();
            profile.level()
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn level_down(&self, username: &str) -> CoreResult<u32> {
        self.mutate(username, |profile| {
            profile.decrease_level();
            profile.level()
        })
        .await
    }

    /// Returns false if the user already had this trophy.
    #[instrument(skip(self, trophy), fields(trophy = trophy.id))]
    pub async fn award_trophy(&self, username: &str, trophy: Trophy) -> CoreResult<bool> {
        self.mutate(username, |profile| profile.trophy_chest().award(trophy))
            .await
    }

    pub async fn trophies(&self, username: &str) -> CoreResult<Vec<Trophy>> {
        validate_handle("username", username)?;

        let guard = self.guard.lock(EntityKey::user(username)).await;
        let profile = self.guard.load_user(&guard, username).await?;
        Ok(profile.trophy_chest().trophies())
    }

    pub async fn score(&self, username: &str) -> CoreResult<ScoreSnapshot> {
        validate_handle("username", username)?;

        let guard = self.guard.lock(EntityKey::user(username)).await;
        Ok(self.guard.load_user(&guard, username).await?.score())
    }

    #[instrument(skip(self))]
    pub async fn set_active(&self, username: &str, active: bool) -> CoreResult<()> {
        self.mutate(username, |profile| {
            if active {
                profile.activate();
            } else {
                profile.deactivate();
            }
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn set_public_profile(&self, username: &str, public: bool) -> CoreResult<()> {
        self.mutate(username, |profile| profile.set_public_profile(public))
            .await
    }
}
