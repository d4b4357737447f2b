use std::{
    collections::HashSet,
    sync::{Mutex, PoisonError},
};

use anyhow::bail;
use async_trait::async_trait;

use super::*;

/// [`MemoryStore`] whose saves can be made to fail per entity kind.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing: Mutex<HashSet<EntityKind>>,
}

impl FailingStore {
    pub fn fail_saves_of(&self, kind: EntityKind) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind);
    }

    pub fn heal(&self) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn check(&self, kind: EntityKind) -> anyhow::Result<()> {
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&kind)
        {
            bail!("disk full while writing {kind}");
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for FailingStore {
    async fn load_user(&self, username: &str) -> anyhow::Result<Option<UserProfile>> {
        self.inner.load_user(username).await
    }

    async fn save_user(&self, profile: &UserProfile) -> anyhow::Result<()> {
        self.check(EntityKind::User)?;
        self.inner.save_user(profile).await
    }
}

#[async_trait]
impl CourseStore for FailingStore {
    async fn load_organization(&self, course: &str) -> anyhow::Result<Option<Organization>> {
        self.inner.load_organization(course).await
    }

    async fn save_organization(&self, organization: &Organization) -> anyhow::Result<()> {
        self.check(EntityKind::Organization)?;
        self.inner.save_organization(organization).await
    }

    async fn load_group(&self, course: &str, id: GroupId) -> anyhow::Result<Option<Group>> {
        self.inner.load_group(course, id).await
    }

    async fn save_group(&self, group: &Group) -> anyhow::Result<()> {
        self.check(EntityKind::Group)?;
        self.inner.save_group(group).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    CreateRepository(RepositoryOptions),
    CreateTeam(TeamOptions),
    AddMember { team: String, username: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailAt {
    Repository,
    Team,
    Member(String),
}

/// Provisioner that records every call and fails where it is told to.
#[derive(Default)]
pub struct RecordingProvisioner {
    calls: Mutex<Vec<RemoteCall>>,
    fail_at: Option<FailAt>,
}

impl RecordingProvisioner {
    pub fn failing_at(fail_at: FailAt) -> Self {
        Self {
            calls: Mutex::default(),
            fail_at: Some(fail_at),
        }
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: RemoteCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl RemoteProvisioner for RecordingProvisioner {
    async fn create_repository(&self, options: &RepositoryOptions) -> anyhow::Result<()> {
        self.record(RemoteCall::CreateRepository(options.clone()));
        if self.fail_at == Some(FailAt::Repository) {
            bail!("422 name already exists on this account");
        }
        Ok(())
    }

    async fn create_team(&self, options: &TeamOptions) -> anyhow::Result<TeamHandle> {
        self.record(RemoteCall::CreateTeam(options.clone()));
        if self.fail_at == Some(FailAt::Team) {
            bail!("502 bad gateway");
        }
        Ok(TeamHandle {
            organization: options.organization.clone(),
            id: 4242,
            slug: options.name.clone(),
        })
    }

    async fn add_member_to_team(&self, team: &TeamHandle, username: &str) -> anyhow::Result<()> {
        self.record(RemoteCall::AddMember {
            team: team.slug.clone(),
            username: username.to_string(),
        });
        if matches!(&self.fail_at, Some(FailAt::Member(failing)) if failing == username) {
            bail!("404 user {username} not found");
        }
        Ok(())
    }
}
