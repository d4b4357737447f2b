use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::{EntityKind, GithubHandle, Group, GroupId, Organization, UserProfile};

/// Identity of a persisted entity. Also the key of its persistence lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    User(GithubHandle),
    Organization(String),
    Group { course: String, id: GroupId },
}

impl EntityKey {
    pub fn user(username: impl Into<GithubHandle>) -> Self {
        Self::User(username.into())
    }

    pub fn organization(course: impl Into<String>) -> Self {
        Self::Organization(course.into())
    }

    pub fn group(course: impl Into<String>, id: GroupId) -> Self {
        Self::Group {
            course: course.into(),
            id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityKey::User(_) => EntityKind::User,
            EntityKey::Organization(_) => EntityKind::Organization,
            EntityKey::Group { .. } => EntityKind::Group,
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::User(username) => write!(f, "{username}"),
            EntityKey::Organization(course) => write!(f, "{course}"),
            EntityKey::Group { course, id } => write!(f, "{course}/{id}"),
        }
    }
}

pub trait Persist {
    fn entity_key(&self) -> EntityKey;
}

impl Persist for UserProfile {
    fn entity_key(&self) -> EntityKey {
        EntityKey::user(self.username.clone())
    }
}

impl Persist for Organization {
    fn entity_key(&self) -> EntityKey {
        EntityKey::organization(self.name.clone())
    }
}

impl Persist for Group {
    fn entity_key(&self) -> EntityKey {
        EntityKey::group(self.course.clone(), self.id)
    }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load_user(&self, username: &str) -> anyhow::Result<Option<UserProfile>>;
    /// Replaces any previously stored version.
    async fn save_user(&self, profile: &UserProfile) -> anyhow::Result<()>;
}

#[async_trait]
pub trait CourseStore: Send + Sync {
    async fn load_organization(&self, course: &str) -> anyhow::Result<Option<Organization>>;
    async fn save_organization(&self, organization: &Organization) -> anyhow::Result<()>;
    async fn load_group(&self, course: &str, id: GroupId) -> anyhow::Result<Option<Group>>;
    async fn save_group(&self, group: &Group) -> anyhow::Result<()>;
}

/// Store that keeps the serialized form of every entity in memory.
///
/// Entities go through `serde_json` on the way in and out, so nothing loaded
/// from it shares state with what was saved.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<EntityKey, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get<T: DeserializeOwned>(&self, key: &EntityKey) -> anyhow::Result<Option<T>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .map(|raw| serde_json::from_str(raw))
            .transpose()
            .map_err(Into::into)
    }

    fn put<T: Serialize + Persist>(&self, entity: &T) -> anyhow::Result<()> {
        let raw = serde_json::to_string(entity)?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity.entity_key(), raw);
        Ok(())
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn load_user(&self, username: &str) -> anyhow::Result<Option<UserProfile>> {
        self.get(&EntityKey::user(username))
    }

    async fn save_user(&self, profile: &UserProfile) -> anyhow::Result<()> {
        self.put(profile)
    }
}

#[async_trait]
impl CourseStore for MemoryStore {
    async fn load_organization(&self, course: &str) -> anyhow::Result<Option<Organization>> {
        self.get(&EntityKey::organization(course))
    }

    async fn save_organization(&self, organization: &Organization) -> anyhow::Result<()> {
        self.put(organization)
    }

    async fn load_group(&self, course: &str, id: GroupId) -> anyhow::Result<Option<Group>> {
        self.get(&EntityKey::group(course, id))
    }

    async fn save_group(&self, group: &Group) -> anyhow::Result<()> {
        self.put(group)
    }
}
