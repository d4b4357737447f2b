use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tracing::{debug, instrument};

use shared::{CourseStore, Group, GroupId, Organization, ProfileStore, UserProfile};

/// Stores every entity as a pretty-printed JSON document under `root`:
///
/// ```text
/// users/<username>.json
/// orgs/<course>/organization.json
/// orgs/<course>/groups/<id>.json
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_path(&self, username: &str) -> PathBuf {
        self.root.join("users").join(format!("{username}.json"))
    }

    fn course_dir(&self, course: &str) -> PathBuf {
        self.root.join("orgs").join(course)
    }

    fn organization_path(&self, course: &str) -> PathBuf {
        self.course_dir(course).join("organization.json")
    }

    fn group_path(&self, course: &str, id: GroupId) -> PathBuf {
        self.course_dir(course)
            .join("groups")
            .join(format!("{id}.json"))
    }

    async fn read<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
        let raw = match fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", path.display()))
            }
        };

        let value = serde_json::from_slice(&raw)
            .with_context(|| format!("Corrupted record at {}", path.display()))?;
        Ok(Some(value))
    }

    // Readers never observe a half-written record: the document goes to a
    // sibling temp file first and is renamed over the target.
    #[instrument(skip(value))]
    async fn write<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let raw = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to move {} into place", tmp.display()))?;

        debug!("Wrote {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for FileStore {
    async fn load_user(&self, username: &str) -> anyhow::Result<Option<UserProfile>> {
        Self::read(&self.user_path(username)).await
    }

    async fn save_user(&self, profile: &UserProfile) -> anyhow::Result<()> {
        Self::write(&self.user_path(&profile.username), profile).await
    }
}

#[async_trait]
impl CourseStore for FileStore {
    async fn load_organization(&self, course: &str) -> anyhow::Result<Option<Organization>> {
        Self::read(&self.organization_path(course)).await
    }

    async fn save_organization(&self, organization: &Organization) -> anyhow::Result<()> {
        Self::write(&self.organization_path(&organization.name), organization).await
    }

    async fn load_group(&self, course: &str, id: GroupId) -> anyhow::Result<Option<Group>> {
        Self::read(&self.group_path(course, id)).await
    }

    async fn save_group(&self, group: &Group) -> anyhow::Result<()> {
        Self::write(&self.group_path(&group.course, group.id), group).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_records_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        assert!(store.load_user("nobody").await.unwrap().is_none());
        assert!(store.load_organization("dat100").await.unwrap().is_none());
        assert!(store.load_group("dat100", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn profiles_survive_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let profile = UserProfile::new("alice");
        profile.increase_score(120);
        profile.trophy_chest().award(shared::Trophy::new("first-pr", "First PR"));
        FileStore::new(dir.path()).save_user(&profile).await.unwrap();

        let reopened = FileStore::new(dir.path());
        let loaded = reopened.load_user("alice").await.unwrap().unwrap();
        assert_eq!(loaded.total_score(), 120);
        assert_eq!(loaded.level(), profile.level());
        assert!(loaded.trophy_chest().has("first-pr"));
        assert!(dir.path().join("users/alice.json").exists());
        assert!(!dir.path().join("users/alice.json.tmp").exists());
    }

    #[tokio::test]
    async fn groups_live_under_their_course() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let mut organization = Organization::new("dat320");
        let id = organization.next_group_id();
        organization.add_pending_group(id);
        let group = Group::with_members("dat320", id, vec!["bob".into(), "alice".into()]);
        store.save_group(&group).await.unwrap();
        store.save_organization(&organization).await.unwrap();

        assert!(dir.path().join("orgs/dat320/groups/1.json").exists());
        assert_eq!(store.load_group("dat320", id).await.unwrap(), Some(group));
        assert_eq!(
            store.load_organization("dat320").await.unwrap(),
            Some(organization)
        );
    }

    #[tokio::test]
    async fn corrupted_records_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("users")).unwrap();
        std::fs::write(dir.path().join("users/mallory.json"), "{ not json").unwrap();

        let err = FileStore::new(dir.path())
            .load_user("mallory")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Corrupted record"));
    }
}
