use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::Visibility;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryOptions {
    pub organization: String,
    pub name: String,
    pub visibility: Visibility,
    pub auto_init: bool,
    /// Install the push webhook on the new repository.
    pub hook: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TeamPermission {
    Pull,
    Push,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamOptions {
    pub organization: String,
    pub name: String,
    pub permission: TeamPermission,
    pub repo_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamHandle {
    pub organization: String,
    pub id: u64,
    pub slug: String,
}

/// Hosting platform operations needed to give a group its own workspace.
/// Every call can fail on its own; nothing here is transactional.
#[async_trait]
pub trait RemoteProvisioner: Send + Sync {
    async fn create_repository(&self, options: &RepositoryOptions) -> anyhow::Result<()>;

    async fn create_team(&self, options: &TeamOptions) -> anyhow::Result<TeamHandle>;

    async fn add_member_to_team(&self, team: &TeamHandle, username: &str) -> anyhow::Result<()>;
}
