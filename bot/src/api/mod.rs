use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use shared::{
    RemoteIdentity, RemoteProvisioner, RepositoryOptions, TeamHandle, TeamOptions, Visibility,
};

/// Looks up account details on the hosting platform.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn get_identity(&self, login: &str) -> anyhow::Result<RemoteIdentity>;
}

#[derive(Clone)]
pub struct GithubClient {
    octocrab: octocrab::Octocrab,
    webhook_url: Option<String>,
    pub user_handle: String,
}

#[derive(Debug, Deserialize)]
struct CreatedTeam {
    id: u64,
    slug: String,
}

impl GithubClient {
    pub async fn new(github_token: String, webhook_url: Option<String>) -> anyhow::Result<Self> {
        let octocrab = octocrab::Octocrab::builder()
            .personal_token(github_token)
            .build()?;
        let user_handle = octocrab.current().user().await?.login;

        Ok(Self {
            octocrab,
            webhook_url,
            user_handle,
        })
    }

    #[instrument(skip(self, url))]
    async fn create_push_hook(&self, organization: &str, repo: &str, url: &str) -> anyhow::Result<()> {
        let _: serde_json::Value = self
            .octocrab
            .post(
                format!("/repos/{organization}/{repo}/hooks"),
                Some(&json!({
                    "name": "web",
                    "active": true,
                    "events": ["push"],
                    "config": {
                        "url": url,
                        "content_type": "json",
                    },
                })),
            )
            .await?;

        Ok(())
    }
}

#[async_trait]
impl IdentityLookup for GithubClient {
    #[instrument(skip(self))]
    async fn get_identity(&self, login: &str) -> anyhow::Result<RemoteIdentity> {
        let identity = self
            .octocrab
            .get(format!("/users/{login}"), None::<&()>)
            .await?;

        Ok(identity)
    }
}

#[async_trait]
impl RemoteProvisioner for GithubClient {
    #[instrument(skip(self, options), fields(org = options.organization, repo = options.name))]
    async fn create_repository(&self, options: &RepositoryOptions) -> anyhow::Result<()> {
        let _: serde_json::Value = self
            .octocrab
            .post(
                format!("/orgs/{}/repos", options.organization),
                Some(&json!({
                    "name": options.name,
                    "private": options.visibility == Visibility::Private,
                    "auto_init": options.auto_init,
                })),
            )
            .await?;
        info!("Created repository {}/{}", options.organization, options.name);

        if options.hook {
            match &self.webhook_url {
                Some(url) => {
                    self.create_push_hook(&options.organization, &options.name, url)
                        .await?
                }
                None => info!("No webhook url configured, skipping hook for {}", options.name),
            }
        }

        Ok(())
    }

    #[instrument(skip(self, options), fields(org = options.organization, team = options.name))]
    async fn create_team(&self, options: &TeamOptions) -> anyhow::Result<TeamHandle> {
        let repo_names: Vec<String> = options
            .repo_names
            .iter()
            .map(|repo| format!("{}/{repo}", options.organization))
            .collect();

        let team: CreatedTeam = self
            .octocrab
            .post(
                format!("/orgs/{}/teams", options.organization),
                Some(&json!({
                    "name": options.name,
                    "permission": options.permission.to_string(),
                    "repo_names": repo_names,
                    "privacy": "closed",
                })),
            )
            .await?;

        info!("Created team {} ({})", team.slug, team.id);
        Ok(TeamHandle {
            organization: options.organization.clone(),
            id: team.id,
            slug: team.slug,
        })
    }

    #[instrument(skip(self, team), fields(team = team.slug))]
    async fn add_member_to_team(&self, team: &TeamHandle, username: &str) -> anyhow::Result<()> {
        let _: serde_json::Value = self
            .octocrab
            .put(
                format!(
                    "/orgs/{}/teams/{}/memberships/{username}",
                    team.organization, team.slug
                ),
                Some(&json!({ "role": "member" })),
            )
            .await?;

        Ok(())
    }
}
