use std::{path::PathBuf, sync::Arc};

use autograder_bot::{
    api::GithubClient,
    commands::{Command, Context},
    store::FileStore,
};
use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

#[derive(Deserialize)]
struct Env {
    github_token: String,
    webhook_url: Option<String>,
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let env = envy::from_env::<Env>()?;

    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = Command::parse_args(&args)?;

    let github = GithubClient::new(env.github_token, env.webhook_url).await?;
    info!(
        "Acting as {} with data in {}",
        github.user_handle,
        env.data_dir.display()
    );
    let context = Context::new(Arc::new(FileStore::new(env.data_dir)), Arc::new(github));

    match command.execute(&context).await {
        Ok(summary) => {
            println!("{summary}");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {err:#}");
            Err(err)
        }
    }
}
