use std::{str::FromStr, sync::Arc};

use anyhow::{anyhow, bail, Context as _};
use itertools::Itertools;
use tracing::{info, instrument};

use shared::{
    ApprovalRequest, CourseStore, GroupId, GroupService, PersistenceGuard, ProfileService,
    ProfileStore, RemoteProvisioner, ScoreSnapshot, Visibility,
};

use crate::api::IdentityLookup;

pub const USAGE: &str = "\
usage: autograder-bot <command> [args]

  register <user>
  import <user>
  award <user> <points>
  penalize <user> <points>
  level-up <user>
  level-down <user>
  score <user>
  open-course <course> <teacher> [group-assignments] [public|private]
  add-assistant <course> <teacher> <assistant>
  create-group <course> <member>...
  join-group <course> <group-id> <user>
  request-random <course> <user>
  form-groups <course> <staff> <size>
  approve <course> <group-id> <staff>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Register(String),
    Import(String),
    Award { username: String, amount: u32 },
    Penalize { username: String, amount: u32 },
    LevelUp(String),
    LevelDown(String),
    Score(String),
    OpenCourse {
        course: String,
        teacher: String,
        group_assignments: u32,
        visibility: Visibility,
    },
    AddAssistant {
        course: String,
        actor: String,
        assistant: String,
    },
    CreateGroup {
        course: String,
        members: Vec<String>,
    },
    JoinGroup {
        course: String,
        group_id: GroupId,
        username: String,
    },
    RequestRandom {
        course: String,
        username: String,
    },
    FormGroups {
        course: String,
        actor: String,
        size: usize,
    },
    Approve(ApprovalRequest),
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> anyhow::Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing <{name}>"))
}

fn number<T>(args: &[String], index: usize, name: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = arg(args, index, name)?;
    raw.parse()
        .with_context(|| format!("<{name}> must be a number, got {raw:?}"))
}

impl Command {
    /// Parses a command name followed by its arguments.
    pub fn parse_command(command: &str, args: &[String]) -> anyhow::Result<Command> {
        let user = || arg(args, 0, "user").map(str::to_string);

        Ok(match command {
            "register" | "signup" => Command::Register(user()?),
            "import" | "sync" => Command::Import(user()?),
            "award" | "score-up" => Command::Award {
                username: user()?,
                amount: number(args, 1, "points")?,
            },
            "penalize" | "score-down" => Command::Penalize {
                username: user()?,
                amount: number(args, 1, "points")?,
            },
            "level-up" => Command::LevelUp(user()?),
            "level-down" => Command::LevelDown(user()?),
            "score" | "show" => Command::Score(user()?),
            "open-course" => Command::OpenCourse {
                course: arg(args, 0, "course")?.to_string(),
                teacher: arg(args, 1, "teacher")?.to_string(),
                group_assignments: match args.get(2) {
                    Some(_) => number(args, 2, "group-assignments")?,
                    None => 0,
                },
                visibility: match args.get(3).map(String::as_str) {
                    None | Some("private") => Visibility::Private,
                    Some("public") => Visibility::Public,
                    Some(other) => bail!("unknown visibility {other:?}"),
                },
            },
            "add-assistant" => Command::AddAssistant {
                course: arg(args, 0, "course")?.to_string(),
                actor: arg(args, 1, "teacher")?.to_string(),
                assistant: arg(args, 2, "assistant")?.to_string(),
            },
            "create-group" => {
                let course = arg(args, 0, "course")?.to_string();
                Command::CreateGroup {
                    course,
                    members: args[1..].to_vec(),
                }
            }
            "join-group" | "join" => Command::JoinGroup {
                course: arg(args, 0, "course")?.to_string(),
                group_id: number(args, 1, "group-id")?,
                username: arg(args, 2, "user")?.to_string(),
            },
            "request-random" => Command::RequestRandom {
                course: arg(args, 0, "course")?.to_string(),
                username: arg(args, 1, "user")?.to_string(),
            },
            "form-groups" => Command::FormGroups {
                course: arg(args, 0, "course")?.to_string(),
                actor: arg(args, 1, "staff")?.to_string(),
                size: number(args, 2, "size")?,
            },
            "approve" | "accept" => Command::Approve(ApprovalRequest {
                course: arg(args, 0, "course")?.to_string(),
                group_id: number::<GroupId>(args, 1, "group-id")?,
                actor: arg(args, 2, "staff")?.to_string(),
            }),
            _ => {
                info!("Unknown command: {command}");
                bail!("unknown command {command:?}\n\n{USAGE}")
            }
        })
    }

    pub fn parse_args(args: &[String]) -> anyhow::Result<Command> {
        match args.split_first() {
            Some((command, rest)) => Self::parse_command(command, rest),
            None => bail!("{USAGE}"),
        }
    }

    #[instrument(skip(self, context))]
    pub async fn execute<S, P>(&self, context: &Context<S, P>) -> anyhow::Result<String>
    where
        S: ProfileStore + CourseStore,
        P: RemoteProvisioner + IdentityLookup,
    {
        let profiles = &context.profiles;
        let groups = &context.groups;

        Ok(match self {
            Command::Register(username) => {
                if profiles.register(username).await? {
                    format!("Registered {username}")
                } else {
                    format!("{username} is already registered")
                }
            }
            Command::Import(username) => {
                let identity = context.github.get_identity(username).await?;
                profiles.import_identity(&identity).await?;
                format!("Imported profile of {}", identity.login)
            }
            Command::Award { username, amount } => {
                describe(username, &profiles.award(username, *amount).await?)
            }
            Command::Penalize { username, amount } => {
                describe(username, &profiles.penalize(username, *amount).await?)
            }
            Command::LevelUp(username) => {
                format!("{username} is now level {}", profiles.level_up(username).await?)
            }
            Command::LevelDown(username) => {
                format!(
                    "{username} is now level {}",
                    profiles.level_down(username).await?
                )
            }
            Command::Score(username) => {
                let snapshot = profiles.score(username).await?;
                let trophies = profiles.trophies(username).await?;
                let mut summary = describe(username, &snapshot);
                if !trophies.is_empty() {
                    summary.push_str(&format!(
                        ", trophies: {}",
                        trophies.iter().map(|trophy| &trophy.title).join(", ")
                    ));
                }
                summary
            }
            Command::OpenCourse {
                course,
                teacher,
                group_assignments,
                visibility,
            } => {
                if groups
                    .open_course(course, teacher, *group_assignments, *visibility)
                    .await?
                {
                    format!("Opened {course} with {teacher} as teacher")
                } else {
                    format!("{course} already exists")
                }
            }
            Command::AddAssistant {
                course,
                actor,
                assistant,
            } => {
                groups.add_assistant(course, actor, assistant).await?;
                format!("{assistant} assists in {course}")
            }
            Command::CreateGroup { course, members } => {
                let id = groups.create_group(course, members.clone()).await?;
                format!("Created pending group {id} in {course}")
            }
            Command::JoinGroup {
                course,
                group_id,
                username,
            } => {
                if groups.add_member(course, *group_id, username).await? {
                    format!("{username} joined group {group_id} in {course}")
                } else {
                    format!("{username} is already in group {group_id}")
                }
            }
            Command::RequestRandom { course, username } => {
                if groups.request_random_group(course, username).await? {
                    format!("{username} is waiting for a random group in {course}")
                } else {
                    format!("{username} was already waiting in {course}")
                }
            }
            Command::FormGroups {
                course,
                actor,
                size,
            } => {
                let formed = groups.form_random_groups(course, actor, *size).await?;
                if formed.is_empty() {
                    format!("Not enough students waiting in {course}")
                } else {
                    format!("Formed groups {} in {course}", formed.iter().join(", "))
                }
            }
            Command::Approve(request) => {
                let outcome = groups.approve_group(request).await?;
                match outcome.resources {
                    Some(resources) => format!(
                        "Approved group {}: repository {}, team {} with {}",
                        outcome.group_id,
                        resources.repository,
                        resources.team.slug,
                        resources.members.iter().join(", ")
                    ),
                    None => format!("Approved group {}", outcome.group_id),
                }
            }
        })
    }
}

fn describe(username: &str, snapshot: &ScoreSnapshot) -> String {
    format!(
        "{username}: {} points, level {}",
        snapshot.total_score, snapshot.level
    )
}

pub struct Context<S, P> {
    pub github: Arc<P>,
    pub profiles: ProfileService<S>,
    pub groups: GroupService<S, P>,
}

impl<S: ProfileStore + CourseStore, P: RemoteProvisioner> Context<S, P> {
    pub fn new(store: Arc<S>, github: Arc<P>) -> Self {
        let guard = Arc::new(PersistenceGuard::new(store));
        Self {
            profiles: ProfileService::new(guard.clone()),
            groups: GroupService::new(guard, github.clone()),
            github,
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use shared::{
        CoreError, MemoryStore, RemoteIdentity, RepositoryOptions, TeamHandle, TeamOptions,
    };

    use super::*;

    struct OfflineGithub;

    #[async_trait]
    impl RemoteProvisioner for OfflineGithub {
        async fn create_repository(&self, _: &RepositoryOptions) -> anyhow::Result<()> {
            Ok(())
        }

        async fn create_team(&self, options: &TeamOptions) -> anyhow::Result<TeamHandle> {
            Ok(TeamHandle {
                organization: options.organization.clone(),
                id: 1,
                slug: options.name.clone(),
            })
        }

        async fn add_member_to_team(&self, _: &TeamHandle, _: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl IdentityLookup for OfflineGithub {
        async fn get_identity(&self, login: &str) -> anyhow::Result<RemoteIdentity> {
            Ok(RemoteIdentity {
                login: login.to_string(),
                name: Some("Alice Liddell".to_string()),
                ..Default::default()
            })
        }
    }

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    async fn run(context: &Context<MemoryStore, OfflineGithub>, line: &str) -> anyhow::Result<String> {
        Command::parse_args(&args(line))?.execute(context).await
    }

    fn context() -> Context<MemoryStore, OfflineGithub> {
        Context::new(Arc::new(MemoryStore::new()), Arc::new(OfflineGithub))
    }

    #[test]
    fn parses_aliases_and_numbers() {
        assert_eq!(
            Command::parse_args(&args("score-up alice 30")).unwrap(),
            Command::Award {
                username: "alice".to_string(),
                amount: 30
            }
        );
        assert_eq!(
            Command::parse_args(&args("accept dat320 4 prof-x")).unwrap(),
            Command::Approve(ApprovalRequest {
                course: "dat320".to_string(),
                group_id: 4,
                actor: "prof-x".to_string(),
            })
        );
        assert_eq!(
            Command::parse_args(&args("open-course dat320 prof-x")).unwrap(),
            Command::OpenCourse {
                course: "dat320".to_string(),
                teacher: "prof-x".to_string(),
                group_assignments: 0,
                visibility: Visibility::Private,
            }
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(Command::parse_args(&[]).is_err());
        assert!(Command::parse_args(&args("award alice"))
            .unwrap_err()
            .to_string()
            .contains("missing <points>"));
        assert!(Command::parse_args(&args("award alice lots")).is_err());
        assert!(Command::parse_args(&args("open-course dat320 prof-x 1 secret")).is_err());
        assert!(Command::parse_args(&args("dance alice"))
            .unwrap_err()
            .to_string()
            .starts_with("unknown command"));
    }

    #[tokio::test]
    async fn profile_commands_report_progress() {
        let context = context();

        assert_eq!(run(&context, "register alice").await.unwrap(), "Registered alice");
        assert_eq!(
            run(&context, "register alice").await.unwrap(),
            "alice is already registered"
        );
        assert_eq!(
            run(&context, "award alice 60").await.unwrap(),
            "alice: 60 points, level 1"
        );
        assert_eq!(
            run(&context, "penalize alice 100").await.unwrap(),
            "alice: 0 points, level 0"
        );
        assert_eq!(
            run(&context, "import alice").await.unwrap(),
            "Imported profile of alice"
        );

        let err = run(&context, "award bob 5").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn course_commands_drive_the_group_workflow() {
        let context = context();

        run(&context, "open-course dat320 prof-x 1 public").await.unwrap();
        run(&context, "add-assistant dat320 prof-x ta-y").await.unwrap();
        assert_eq!(
            run(&context, "create-group dat320 carol").await.unwrap(),
            "Created pending group 1 in dat320"
        );
        assert_eq!(
            run(&context, "join dat320 1 bob").await.unwrap(),
            "bob joined group 1 in dat320"
        );
        assert_eq!(
            run(&context, "approve dat320 1 ta-y").await.unwrap(),
            "Approved group 1: repository group1, team group1 with bob, carol"
        );

        let err = run(&context, "approve dat320 1 ta-y").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::Conflict(_))
        ));
    }
}
