use strum::Display;

use crate::{GithubHandle, GroupId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum EntityKind {
    User,
    Organization,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConflictReason {
    #[error("group {0} is already active")]
    AlreadyActive(GroupId),
    #[error("group {group} has {members} member(s), at least {required} are required")]
    InsufficientMembers {
        group: GroupId,
        members: usize,
        required: usize,
    },
    #[error("{actor} is not teaching or assisting {course}")]
    NotAuthorized { actor: GithubHandle, course: String },
    #[error("group {0} is active, its membership can't change")]
    MembershipFrozen(GroupId),
    #[error("group {0} is not awaiting approval")]
    NotPending(GroupId),
    #[error("{username} is already a member of group {group}")]
    AlreadyInGroup { username: GithubHandle, group: GroupId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ProvisionStep {
    RepositoryCreation,
    TeamCreation,
    MemberAdd,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvisionFailure {
    #[error("couldn't create repository {repository}: {cause}")]
    Repository { repository: String, cause: String },
    #[error("couldn't create team {team}: {cause}")]
    Team { team: String, cause: String },
    #[error("couldn't add {username} to team {team}: {cause}")]
    Member {
        team: String,
        username: GithubHandle,
        cause: String,
    },
}

impl ProvisionFailure {
    pub fn step(&self) -> ProvisionStep {
        match self {
            ProvisionFailure::Repository { .. } => ProvisionStep::RepositoryCreation,
            ProvisionFailure::Team { .. } => ProvisionStep::TeamCreation,
            ProvisionFailure::Member { .. } => ProvisionStep::MemberAdd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("{kind} {key} not found")]
    NotFound { kind: EntityKind, key: String },
    #[error("conflict: {0}")]
    Conflict(#[from] ConflictReason),
    #[error("remote provisioning failed at {step}: {0}", step = .0.step())]
    RemoteProvision(#[from] ProvisionFailure),
    #[error("couldn't persist {kind} {key}: {cause}")]
    Persistence {
        kind: EntityKind,
        key: String,
        cause: String,
    },
}

impl CoreError {
    pub fn not_found(kind: EntityKind, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Accepts platform handles and course names: non-empty, no whitespace or path separators.
pub fn validate_handle(what: &str, value: &str) -> CoreResult<()> {
    if value.is_empty() {
        return Err(CoreError::validation(format!("{what} is empty")));
    }
    if value
        .chars()
        .any(|c| c.is_whitespace() || c == '/' || c == '\\')
    {
        return Err(CoreError::validation(format!(
            "{what} `{value}` contains forbidden characters"
        )));
    }
    if value == "." || value == ".." {
        return Err(CoreError::validation(format!("{what} `{value}` is reserved")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_validated() {
        assert!(validate_handle("username", "octo-cat").is_ok());
        assert!(validate_handle("username", "").is_err());
        assert!(validate_handle("username", "two words").is_err());
        assert!(validate_handle("course", "../etc").is_err());
        assert!(validate_handle("course", "..").is_err());
    }

    #[test]
    fn remote_failures_name_their_step() {
        let failure = ProvisionFailure::Member {
            team: "group3".to_string(),
            username: "bob".to_string(),
            cause: "404".to_string(),
        };
        assert_eq!(failure.step(), ProvisionStep::MemberAdd);

        let error = CoreError::from(failure);
        assert_eq!(
            error.to_string(),
            "remote provisioning failed at member-add: couldn't add bob to team group3: 404"
        );
    }
}
