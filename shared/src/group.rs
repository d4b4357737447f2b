use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{ConflictReason, CoreResult, GithubHandle, GroupId};

/// Smallest group that can be approved.
pub const MIN_GROUP_MEMBERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GroupStatus {
    #[default]
    Pending,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub course: String,
    pub id: GroupId,
    #[serde(default)]
    members: BTreeSet<GithubHandle>,
    #[serde(default)]
    status: GroupStatus,
}

impl Group {
    pub fn new(course: impl Into<String>, id: GroupId) -> Self {
        Self {
            course: course.into(),
            id,
            members: BTreeSet::new(),
            status: GroupStatus::Pending,
        }
    }

    pub fn with_members(
        course: impl Into<String>,
        id: GroupId,
        members: impl IntoIterator<Item = GithubHandle>,
    ) -> Self {
        Self {
            members: members.into_iter().collect(),
            ..Self::new(course, id)
        }
    }

    /// Membership is frozen once the group is active.
    pub fn add_member(&mut self, username: impl Into<GithubHandle>) -> CoreResult<bool> {
        if self.is_active() {
            return Err(ConflictReason::MembershipFrozen(self.id).into());
        }
        Ok(self.members.insert(username.into()))
    }

    /// Members in lexicographic order.
    pub fn members(&self) -> impl Iterator<Item = &GithubHandle> {
        self.members.iter()
    }

    pub fn has_member(&self, username: &str) -> bool {
        self.members.contains(username)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn status(&self) -> GroupStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == GroupStatus::Active
    }

    pub fn repository_name(&self) -> String {
        format!("group{}", self.id)
    }

    // One-way. Only the approval workflow calls this, after the organization
    // side has been committed.
    pub(crate) fn activate(&mut self) {
        self.status = GroupStatus::Active;
    }
}
