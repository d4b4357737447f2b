use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{ConflictReason, CoreResult, GithubHandle};

pub type GroupId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

/// A course hosted as an organization on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub name: String,
    group_count: GroupId,
    #[serde(default)]
    pending_groups: BTreeSet<GroupId>,
    #[serde(default)]
    pending_random_groups: BTreeSet<GithubHandle>,
    /// Groups whose approval was recorded here but whose own record may
    /// still say pending.
    #[serde(default)]
    approved_groups: BTreeSet<GroupId>,
    /// The group each student belongs to in this course.
    #[serde(default)]
    group_of: BTreeMap<GithubHandle, GroupId>,
    /// Number of group assignments; any value above zero means every approved
    /// group gets its own repository and team.
    #[serde(default)]
    pub group_assignments: u32,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    teachers: BTreeSet<GithubHandle>,
    #[serde(default)]
    assistants: BTreeSet<GithubHandle>,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group_count: 0,
            pending_groups: BTreeSet::new(),
            pending_random_groups: BTreeSet::new(),
            approved_groups: BTreeSet::new(),
            group_of: BTreeMap::new(),
            group_assignments: 0,
            visibility: Visibility::default(),
            teachers: BTreeSet::new(),
            assistants: BTreeSet::new(),
        }
    }

    pub fn group_count(&self) -> GroupId {
        self.group_count
    }

    /// Reserves the next group identifier. Identifiers are never handed out twice.
    pub fn next_group_id(&mut self) -> GroupId {
        self.group_count += 1;
        self.group_count
    }

    pub fn pending_groups(&self) -> &BTreeSet<GroupId> {
        &self.pending_groups
    }

    pub fn is_pending(&self, group: GroupId) -> bool {
        self.pending_groups.contains(&group)
    }

    pub fn add_pending_group(&mut self, group: GroupId) -> bool {
        self.pending_groups.insert(group)
    }

    /// Moves a pending group to the approved set. Returns false if it wasn't pending.
    pub fn approve_pending_group(&mut self, group: GroupId) -> bool {
        if !self.pending_groups.remove(&group) {
            return false;
        }
        self.approved_groups.insert(group)
    }

    pub fn is_approved(&self, group: GroupId) -> bool {
        self.approved_groups.contains(&group)
    }

    pub fn group_of(&self, username: &str) -> Option<GroupId> {
        self.group_of.get(username).copied()
    }

    /// Records the student as a member of `group` and drops any random-group
    /// request they had. Fails if they already belong to another group.
    pub fn assign_member(&mut self, username: &str, group: GroupId) -> CoreResult<()> {
        match self.group_of(username) {
            Some(current) if current != group => Err(ConflictReason::AlreadyInGroup {
                username: username.to_string(),
                group: current,
            }
            .into()),
            _ => {
                self.group_of.insert(username.to_string(), group);
                self.pending_random_groups.remove(username);
                Ok(())
            }
        }
    }

    pub fn pending_random_groups(&self) -> &BTreeSet<GithubHandle> {
        &self.pending_random_groups
    }

    /// Returns false if the user had already asked to be placed in a random group.
    pub fn request_random_group(&mut self, username: impl Into<GithubHandle>) -> bool {
        self.pending_random_groups.insert(username.into())
    }

    pub fn remove_random_request(&mut self, username: &str) -> bool {
        self.pending_random_groups.remove(username)
    }

    pub fn requires_group_repositories(&self) -> bool {
        self.group_assignments > 0
    }

    pub fn add_teacher(&mut self, username: impl Into<GithubHandle>) {
        self.teachers.insert(username.into());
    }

    pub fn add_assistant(&mut self, username: impl Into<GithubHandle>) {
        self.assistants.insert(username.into());
    }

    pub fn is_teacher(&self, username: &str) -> bool {
        self.teachers.contains(username)
    }

    /// Teachers and teaching assistants may approve and form groups.
    pub fn is_staff(&self, username: &str) -> bool {
        self.is_teacher(username) || self.assistants.contains(username)
    }
}
