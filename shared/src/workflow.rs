use std::sync::Arc;

use itertools::Itertools;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use tracing::{info, instrument, warn};

use crate::{
    validate_handle, ConflictReason, CoreError, CoreResult, CourseStore, EntityKey,
    GithubHandle, Group, GroupId, Organization, PersistenceGuard, ProvisionFailure,
    RemoteProvisioner, RepositoryOptions, TeamHandle, TeamOptions, TeamPermission, Visibility,
    MIN_GROUP_MEMBERS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub course: String,
    pub group_id: GroupId,
    pub actor: GithubHandle,
}

/// Remote resources created for an approved group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedResources {
    pub repository: String,
    pub team: TeamHandle,
    pub members: Vec<GithubHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalOutcome {
    pub group_id: GroupId,
    /// `None` when the course doesn't use per-group repositories, or when an
    /// interrupted activation was finished.
    pub resources: Option<ProvisionedResources>,
}

/// Group creation and approval for courses.
///
/// Lock order is always organization first, then group.
pub struct GroupService<S, P> {
    guard: Arc<PersistenceGuard<S>>,
    provisioner: Arc<P>,
}

impl<S, P> Clone for GroupService<S, P> {
    fn clone(&self) -> Self {
        Self {
            guard: self.guard.clone(),
            provisioner: self.provisioner.clone(),
        }
    }
}

impl<S: CourseStore, P: RemoteProvisioner> GroupService<S, P> {
    pub fn new(guard: Arc<PersistenceGuard<S>>, provisioner: Arc<P>) -> Self {
        Self { guard, provisioner }
    }

    /// Creates the organization record for a course taught by `teacher`.
    /// Returns false if the course already exists.
    #[instrument(skip(self))]
    pub async fn open_course(
        &self,
        course: &str,
        teacher: &str,
        group_assignments: u32,
        visibility: Visibility,
    ) -> CoreResult<bool> {
        validate_handle("course", course)?;
        validate_handle("teacher", teacher)?;

        let org_guard = self.guard.lock(EntityKey::organization(course)).await;
        if self.guard.find_organization(&org_guard, course).await?.is_some() {
            return Ok(false);
        }

        let mut organization = Organization::new(course);
        organization.add_teacher(teacher);
        organization.group_assignments = group_assignments;
        organization.visibility = visibility;
        self.guard
            .commit_organization(&org_guard, &organization)
            .await?;

        info!("Opened course {course} taught by {teacher}");
        Ok(true)
    }

    /// Grants assistant rights on a course. Only teachers may do this.
    #[instrument(skip(self))]
    pub async fn add_assistant(&self, course: &str, actor: &str, assistant: &str) -> CoreResult<()> {
        validate_handle("course", course)?;
        validate_handle("assistant", assistant)?;

        let org_guard = self.guard.lock(EntityKey::organization(course)).await;
        let mut organization = self.guard.load_organization(&org_guard, course).await?;
        if !organization.is_teacher(actor) {
            return Err(ConflictReason::NotAuthorized {
                actor: actor.to_string(),
                course: course.to_string(),
            }
            .into());
        }

        organization.add_assistant(assistant);
        self.guard
            .commit_organization(&org_guard, &organization)
            .await
    }

    /// Registers a new pending group with the given members and returns its id.
    #[instrument(skip(self, members), fields(members = members.len()))]
    pub async fn create_group(
        &self,
        course: &str,
        members: Vec<GithubHandle>,
    ) -> CoreResult<GroupId> {
        validate_handle("course", course)?;
        for member in &members {
            validate_handle("member", member)?;
        }

        let org_guard = self.guard.lock(EntityKey::organization(course)).await;
        let mut organization = self.guard.load_organization(&org_guard, course).await?;

        let id = reserve_group(&mut organization, &members)?;
        self.guard
            .commit_organization(&org_guard, &organization)
            .await?;
        self.write_new_group(course, id, members).await?;

        info!("Created pending group {id} in {course}");
        Ok(id)
    }

    /// Adds a member to a pending group. Returns false if they already belong to it.
    ///
    /// A student belongs to at most one group per course.
    #[instrument(skip(self))]
    pub async fn add_member(&self, course: &str, group_id: GroupId, username: &str) -> CoreResult<bool> {
        validate_handle("course", course)?;
        validate_handle("username", username)?;

        let org_guard = self.guard.lock(EntityKey::organization(course)).await;
        let mut organization = self.guard.load_organization(&org_guard, course).await?;
        let group_guard = self.guard.lock(EntityKey::group(course, group_id)).await;
        let mut group = self.guard.load_group(&group_guard, course, group_id).await?;

        if !group.add_member(username)? {
            return Ok(false);
        }
        organization.assign_member(username, group_id)?;

        self.guard
            .commit_organization(&org_guard, &organization)
            .await?;
        self.guard.commit_group(&group_guard, &group).await?;
        Ok(true)
    }

    /// Adds the user to the pool of students waiting to be placed in a random
    /// group. Returns false if they were already waiting.
    #[instrument(skip(self))]
    pub async fn request_random_group(&self, course: &str, username: &str) -> CoreResult<bool> {
        validate_handle("course", course)?;
        validate_handle("username", username)?;

        let org_guard = self.guard.lock(EntityKey::organization(course)).await;
        let mut organization = self.guard.load_organization(&org_guard, course).await?;
        if let Some(group) = organization.group_of(username) {
            return Err(ConflictReason::AlreadyInGroup {
                username: username.to_string(),
                group,
            }
            .into());
        }
        if !organization.request_random_group(username) {
            return Ok(false);
        }

        self.guard
            .commit_organization(&org_guard, &organization)
            .await?;
        Ok(true)
    }

    pub async fn form_random_groups(
        &self,
        course: &str,
        actor: &str,
        group_size: usize,
    ) -> CoreResult<Vec<GroupId>> {
        let mut rng = StdRng::from_entropy();
        self.form_random_groups_with(course, actor, group_size, &mut rng)
            .await
    }

    /// Splits the random-group pool into pending groups of `group_size`.
    ///
    /// A trailing chunk smaller than [`MIN_GROUP_MEMBERS`] joins the previous
    /// group; a pool of a single student is left waiting.
    #[instrument(skip(self, rng))]
    pub async fn form_random_groups_with<R: Rng + Send>(
        &self,
        course: &str,
        actor: &str,
        group_size: usize,
        rng: &mut R,
    ) -> CoreResult<Vec<GroupId>> {
        validate_handle("course", course)?;
        if group_size < MIN_GROUP_MEMBERS {
            return Err(CoreError::validation(format!(
                "group size must be at least {MIN_GROUP_MEMBERS}, got {group_size}"
            )));
        }

        let org_guard = self.guard.lock(EntityKey::organization(course)).await;
        let mut organization = self.guard.load_organization(&org_guard, course).await?;
        ensure_staff(&organization, actor)?;

        let mut pool: Vec<GithubHandle> =
            organization.pending_random_groups().iter().cloned().collect();
        if pool.len() < MIN_GROUP_MEMBERS {
            info!("Only {} student(s) waiting, no groups formed", pool.len());
            return Ok(vec![]);
        }
        pool.shuffle(rng);

        let mut chunks: Vec<Vec<GithubHandle>> =
            pool.chunks(group_size).map(<[_]>::to_vec).collect();
        if chunks.len() > 1 && chunks[chunks.len() - 1].len() < MIN_GROUP_MEMBERS {
            if let Some(leftover) = chunks.pop() {
                if let Some(last) = chunks.last_mut() {
                    last.extend(leftover);
                }
            }
        }

        let mut reserved = Vec::with_capacity(chunks.len());
        for members in chunks {
            let id = reserve_group(&mut organization, &members)?;
            reserved.push((id, members));
        }

        self.guard
            .commit_organization(&org_guard, &organization)
            .await?;
        let mut formed = Vec::with_capacity(reserved.len());
        for (id, members) in reserved {
            self.write_new_group(course, id, members).await?;
            formed.push(id);
        }
        info!(
            "Formed {} random group(s) in {course}: {}",
            formed.len(),
            formed.iter().join(", ")
        );
        Ok(formed)
    }

    /// Moves a pending group to active, provisioning its repository and team
    /// first when the course asks for per-group repositories.
    ///
    /// Nothing is changed or committed unless every remote call succeeded.
    /// Remote resources created before a failing call are left in place.
    ///
    /// The group must be pending on its organization. A group the
    /// organization already lists as approved is only activated, without
    /// provisioning again.
    #[instrument(skip(self, request), fields(course = request.course, group = request.group_id, actor = request.actor))]
    pub async fn approve_group(&self, request: &ApprovalRequest) -> CoreResult<ApprovalOutcome> {
        let ApprovalRequest {
            course,
            group_id,
            actor,
        } = request;
        validate_handle("course", course)?;
        validate_handle("actor", actor)?;

        let org_guard = self.guard.lock(EntityKey::organization(course)).await;
        let group_guard = self.guard.lock(EntityKey::group(course, *group_id)).await;

        let mut group = self
            .guard
            .load_group(&group_guard, course, *group_id)
            .await?;
        if group.is_active() {
            return Err(ConflictReason::AlreadyActive(group.id).into());
        }
        if group.member_count() < MIN_GROUP_MEMBERS {
            return Err(ConflictReason::InsufficientMembers {
                group: group.id,
                members: group.member_count(),
                required: MIN_GROUP_MEMBERS,
            }
            .into());
        }

        let mut organization = self.guard.load_organization(&org_guard, course).await?;
        ensure_staff(&organization, actor)?;

        if organization.is_approved(group.id) {
            info!("Finishing the interrupted activation of group {}", group.id);
            group.activate();
            self.guard.commit_group(&group_guard, &group).await?;
            return Ok(ApprovalOutcome {
                group_id: group.id,
                resources: None,
            });
        }
        if !organization.is_pending(group.id) {
            return Err(ConflictReason::NotPending(group.id).into());
        }

        let resources = if organization.requires_group_repositories() {
            Some(self.provision(&organization, &group).await?)
        } else {
            None
        };

        organization.approve_pending_group(group.id);
        self.guard
            .commit_organization(&org_guard, &organization)
            .await?;

        group.activate();
        self.guard.commit_group(&group_guard, &group).await?;

        info!("Group {} in {course} approved by {actor}", group.id);
        Ok(ApprovalOutcome {
            group_id: group.id,
            resources,
        })
    }

    async fn provision(
        &self,
        organization: &Organization,
        group: &Group,
    ) -> Result<ProvisionedResources, ProvisionFailure> {
        let name = group.repository_name();

        let repository = RepositoryOptions {
            organization: organization.name.clone(),
            name: name.clone(),
            visibility: organization.visibility,
            auto_init: true,
            hook: true,
        };
        self.provisioner
            .create_repository(&repository)
            .await
            .map_err(|err| {
                warn!("Couldn't create repository {name}: {err:#}");
                ProvisionFailure::Repository {
                    repository: name.clone(),
                    cause: format!("{err:#}"),
                }
            })?;

        let team_options = TeamOptions {
            organization: organization.name.clone(),
            name: name.clone(),
            permission: TeamPermission::Push,
            repo_names: vec![name.clone()],
        };
        let team = self
            .provisioner
            .create_team(&team_options)
            .await
            .map_err(|err| {
                warn!("Couldn't create team {name}, repository {name} is left behind: {err:#}");
                ProvisionFailure::Team {
                    team: name.clone(),
                    cause: format!("{err:#}"),
                }
            })?;

        let mut members = Vec::with_capacity(group.member_count());
        for username in group.members() {
            self.provisioner
                .add_member_to_team(&team, username)
                .await
                .map_err(|err| {
                    warn!("Couldn't add {username} to team {}: {err:#}", team.slug);
                    ProvisionFailure::Member {
                        team: team.slug.clone(),
                        username: username.clone(),
                        cause: format!("{err:#}"),
                    }
                })?;
            members.push(username.clone());
        }

        Ok(ProvisionedResources {
            repository: name,
            team,
            members,
        })
    }

    // Writes a group whose id the organization has already committed. If this
    // fails the id stays burned.
    async fn write_new_group(
        &self,
        course: &str,
        id: GroupId,
        members: Vec<GithubHandle>,
    ) -> CoreResult<()> {
        let group = Group::with_members(course, id, members);
        let group_guard = self.guard.lock(EntityKey::group(course, id)).await;
        self.guard.commit_group(&group_guard, &group).await
    }
}

/// Takes the next group id and records the members and the pending entry on
/// the organization. Nothing changes if a member already has a group.
fn reserve_group(organization: &mut Organization, members: &[GithubHandle]) -> CoreResult<GroupId> {
    if let Some((username, group)) = members
        .iter()
        .find_map(|member| Some((member, organization.group_of(member)?)))
    {
        return Err(ConflictReason::AlreadyInGroup {
            username: username.clone(),
            group,
        }
        .into());
    }

    let id = organization.next_group_id();
    for member in members {
        organization.assign_member(member, id)?;
    }
    organization.add_pending_group(id);
    Ok(id)
}

fn ensure_staff(organization: &Organization, actor: &str) -> CoreResult<()> {
    if organization.is_staff(actor) {
        return Ok(());
    }
    Err(ConflictReason::NotAuthorized {
        actor: actor.to_string(),
        course: organization.name.clone(),
    }
    .into())
}
