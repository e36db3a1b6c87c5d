/// Project-level authorization
///
/// # Permission Model
///
/// 1. **Project access**: the owner, or a user with an active membership
/// 2. **Owner-only actions**: deleting tasks or the project, inviting members
/// 3. **Assignment**: owners assign to any member; members only to themselves
/// 4. **Task edits**: owners edit anything; members edit tasks they created or
///    are assigned to
///
/// The async helpers load what they need from the database; the policy functions
/// are pure so the rules can be tested without one.
///
/// # Example
///
/// ```no_run
/// use taskdeck_shared::auth::authorization::ProjectAccess;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// async fn delete_guard(pool: &PgPool, project_id: Uuid, user_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
///     let mut conn = pool.acquire().await?;
///     let access = ProjectAccess::load(&mut *conn, project_id, user_id).await?;
///     access.require_owner()?;
///     Ok(())
/// }
/// ```

use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::membership::Membership;
use crate::models::project::Project;
use crate::models::task::Task;

/// Error type for authorization checks
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    /// Project does not exist
    #[error("Project {0} not found")]
    ProjectNotFound(Uuid),

    /// User is neither owner nor active member
    #[error("Not a member of project {0}")]
    NotMember(Uuid),

    /// Action is reserved for the project owner
    #[error("Only the project owner can do this")]
    NotOwner,

    /// Assignee is outside the set the actor may assign to
    #[error("Members can only assign tasks to themselves.")]
    AssignmentNotAllowed,

    /// Member tried to edit a task that is not theirs
    #[error("Members can edit only their tasks.")]
    EditNotAllowed,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Resolved access of one user to one project
#[derive(Debug, Clone)]
pub struct ProjectAccess {
    pub project: Project,
    pub user_id: Uuid,
    pub is_owner: bool,
}

impl ProjectAccess {
    /// Loads the project and checks that the user may see it
    ///
    /// # Errors
    ///
    /// - `AuthzError::ProjectNotFound` if the project does not exist
    /// - `AuthzError::NotMember` if the user is neither owner nor active member
    pub async fn load(
        conn: &mut PgConnection,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Self, AuthzError> {
        let project = Project::find_by_id(&mut *conn, project_id)
            .await?
            .ok_or(AuthzError::ProjectNotFound(project_id))?;

        let is_owner = project.is_owned_by(user_id);
        if !is_owner && !Membership::is_active_member(&mut *conn, project_id, user_id).await? {
            tracing::debug!(%project_id, %user_id, "Project access denied");
            return Err(AuthzError::NotMember(project_id));
        }

        Ok(Self {
            project,
            user_id,
            is_owner,
        })
    }

    /// Loads the project and checks that the user owns it
    pub async fn load_owner(
        conn: &mut PgConnection,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Self, AuthzError> {
        let project = Project::find_by_id(&mut *conn, project_id)
            .await?
            .ok_or(AuthzError::ProjectNotFound(project_id))?;

        let access = Self {
            is_owner: project.is_owned_by(user_id),
            project,
            user_id,
        };
        access.require_owner()?;
        Ok(access)
    }

    pub fn require_owner(&self) -> Result<(), AuthzError> {
        if self.is_owner {
            Ok(())
        } else {
            Err(AuthzError::NotOwner)
        }
    }
}

/// Users the actor may pick as assignee
///
/// `members` should list the owner and every active member.
pub fn assignable_user_ids(is_owner: bool, actor_id: Uuid, members: &[Uuid]) -> Vec<Uuid> {
    if is_owner {
        members.to_vec()
    } else {
        vec![actor_id]
    }
}

/// Checks a requested assignee against the assignable set
///
/// Leaving a task unassigned is always allowed.
pub fn check_assignment(assignable: &[Uuid], assignee_id: Option<Uuid>) -> Result<(), AuthzError> {
    match assignee_id {
        Some(id) if !assignable.contains(&id) => Err(AuthzError::AssignmentNotAllowed),
        _ => Ok(()),
    }
}

/// Whether the actor may edit the task
///
/// `assignee_ids` is the task's assignee set. When it is empty the legacy
/// `assigned_to_id` column decides instead.
pub fn can_edit_task(is_owner: bool, actor_id: Uuid, task: &Task, assignee_ids: &[Uuid]) -> bool {
    if is_owner || task.created_by_id == actor_id {
        return true;
    }

    if assignee_ids.is_empty() {
        task.assigned_to_id == Some(actor_id)
    } else {
        assignee_ids.contains(&actor_id)
    }
}
