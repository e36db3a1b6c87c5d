/// Projects, boards and tasks
///
/// Every operation starts by resolving the actor's [`ProjectAccess`]; anything
/// outside the owner's or an active member's reach fails before a write.

use serde::Serialize;
use sqlx::{Connection, PgConnection};
use uuid::Uuid;

use super::ServiceError;
use crate::auth::authorization::{
    assignable_user_ids, can_edit_task, check_assignment, AuthzError, ProjectAccess,
};
use crate::models::membership::{MemberSummary, Membership, MembershipRole};
use crate::models::project::{Project, ProjectSummary};
use crate::models::task::{Task, TaskCard, TaskFields, TaskStatus};
use crate::models::user::User;

/// Entry of the assignee dropdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssigneeOption {
    pub user_id: Uuid,
    pub name: String,
}

/// Everything the board page shows
#[derive(Debug, Clone, Serialize)]
pub struct ProjectDetail {
    pub project: Project,
    pub is_owner: bool,
    pub tasks: Vec<TaskCard>,

    /// Owner first, then active members
    pub members: Vec<MemberSummary>,

    pub assignee_options: Vec<AssigneeOption>,
    pub statuses: Vec<StatusOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusOption {
    pub value: TaskStatus,
    pub label: &'static str,
}

/// Creates the project together with the owner's membership
///
/// Both rows are written in a nested transaction, so a failure leaves neither.
pub async fn create_project(
    conn: &mut PgConnection,
    owner_id: Uuid,
    name: &str,
    description: Option<&str>,
) -> Result<ProjectSummary, ServiceError> {
    let mut tx = conn.begin().await?;

    let project = Project::create(&mut *tx, owner_id, name, description).await?;
    Membership::activate(&mut *tx, project.id, owner_id, MembershipRole::Owner).await?;

    tx.commit().await?;

    tracing::info!(project_id = %project.id, %owner_id, "Project created");

    Ok(ProjectSummary {
        id: project.id,
        name: project.name,
        description: project.description,
        owner_id: project.owner_id,
        created_at: project.created_at,
        role: MembershipRole::Owner,
        tasks_total: 0,
        tasks_done: 0,
    })
}

/// Board view of a project for the actor
pub async fn project_detail(
    conn: &mut PgConnection,
    project_id: Uuid,
    actor_id: Uuid,
) -> Result<ProjectDetail, ServiceError> {
    let access = ProjectAccess::load(conn, project_id, actor_id).await?;

    let members = members_of(conn, &access.project).await?;
    let member_ids: Vec<Uuid> = members.iter().map(|m| m.user_id).collect();
    let assignable = assignable_user_ids(access.is_owner, actor_id, &member_ids);

    let assignee_options = assignable
        .iter()
        .filter_map(|id| {
            members.iter().find(|m| m.user_id == *id).map(|m| AssigneeOption {
                user_id: m.user_id,
                name: m.name.clone(),
            })
        })
        .collect();

    let tasks = Task::list_cards(&mut *conn, project_id).await?;

    Ok(ProjectDetail {
        project: access.project,
        is_owner: access.is_owner,
        tasks,
        members,
        assignee_options,
        statuses: TaskStatus::ALL
            .iter()
            .map(|status| StatusOption {
                value: *status,
                label: status.label(),
            })
            .collect(),
    })
}

/// Adds a task to the board
///
/// Members may leave the task unassigned or assign it to themselves. The owner
/// may pick any member.
pub async fn create_task(
    conn: &mut PgConnection,
    project_id: Uuid,
    actor_id: Uuid,
    fields: TaskFields,
) -> Result<Task, ServiceError> {
    let access = ProjectAccess::load(conn, project_id, actor_id).await?;
    let assignable = assignable_for(conn, &access).await?;
    check_assignment(&assignable, fields.assignee_id)?;

    let task = Task::create(conn, project_id, actor_id, fields).await?;

    tracing::info!(task_id = %task.id, %project_id, %actor_id, "Task created");
    Ok(task)
}

/// Replaces a task's fields and assignee
///
/// Members may only edit tasks they created or are assigned to.
pub async fn update_task(
    conn: &mut PgConnection,
    project_id: Uuid,
    task_id: Uuid,
    actor_id: Uuid,
    fields: TaskFields,
) -> Result<Task, ServiceError> {
    let access = ProjectAccess::load(conn, project_id, actor_id).await?;
    let task = find_task(conn, project_id, task_id).await?;

    let assignable = assignable_for(conn, &access).await?;
    check_assignment(&assignable, fields.assignee_id)?;

    let assignees = Task::assignee_ids(&mut *conn, task.id).await?;
    if !can_edit_task(access.is_owner, actor_id, &task, &assignees) {
        return Err(AuthzError::EditNotAllowed.into());
    }

    let task = Task::update(conn, task.id, fields).await?;

    tracing::info!(%task_id, %project_id, %actor_id, "Task updated");
    Ok(task)
}

/// Moves a task to another status column
///
/// Open to the owner and every active member. The task is looked up before the
/// status is parsed, so a missing task wins over a bad status.
pub async fn move_task(
    conn: &mut PgConnection,
    project_id: Uuid,
    task_id: Uuid,
    actor_id: Uuid,
    status: Option<&str>,
) -> Result<TaskStatus, ServiceError> {
    ProjectAccess::load(conn, project_id, actor_id).await?;
    let task = find_task(conn, project_id, task_id).await?;

    let status: TaskStatus = status
        .unwrap_or_default()
        .parse()
        .map_err(|_| ServiceError::Invalid("Invalid status".to_string()))?;

    Task::update_status(&mut *conn, task.id, status).await?;

    tracing::debug!(%task_id, status = status.as_str(), "Task moved");
    Ok(status)
}

/// Removes a task; owner only
pub async fn delete_task(
    conn: &mut PgConnection,
    project_id: Uuid,
    task_id: Uuid,
    actor_id: Uuid,
) -> Result<(), ServiceError> {
    ProjectAccess::load_owner(conn, project_id, actor_id).await?;
    let task = find_task(conn, project_id, task_id).await?;

    Task::delete(&mut *conn, task.id).await?;

    tracing::info!(%task_id, %project_id, "Task deleted");
    Ok(())
}

/// Removes a project with its memberships, tasks and invitations; owner only
pub async fn delete_project(
    conn: &mut PgConnection,
    project_id: Uuid,
    actor_id: Uuid,
) -> Result<(), ServiceError> {
    ProjectAccess::load_owner(conn, project_id, actor_id).await?;
    Project::delete(&mut *conn, project_id).await?;

    tracing::info!(%project_id, "Project deleted");
    Ok(())
}

async fn find_task(
    conn: &mut PgConnection,
    project_id: Uuid,
    task_id: Uuid,
) -> Result<Task, ServiceError> {
    Task::find_in_project(&mut *conn, project_id, task_id)
        .await?
        .ok_or(ServiceError::NotFound("Task"))
}

async fn assignable_for(
    conn: &mut PgConnection,
    access: &ProjectAccess,
) -> Result<Vec<Uuid>, ServiceError> {
    let member_ids: Vec<Uuid> = members_of(conn, &access.project)
        .await?
        .into_iter()
        .map(|m| m.user_id)
        .collect();

    Ok(assignable_user_ids(access.is_owner, access.user_id, &member_ids))
}

/// Owner plus active members, owner first
async fn members_of(
    conn: &mut PgConnection,
    project: &Project,
) -> Result<Vec<MemberSummary>, ServiceError> {
    let mut members = Membership::list_active_members(&mut *conn, project.id).await?;
    members.sort_by_key(|m| m.user_id != project.owner_id);

    if !members.iter().any(|m| m.user_id == project.owner_id) {
        tracing::warn!(project_id = %project.id, "Owner membership missing");
        if let Some(owner) = User::find_by_id(&mut *conn, project.owner_id).await? {
            members.insert(
                0,
                MemberSummary {
                    user_id: owner.id,
                    name: owner.name,
                    email: owner.email,
                    avatar_filename: owner.avatar_filename,
                    role: MembershipRole::Owner,
                },
            );
        }
    }

    Ok(members)
}
