/// Project boards, tasks and invitations
///
/// # Endpoints
///
/// - `POST /projects/create` - Create a project (JSON answer for XHR clients)
/// - `GET /projects/:id` - Board view
/// - `POST /projects/:id/tasks` - Add a task
/// - `POST /projects/:id/tasks/:task_id` - Edit a task
/// - `POST /projects/:id/tasks/:task_id/move` - Drag a task to another column (JSON)
/// - `POST /projects/:id/tasks/:task_id/delete` - Delete a task (owner)
/// - `POST /projects/:id/delete` - Delete the project (owner)
/// - `POST /projects/:id/invite` - Invite a registered user (owner)
/// - `POST /projects/invitations/:id/:action` - Accept or decline
///
/// Only the owner and active members can reach a project; everyone else gets
/// `403 Forbidden`.

use std::collections::BTreeMap;

use crate::{
    app::AppState,
    error::{validation_details, ApiResult, ServiceResultExt},
    middleware::session::AuthContext,
    routes::{back_or, dashboard::CurrentUser, wants_json, View},
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use taskdeck_shared::{
    models::{
        membership::MembershipRole,
        task::{TaskFields, TaskStatus},
    },
    services::{
        invitations::{self, InvitationAction},
        projects::{self, ProjectDetail},
        ServiceError,
    },
    session::Flash,
};
use uuid::Uuid;
use validator::Validate;

/// `datetime-local` input format
pub const DUE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M";

const NOTIFICATIONS_PATH: &str = "/dashboard/notifications";

fn detail_path(project_id: Uuid) -> String {
    format!("/projects/{}", project_id)
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct ProjectForm {
    #[validate(length(min = 1, max = 150, message = "Project name is required (at most 150 characters)"))]
    pub name: String,

    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct InviteForm {
    #[validate(
        email(message = "Invalid email format"),
        length(max = 120, message = "Email must be at most 120 characters")
    )]
    pub email: String,
}

/// Task create/edit form
///
/// `due_date` uses the `datetime-local` format and may be empty. An empty or
/// `0` assignee leaves the task unassigned.
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct TaskForm {
    #[validate(length(min = 1, max = 150, message = "Title is required (at most 150 characters)"))]
    pub title: String,

    #[validate(length(max = 1000, message = "Details must be at most 1000 characters"))]
    pub description: String,

    pub due_date: String,
    pub status: String,
    pub assignee_id: String,
}

impl TaskForm {
    /// Validates the form and converts it to task fields
    pub fn into_fields(mut self) -> Result<TaskFields, String> {
        self.title = self.title.trim().to_string();
        self.validate().map_err(|e| e.to_string())?;

        let due_date = match self.due_date.trim() {
            "" => None,
            raw => Some(parse_due_date(raw).ok_or_else(|| format!("Invalid due date: {}", raw))?),
        };

        let status = match self.status.trim() {
            "" => TaskStatus::default(),
            raw => raw.parse::<TaskStatus>().map_err(|e| e.to_string())?,
        };

        let assignee_id = match self.assignee_id.trim() {
            "" | "0" => None,
            raw => Some(Uuid::parse_str(raw).map_err(|e| format!("Invalid assignee: {}", e))?),
        };

        let description = self.description.trim();

        Ok(TaskFields {
            title: self.title,
            description: (!description.is_empty()).then(|| description.to_string()),
            due_date,
            status,
            assignee_id,
        })
    }
}

/// Parses a `datetime-local` value as UTC
pub fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, DUE_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Body of `POST /projects/:id/tasks/:task_id/move`
#[derive(Debug, Default, Deserialize)]
pub struct MoveRequest {
    #[serde(default)]
    pub status: Option<String>,
}

/// Project as returned to XHR clients after creation
#[derive(Debug, Serialize)]
pub struct CreatedProject {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub role: MembershipRole,
    pub detail_url: String,
    pub tasks_total: i64,
    pub tasks_done: i64,
}

#[derive(Debug, Serialize)]
pub struct ProjectPage {
    pub user: CurrentUser,

    #[serde(flatten)]
    pub detail: ProjectDetail,
}

/// `POST /projects/create`
///
/// Form posts are redirected back with a flash. Clients sending
/// `X-Requested-With: XMLHttpRequest` and accepting JSON get
/// `201 {success, message, project}` or `400 {success: false, errors}`.
pub async fn create_project(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Form(mut form): Form<ProjectForm>,
) -> ApiResult<Response> {
    let json_mode = wants_json(&headers);
    form.name = form.name.trim().to_string();

    if let Err(errors) = form.validate() {
        if json_mode {
            let mut fields: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for detail in validation_details(&errors) {
                fields.entry(detail.field).or_default().push(detail.message);
            }

            return Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "errors": fields })),
            )
                .into_response());
        }

        auth.session
            .flash(Flash::danger("Please fix the errors in the project form."))
            .await;
        return Ok(Redirect::to(&back_or(&headers, "/dashboard")).into_response());
    }

    let description = form.description.trim();
    let description = (!description.is_empty()).then_some(description);

    let mut tx = state.db.begin().await?;
    let summary = projects::create_project(&mut tx, auth.user_id(), &form.name, description).await?;
    tx.commit().await?;

    if json_mode {
        let project = CreatedProject {
            detail_url: detail_path(summary.id),
            id: summary.id,
            name: summary.name,
            description: summary.description.unwrap_or_default(),
            role: summary.role,
            tasks_total: summary.tasks_total,
            tasks_done: summary.tasks_done,
        };

        return Ok((
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "message": "Project created successfully.",
                "project": project,
            })),
        )
            .into_response());
    }

    auth.session.flash(Flash::success("Project created successfully.")).await;
    Ok(Redirect::to(&back_or(&headers, "/dashboard")).into_response())
}

/// `GET /projects/:id`
///
/// # Errors
///
/// - `404 Not Found`: No such project
/// - `403 Forbidden`: Neither owner nor active member
pub async fn detail(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Json<View<ProjectPage>>> {
    let mut conn = state.db.acquire().await?;
    let detail = projects::project_detail(&mut conn, project_id, auth.user_id()).await?;

    let messages = auth.session.take_flashes().await;
    Ok(Json(View::new(
        ProjectPage {
            user: auth.user.into(),
            detail,
        },
        messages,
    )))
}

/// `POST /projects/:id/tasks`
pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(project_id): Path<Uuid>,
    Form(form): Form<TaskForm>,
) -> ApiResult<Redirect> {
    let back = detail_path(project_id);

    let fields = match form.into_fields() {
        Ok(fields) => fields,
        Err(reason) => {
            tracing::debug!(%project_id, %reason, "Task form rejected");
            auth.session
                .flash(Flash::danger("Unable to create task. Please review the form."))
                .await;
            return Ok(Redirect::to(&back));
        }
    };

    let mut tx = state.db.begin().await?;
    projects::create_task(&mut tx, project_id, auth.user_id(), fields)
        .await
        .or_redirect(&back)?;
    tx.commit().await?;

    auth.session.flash(Flash::success("Task created.")).await;
    Ok(Redirect::to(&back))
}

/// `POST /projects/:id/tasks/:task_id`
pub async fn update_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
    Form(form): Form<TaskForm>,
) -> ApiResult<Redirect> {
    let back = detail_path(project_id);

    let fields = match form.into_fields() {
        Ok(fields) => fields,
        Err(reason) => {
            tracing::debug!(%task_id, %reason, "Task form rejected");
            auth.session
                .flash(Flash::danger("Update failed. Please review the form."))
                .await;
            return Ok(Redirect::to(&back));
        }
    };

    let mut tx = state.db.begin().await?;
    projects::update_task(&mut tx, project_id, task_id, auth.user_id(), fields)
        .await
        .or_redirect(&back)?;
    tx.commit().await?;

    auth.session.flash(Flash::success("Task updated.")).await;
    Ok(Redirect::to(&back))
}

/// `POST /projects/:id/tasks/:task_id/move`
///
/// Takes `{"status": "..."}` and answers `{"status": "..."}`. A body that is not
/// JSON counts as a missing status.
///
/// # Errors
///
/// - `400 Bad Request`: `{"error": "Invalid status"}`, the task is unchanged
pub async fn move_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
    body: Bytes,
) -> ApiResult<Response> {
    let request: MoveRequest = serde_json::from_slice(&body).unwrap_or_default();

    let mut tx = state.db.begin().await?;
    let status = match projects::move_task(
        &mut tx,
        project_id,
        task_id,
        auth.user_id(),
        request.status.as_deref(),
    )
    .await
    {
        Ok(status) => status,
        Err(ServiceError::Invalid(message)) => {
            return Ok((StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response());
        }
        Err(e) => return Err(e.into()),
    };
    tx.commit().await?;

    Ok(Json(json!({ "status": status })).into_response())
}

/// `POST /projects/:id/tasks/:task_id/delete`
///
/// # Errors
///
/// - `403 Forbidden`: Not the project owner
pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((project_id, task_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Redirect> {
    let mut tx = state.db.begin().await?;
    projects::delete_task(&mut tx, project_id, task_id, auth.user_id()).await?;
    tx.commit().await?;

    auth.session.flash(Flash::info("Task deleted.")).await;
    Ok(Redirect::to(&detail_path(project_id)))
}

/// `POST /projects/:id/delete`
///
/// # Errors
///
/// - `403 Forbidden`: Not the project owner
pub async fn delete_project(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(project_id): Path<Uuid>,
) -> ApiResult<Redirect> {
    let mut tx = state.db.begin().await?;
    projects::delete_project(&mut tx, project_id, auth.user_id()).await?;
    tx.commit().await?;

    auth.session.flash(Flash::info("Project deleted.")).await;
    Ok(Redirect::to("/dashboard"))
}

/// `POST /projects/:id/invite`
///
/// The invitation email is sent after the invitation is committed.
pub async fn invite_member(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(project_id): Path<Uuid>,
    Form(form): Form<InviteForm>,
) -> ApiResult<Redirect> {
    let back = detail_path(project_id);

    if form.validate().is_err() {
        auth.session.flash(Flash::danger("Invalid email address.")).await;
        return Ok(Redirect::to(&back));
    }

    let mut tx = state.db.begin().await?;
    let sent = invitations::invite_member(&mut tx, project_id, &auth.user, form.email.trim())
        .await
        .or_redirect(&back)?;
    tx.commit().await?;

    state.deliver(Some(sent.email)).await;

    auth.session.flash(Flash::success("Invitation sent.")).await;
    Ok(Redirect::to(&back))
}

/// `POST /projects/invitations/:id/:action`
///
/// `action` is `accept` or `decline`.
///
/// # Errors
///
/// - `404 Not Found`: No such invitation
/// - `403 Forbidden`: Addressed to someone else
pub async fn handle_invitation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((invitation_id, action)): Path<(Uuid, String)>,
    headers: HeaderMap,
) -> ApiResult<Redirect> {
    let mut tx = state.db.begin().await?;
    let action = invitations::handle_invitation(&mut tx, invitation_id, auth.user_id(), &action)
        .await
        .or_redirect(NOTIFICATIONS_PATH)?;
    tx.commit().await?;

    let flash = match action {
        InvitationAction::Accept => Flash::success("Invitation accepted."),
        InvitationAction::Decline => Flash::info("Invitation declined."),
    };
    auth.session.flash(flash).await;

    Ok(Redirect::to(&back_or(&headers, NOTIFICATIONS_PATH)))
}
