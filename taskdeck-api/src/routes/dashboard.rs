/// Signed-in user's home, profile and notification inbox
///
/// # Endpoints
///
/// - `GET /dashboard` - Projects, upcoming deadlines and counters
/// - `GET /dashboard/profile` - Profile view
/// - `POST /dashboard/profile` - One of three multipart sub-forms, picked by the
///   `form` field: `profile`, `avatar` or `password`
/// - `GET /dashboard/notifications` - Inbox, newest first
/// - `POST /dashboard/notifications/:id/read` - Mark one notification read

use std::collections::HashMap;

use crate::{
    app::AppState,
    error::{ApiError, ApiResult, ServiceResultExt},
    middleware::session::AuthContext,
    routes::{back_or, View},
};
use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::HeaderMap,
    response::Redirect,
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use taskdeck_shared::{
    models::{notification::Notification, user::User},
    services::{
        dashboard::{self, DashboardHome},
        notifications, profile,
    },
    session::Flash,
};
use uuid::Uuid;
use validator::Validate;

const PROFILE_PATH: &str = "/dashboard/profile";
const NOTIFICATIONS_PATH: &str = "/dashboard/notifications";

/// The signed-in user as shown in page headers
#[derive(Debug, Serialize)]
pub struct CurrentUser {
    #[serde(flatten)]
    pub user: User,
    pub initials: String,
    pub avatar_url: Option<String>,
}

impl From<User> for CurrentUser {
    fn from(user: User) -> Self {
        Self {
            initials: user.initials(),
            avatar_url: user
                .avatar_filename
                .as_ref()
                .map(|filename| format!("/avatars/{}", filename)),
            user,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HomePage {
    pub user: CurrentUser,

    #[serde(flatten)]
    pub home: DashboardHome,
}

#[derive(Debug, Serialize)]
pub struct ProfilePage {
    pub user: CurrentUser,
    pub allowed_avatar_extensions: &'static [&'static str],
}

#[derive(Debug, Serialize)]
pub struct NotificationsPage {
    pub unread: usize,
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ProfileForm {
    #[validate(length(min = 1, max = 120, message = "Name is required (at most 120 characters)"))]
    pub name: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct PasswordForm {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 8, max = 128, message = "Password must be 8 to 128 characters"))]
    pub new_password: String,

    #[validate(must_match(other = "new_password", message = "Passwords must match"))]
    pub confirm_password: String,
}

/// `GET /dashboard`
///
/// Refreshes the user's deadline notifications before answering.
pub async fn home(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<View<HomePage>>> {
    let mut tx = state.db.begin().await?;
    let home = dashboard::home(
        &mut tx,
        auth.user_id(),
        state.config.auth.deadline_warning_days,
        Utc::now(),
    )
    .await?;
    tx.commit().await?;

    let messages = auth.session.take_flashes().await;
    Ok(Json(View::new(
        HomePage {
            user: auth.user.into(),
            home,
        },
        messages,
    )))
}

/// `GET /dashboard/profile`
pub async fn profile_view(auth: AuthContext) -> Json<View<ProfilePage>> {
    let messages = auth.session.take_flashes().await;
    Json(View::new(
        ProfilePage {
            user: auth.user.into(),
            allowed_avatar_extensions: &profile::ALLOWED_AVATAR_EXTENSIONS,
        },
        messages,
    ))
}

/// `POST /dashboard/profile`
///
/// # Errors
///
/// - `400 Bad Request`: Malformed multipart body or unknown `form`
/// - `422 Unprocessable Entity`: Sub-form validation failed
pub async fn update_profile(
    State(state): State<AppState>,
    auth: AuthContext,
    multipart: Multipart,
) -> ApiResult<Redirect> {
    let mut submission = ProfileSubmission::read(multipart).await?;
    let user_id = auth.user_id();

    let kind = submission.field("form").to_string();

    let flash = match kind.as_str() {
        "profile" => {
            let form = ProfileForm {
                name: submission.field("name").trim().to_string(),
            };
            form.validate()?;

            let mut tx = state.db.begin().await?;
            profile::update_name(&mut tx, user_id, &form.name).await?;
            tx.commit().await?;

            Flash::success("Profile updated.")
        }
        "avatar" => {
            let (original, data) = submission.avatar.take().unwrap_or_default();
            let filename = profile::avatar_filename(user_id, &original).or_redirect(PROFILE_PATH)?;
            store_avatar(&state, &filename, data).await?;

            let mut tx = state.db.begin().await?;
            profile::set_avatar(&mut tx, user_id, &filename).await?;
            tx.commit().await?;

            Flash::success("Avatar updated.")
        }
        "password" => {
            let form = PasswordForm {
                current_password: submission.field("current_password").to_string(),
                new_password: submission.field("new_password").to_string(),
                confirm_password: submission.field("confirm_password").to_string(),
            };
            form.validate()?;

            let mut tx = state.db.begin().await?;
            profile::change_password(&mut tx, &auth.user, &form.current_password, &form.new_password)
                .await
                .or_redirect(PROFILE_PATH)?;
            tx.commit().await?;

            Flash::success("Password changed successfully.")
        }
        other => {
            return Err(ApiError::BadRequest(format!("Unknown profile form: {:?}", other)));
        }
    };

    auth.session.flash(flash).await;
    Ok(Redirect::to(PROFILE_PATH))
}

/// `GET /dashboard/notifications`
pub async fn notifications(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<View<NotificationsPage>>> {
    let mut conn = state.db.acquire().await?;
    let notifications = notifications::list(&mut conn, auth.user_id()).await?;

    let messages = auth.session.take_flashes().await;
    Ok(Json(View::new(
        NotificationsPage {
            unread: notifications.iter().filter(|n| !n.is_read).count(),
            notifications,
        },
        messages,
    )))
}

/// `POST /dashboard/notifications/:id/read`
///
/// # Errors
///
/// - `404 Not Found`: No such notification for this user
pub async fn mark_notification_read(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(notification_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Redirect> {
    let mut tx = state.db.begin().await?;
    notifications::mark_read(&mut tx, auth.user_id(), notification_id).await?;
    tx.commit().await?;

    auth.session.flash(Flash::info("Notification marked as read.")).await;
    Ok(Redirect::to(&back_or(&headers, NOTIFICATIONS_PATH)))
}

/// Text fields of the profile form plus the uploaded avatar, if any
#[derive(Debug, Default)]
struct ProfileSubmission {
    fields: HashMap<String, String>,
    avatar: Option<(String, Bytes)>,
}

impl ProfileSubmission {
    async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut submission = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == "avatar" {
                let original = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                submission.avatar = Some((original, data));
            } else {
                let value = field.text().await.map_err(multipart_error)?;
                submission.fields.insert(name, value);
            }
        }

        Ok(submission)
    }

    fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or_default()
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Invalid multipart body: {}", err))
}

/// Writes the avatar into the upload folder, creating it if needed
async fn store_avatar(state: &AppState, filename: &str, data: Bytes) -> ApiResult<()> {
    let folder = &state.config.uploads.folder;

    tokio::fs::create_dir_all(folder)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to create upload folder: {}", e)))?;

    tokio::fs::write(folder.join(filename), &data)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to store avatar: {}", e)))?;

    tracing::debug!(%filename, bytes = data.len(), "Avatar stored");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_form_validation() {
        let form = PasswordForm {
            current_password: "old password".to_string(),
            new_password: "new password".to_string(),
            confirm_password: "new password".to_string(),
        };
        assert!(form.validate().is_ok());

        let short = PasswordForm {
            new_password: "short".to_string(),
            confirm_password: "short".to_string(),
            ..Default::default()
        };
        let errors = short.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("new_password"));
        assert!(fields.contains_key("current_password"));
    }

    #[test]
    fn test_profile_form_limits() {
        assert!(ProfileForm { name: "Ada".to_string() }.validate().is_ok());
        assert!(ProfileForm { name: String::new() }.validate().is_err());
        assert!(ProfileForm { name: "x".repeat(121) }.validate().is_err());
    }

    #[test]
    fn test_submission_field_defaults_to_empty() {
        let mut submission = ProfileSubmission::default();
        submission.fields.insert("form".to_string(), "profile".to_string());

        assert_eq!(submission.field("form"), "profile");
        assert_eq!(submission.field("name"), "");
    }
}
