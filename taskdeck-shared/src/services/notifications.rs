/// Invite and deadline notifications
///
/// Notifications are keyed by `(user, reference)`; issuing one twice updates the
/// existing row and marks it unread again.

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::PgConnection;
use uuid::Uuid;

use super::ServiceError;
use crate::models::invitation::{invite_reference, Invitation};
use crate::models::notification::{Notification, NotificationType};
use crate::models::project::Project;
use crate::models::task::Task;

/// Reference of the deadline notification of one task for one user
pub fn deadline_reference(task_id: Uuid, user_id: Uuid) -> String {
    format!("deadline:{}:{}", task_id, user_id)
}

/// Inclusive `[now, now + warning_days]` window
pub fn deadline_window(now: DateTime<Utc>, warning_days: i64) -> (DateTime<Utc>, DateTime<Utc>) {
    (now, now + Duration::days(warning_days))
}

/// Tells the invitee about a new invitation
pub async fn notify_invitation(
    conn: &mut PgConnection,
    invitation: &Invitation,
    project: &Project,
    inviter_name: &str,
) -> Result<Notification, ServiceError> {
    let payload = json!({
        "invitation_id": invitation.id,
        "project_id": project.id,
        "project_name": project.name,
        "inviter_name": inviter_name,
    });

    let notification = Notification::upsert(
        &mut *conn,
        invitation.invitee_id,
        NotificationType::Invite,
        &invitation.notification_reference(),
        payload,
    )
    .await?;

    Ok(notification)
}

/// Upserts a deadline notification for every task due inside the warning window
///
/// Covers tasks of projects the user owns and tasks assigned to the user. Rows
/// that already exist are refreshed and marked unread again. Returns the number
/// of notifications written.
pub async fn ensure_deadline_notifications(
    conn: &mut PgConnection,
    user_id: Uuid,
    warning_days: i64,
    now: DateTime<Utc>,
) -> Result<usize, ServiceError> {
    let (from, until) = deadline_window(now, warning_days);
    let due = Task::due_for_user(&mut *conn, user_id, from, until).await?;

    for task in &due {
        let payload = json!({
            "task_id": task.task_id,
            "project_id": task.project_id,
            "task_title": task.title,
            "due": task.due_date.to_rfc3339(),
            "project_name": task.project_name,
        });

        Notification::upsert(
            &mut *conn,
            user_id,
            NotificationType::Deadline,
            &deadline_reference(task.task_id, user_id),
            payload,
        )
        .await?;
    }

    if !due.is_empty() {
        tracing::debug!(%user_id, count = due.len(), "Deadline notifications refreshed");
    }

    Ok(due.len())
}

/// Every notification of the user, newest first
pub async fn list(conn: &mut PgConnection, user_id: Uuid) -> Result<Vec<Notification>, ServiceError> {
    Ok(Notification::list_for_user(&mut *conn, user_id).await?)
}

/// Marks one of the user's notifications read
///
/// A notification of another user is reported as missing.
pub async fn mark_read(
    conn: &mut PgConnection,
    user_id: Uuid,
    notification_id: Uuid,
) -> Result<(), ServiceError> {
    if Notification::mark_read(&mut *conn, user_id, notification_id).await? {
        Ok(())
    } else {
        Err(ServiceError::NotFound("Notification"))
    }
}

/// Drops the invite notification once the invitation is answered
pub async fn remove_invite(
    conn: &mut PgConnection,
    user_id: Uuid,
    invitation_id: Uuid,
) -> Result<u64, ServiceError> {
    Ok(Notification::delete_by_reference(&mut *conn, user_id, &invite_reference(invitation_id)).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_deadline_reference() {
        let task_id = Uuid::nil();
        let user_id = Uuid::from_u128(1);
        assert_eq!(
            deadline_reference(task_id, user_id),
            format!("deadline:{}:{}", task_id, user_id)
        );
    }

    #[test]
    fn test_deadline_window() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let (from, until) = deadline_window(now, 2);

        assert_eq!(from, now);
        assert_eq!(until, Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_zero_day_window_is_instant() {
        let now = Utc::now();
        let (from, until) = deadline_window(now, 0);
        assert_eq!(from, until);
    }
}
