/// Notification model and database operations
///
/// Notifications are keyed by `(user_id, reference)`. Raising the same reference
/// again refreshes the payload and marks the row unread instead of adding a
/// duplicate.
///
/// # Reference keys
///
/// - `invite:<invitation_id>`
/// - `deadline:<task_id>:<user_id>`
///
/// # Schema
///
/// ```sql
/// CREATE TYPE notification_type AS ENUM ('invite', 'deadline');
///
/// CREATE TABLE notifications (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     type notification_type NOT NULL,
///     reference VARCHAR(120) NOT NULL,
///     payload JSONB NOT NULL DEFAULT '{}',
///     is_read BOOLEAN NOT NULL DEFAULT FALSE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
///     CONSTRAINT uq_notification_user_reference UNIQUE (user_id, reference)
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgExecutor;
use uuid::Uuid;

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, type, reference, payload, is_read, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    /// Invitation to join a project
    Invite,

    /// Task due date is approaching
    Deadline,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,

    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: NotificationType,

    pub reference: String,

    /// Snapshot of the data shown in the inbox
    pub payload: JsonValue,

    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Inserts the notification or refreshes the existing one with the same reference
    ///
    /// A refreshed notification gets the new payload and becomes unread again.
    pub async fn upsert<'e, E>(
        executor: E,
        user_id: Uuid,
        kind: NotificationType,
        reference: &str,
        payload: JsonValue,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            r#"
            INSERT INTO notifications (user_id, type, reference, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT ON CONSTRAINT uq_notification_user_reference
            DO UPDATE SET payload = EXCLUDED.payload, is_read = FALSE, updated_at = NOW()
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        );

        sqlx::query_as::<_, Notification>(&query)
            .bind(user_id)
            .bind(kind)
            .bind(reference)
            .bind(payload)
            .fetch_one(executor)
            .await
    }

    /// All notifications of the user, newest first
    pub async fn list_for_user<'e, E>(executor: E, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "SELECT {} FROM notifications WHERE user_id = $1 ORDER BY created_at DESC",
            NOTIFICATION_COLUMNS
        );

        sqlx::query_as::<_, Notification>(&query)
            .bind(user_id)
            .fetch_all(executor)
            .await
    }

    /// Most recent notifications of one type, newest first
    pub async fn recent_of_type<'e, E>(
        executor: E,
        user_id: Uuid,
        kind: NotificationType,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "SELECT {} FROM notifications WHERE user_id = $1 AND type = $2 \
             ORDER BY created_at DESC LIMIT $3",
            NOTIFICATION_COLUMNS
        );

        sqlx::query_as::<_, Notification>(&query)
            .bind(user_id)
            .bind(kind)
            .bind(limit)
            .fetch_all(executor)
            .await
    }

    pub async fn find_by_reference<'e, E>(
        executor: E,
        user_id: Uuid,
        reference: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "SELECT {} FROM notifications WHERE user_id = $1 AND reference = $2",
            NOTIFICATION_COLUMNS
        );

        sqlx::query_as::<_, Notification>(&query)
            .bind(user_id)
            .bind(reference)
            .fetch_optional(executor)
            .await
    }

    /// Marks one of the user's notifications read
    ///
    /// Returns `false` if no notification with this ID belongs to the user.
    pub async fn mark_read<'e, E>(executor: E, user_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE, updated_at = NOW() WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes the user's notification with this reference
    pub async fn delete_by_reference<'e, E>(
        executor: E,
        user_id: Uuid,
        reference: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM notifications WHERE user_id = $1 AND reference = $2")
            .bind(user_id)
            .bind(reference)
            .execute(executor)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_serialized_as_type_field() {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            kind: NotificationType::Deadline,
            reference: "deadline:a:b".to_string(),
            payload: json!({"task_title": "Ship"}),
            is_read: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["type"], "deadline");
        assert_eq!(value["payload"]["task_title"], "Ship");
        assert!(value.get("kind").is_none());
    }
}
