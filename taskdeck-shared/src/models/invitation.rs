/// Project invitation model and database operations
///
/// # Schema
///
/// ```sql
/// CREATE TYPE invitation_status AS ENUM ('pending', 'accepted', 'declined');
///
/// CREATE TABLE invitations (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
///     inviter_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     invitee_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     status invitation_status NOT NULL DEFAULT 'pending',
///     responded_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
///
/// CREATE UNIQUE INDEX uq_invitation_pending
///     ON invitations(project_id, invitee_id)
///     WHERE status = 'pending';
/// ```
///
/// # State Machine
///
/// ```text
/// pending → accepted
/// pending → declined
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

/// Lifecycle of an invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invitation_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
        }
    }

    /// Only pending invitations may be answered
    pub fn can_transition_to(&self, target: InvitationStatus) -> bool {
        matches!(
            (self, target),
            (InvitationStatus::Pending, InvitationStatus::Accepted)
                | (InvitationStatus::Pending, InvitationStatus::Declined)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Invitation {
    pub id: Uuid,
    pub project_id: Uuid,
    pub inviter_id: Uuid,
    pub invitee_id: Uuid,
    pub status: InvitationStatus,

    /// Set when the invitee accepts or declines
    pub responded_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Invitation {
    /// Notification reference key for this invitation
    pub fn notification_reference(&self) -> String {
        invite_reference(self.id)
    }

    /// Creates a pending invitation
    ///
    /// # Errors
    ///
    /// Fails with a unique violation on `uq_invitation_pending` when the invitee
    /// already has a pending invitation to the project.
    pub async fn create<'e, E>(
        executor: E,
        project_id: Uuid,
        inviter_id: Uuid,
        invitee_id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Invitation>(
            r#"
            INSERT INTO invitations (project_id, inviter_id, invitee_id)
            VALUES ($1, $2, $3)
            RETURNING id, project_id, inviter_id, invitee_id, status, responded_at,
                      created_at, updated_at
            "#,
        )
        .bind(project_id)
        .bind(inviter_id)
        .bind(invitee_id)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Invitation>(
            r#"
            SELECT id, project_id, inviter_id, invitee_id, status, responded_at,
                   created_at, updated_at
            FROM invitations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Checks for a pending invitation of `invitee_id` to the project
    pub async fn has_pending<'e, E>(
        executor: E,
        project_id: Uuid,
        invitee_id: Uuid,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM invitations
                WHERE project_id = $1 AND invitee_id = $2 AND status = 'pending'
            )
            "#,
        )
        .bind(project_id)
        .bind(invitee_id)
        .fetch_one(executor)
        .await
    }

    /// Moves a pending invitation to `status` and stamps `responded_at`
    ///
    /// Returns `None` if the invitation no longer exists or was already answered.
    pub async fn respond<'e, E>(
        executor: E,
        id: Uuid,
        status: InvitationStatus,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Invitation>(
            r#"
            UPDATE invitations
            SET status = $2, responded_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING id, project_id, inviter_id, invitee_id, status, responded_at,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(status)
        .fetch_optional(executor)
        .await
    }

    /// Counts invitations of any status for a project and invitee
    pub async fn count_for<'e, E>(
        executor: E,
        project_id: Uuid,
        invitee_id: Uuid,
    ) -> Result<i64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM invitations WHERE project_id = $1 AND invitee_id = $2",
        )
        .bind(project_id)
        .bind(invitee_id)
        .fetch_one(executor)
        .await
    }
}

/// Notification reference key for an invitation
pub fn invite_reference(invitation_id: Uuid) -> String {
    format!("invite:{}", invitation_id)
}
