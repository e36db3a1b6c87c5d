/// Membership model and database operations
///
/// A membership ties a user to a project with a role. Every project has exactly one
/// `owner` membership, written together with the project. Collaborators join as
/// `member` when they accept an invitation.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE membership_role AS ENUM ('owner', 'member');
///
/// CREATE TABLE memberships (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
///     role membership_role NOT NULL DEFAULT 'member',
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     CONSTRAINT uq_member_project UNIQUE (user_id, project_id)
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use taskdeck_shared::models::membership::{Membership, MembershipRole};
/// use taskdeck_shared::db::pool::{create_pool, DatabaseConfig};
/// use uuid::Uuid;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
/// let (project_id, user_id) = (Uuid::new_v4(), Uuid::new_v4());
///
/// Membership::activate(&pool, project_id, user_id, MembershipRole::Member).await?;
/// assert!(Membership::is_active_member(&pool, project_id, user_id).await?);
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

/// Role of a user inside a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "membership_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MembershipRole {
    /// Created the project; may manage tasks, members, and delete it
    Owner,

    /// Collaborator with access to the board
    Member,
}

impl MembershipRole {
    /// Converts role to string for display
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipRole::Owner => "owner",
            MembershipRole::Member => "member",
        }
    }
}

/// Membership of a user in a project
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Membership {
    pub id: Uuid,

    pub user_id: Uuid,

    pub project_id: Uuid,

    /// Role within the project
    pub role: MembershipRole,

    /// Inactive memberships are kept so a later invitation can reactivate them
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    /// Creates the membership, or reactivates an existing one with the given role
    ///
    /// Backed by the `uq_member_project` constraint, so at most one row ever exists
    /// per (user, project) pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the project or user doesn't exist (foreign key violation)
    /// or the database is unreachable.
    pub async fn activate<'e, E>(
        executor: E,
        project_id: Uuid,
        user_id: Uuid,
        role: MembershipRole,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Membership>(
            r#"
            INSERT INTO memberships (user_id, project_id, role, is_active)
            VALUES ($1, $2, $3, TRUE)
            ON CONFLICT ON CONSTRAINT uq_member_project
            DO UPDATE SET role = EXCLUDED.role, is_active = TRUE, updated_at = NOW()
            RETURNING id, user_id, project_id, role, is_active, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(project_id)
        .bind(role)
        .fetch_one(executor)
        .await
    }

    /// Finds the membership of a user in a project, active or not
    pub async fn find<'e, E>(
        executor: E,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Membership>(
            r#"
            SELECT id, user_id, project_id, role, is_active, created_at, updated_at
            FROM memberships
            WHERE project_id = $1 AND user_id = $2
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await
    }

    /// Checks whether the user holds an active membership in the project
    ///
    /// Owners hold an owner membership, so this is true for them too.
    pub async fn is_active_member<'e, E>(
        executor: E,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM memberships
                WHERE project_id = $1 AND user_id = $2 AND is_active = TRUE
            )
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_one(executor)
        .await?;

        Ok(exists)
    }

    /// Lists active members of a project with their user details
    ///
    /// Ordered by join time, so the owner membership comes first.
    pub async fn list_active_members<'e, E>(
        executor: E,
        project_id: Uuid,
    ) -> Result<Vec<MemberSummary>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, MemberSummary>(
            r#"
            SELECT u.id AS user_id, u.name, u.email, u.avatar_filename, m.role
            FROM memberships m
            JOIN users u ON u.id = m.user_id
            WHERE m.project_id = $1 AND m.is_active = TRUE
            ORDER BY m.created_at ASC, u.name ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(executor)
        .await
    }
}

/// Member row shown on a project board
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MemberSummary {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub avatar_filename: Option<String>,
    pub role: MembershipRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_as_str() {
        assert_eq!(MembershipRole::Owner.as_str(), "owner");
        assert_eq!(MembershipRole::Member.as_str(), "member");
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(
            serde_json::to_string(&MembershipRole::Owner).unwrap(),
            "\"owner\""
        );
        let role: MembershipRole = serde_json::from_str("\"member\"").unwrap();
        assert_eq!(role, MembershipRole::Member);
    }
}
