/// Project model and database operations
///
/// A project is a board of tasks owned by one user. Deleting it cascades to
/// memberships, tasks, task assignees and invitations.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE projects (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     name VARCHAR(150) NOT NULL,
///     description TEXT,
///     owner_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use taskdeck_shared::models::project::Project;
/// use taskdeck_shared::db::pool::{create_pool, DatabaseConfig};
/// use uuid::Uuid;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
/// let owner_id = Uuid::new_v4();
///
/// let project = Project::create(&pool, owner_id, "Site Launch", None).await?;
/// let visible = Project::list_for_user(&pool, owner_id).await?;
/// assert_eq!(visible[0].id, project.id);
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

use super::membership::MembershipRole;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Project as listed on a user's dashboard
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectSummary {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: Uuid,
    pub created_at: DateTime<Utc>,

    /// Role of the viewing user
    pub role: MembershipRole,

    pub tasks_total: i64,
    pub tasks_done: i64,
}

impl Project {
    /// Whether `user_id` owns this project
    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    /// Inserts the project row
    ///
    /// Does not create the owner membership. Use the project service, which writes
    /// both in one transaction.
    pub async fn create<'e, E>(
        executor: E,
        owner_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO projects (name, description, owner_id)
            VALUES ($1, $2, $3)
            RETURNING id, name, description, owner_id, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(owner_id)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, Project>(
            r#"
            SELECT id, name, description, owner_id, created_at, updated_at
            FROM projects
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    /// Deletes the project and everything that cascades from it
    pub async fn delete<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Projects the user owns or holds an active membership in, newest first
    ///
    /// Each project appears once, with the user's role and task counts.
    pub async fn list_for_user<'e, E>(
        executor: E,
        user_id: Uuid,
    ) -> Result<Vec<ProjectSummary>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, ProjectSummary>(
            r#"
            SELECT
                p.id,
                p.name,
                p.description,
                p.owner_id,
                p.created_at,
                CASE WHEN p.owner_id = $1 THEN 'owner'::membership_role ELSE m.role END AS role,
                (SELECT COUNT(*) FROM tasks t WHERE t.project_id = p.id) AS tasks_total,
                (SELECT COUNT(*) FROM tasks t WHERE t.project_id = p.id AND t.status = 'done') AS tasks_done
            FROM projects p
            LEFT JOIN memberships m
                ON m.project_id = p.id AND m.user_id = $1 AND m.is_active = TRUE
            WHERE p.owner_id = $1 OR m.id IS NOT NULL
            ORDER BY p.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(executor)
        .await
    }
}
