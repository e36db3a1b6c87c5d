/// Task model and database operations
///
/// Tasks live on a project board and move between three columns.
///
/// # Workflow
///
/// ```text
/// todo ⇄ in_progress ⇄ done
/// ```
///
/// Any status may be set directly; the board allows dragging across columns.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE task_status AS ENUM ('todo', 'in_progress', 'done');
///
/// CREATE TABLE tasks (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     project_id UUID NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
///     title VARCHAR(150) NOT NULL,
///     description TEXT,
///     due_date TIMESTAMPTZ,
///     status task_status NOT NULL DEFAULT 'todo',
///     created_by_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     assigned_to_id UUID REFERENCES users(id) ON DELETE SET NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
/// );
///
/// CREATE TABLE task_assignees (
///     task_id UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     PRIMARY KEY (task_id, user_id)
/// );
/// ```
///
/// `assigned_to_id` and the `task_assignees` set are always written together by
/// [`Task::set_assignee`], so they hold at most one user between them.
///
/// # Example
///
/// ```no_run
/// use taskdeck_shared::models::task::{Task, TaskFields, TaskStatus};
/// use taskdeck_shared::db::pool::{create_pool, DatabaseConfig};
/// use uuid::Uuid;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
/// let mut conn = pool.acquire().await?;
/// let (project_id, user_id) = (Uuid::new_v4(), Uuid::new_v4());
///
/// let task = Task::create(&mut *conn, project_id, user_id, TaskFields {
///     title: "Write copy".to_string(),
///     description: None,
///     due_date: None,
///     status: TaskStatus::Todo,
///     assignee_id: Some(user_id),
/// }).await?;
///
/// Task::update_status(&mut *conn, task.id, TaskStatus::Done).await?;
/// # Ok(())
/// # }
/// ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

const TASK_COLUMNS: &str = "id, project_id, title, description, due_date, status, \
                            created_by_id, assigned_to_id, created_at, updated_at";

/// Board column of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    /// All statuses in board order
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }

    /// Column heading
    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "To Do",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Done => "Done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, TaskStatus::Done)
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Todo
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of `todo`, `in_progress`, `done`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid status: {0}")]
pub struct InvalidStatus(pub String);

impl FromStr for TaskStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub created_by_id: Uuid,

    /// Single assignee, mirrored in `task_assignees`
    pub assigned_to_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Editable fields of a task, shared by create and update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFields {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub assignee_id: Option<Uuid>,
}

/// Task as shown on the board, with the names of the people involved
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskCard {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub created_by_id: Uuid,
    pub created_by_name: String,
    pub assigned_to_id: Option<Uuid>,
    pub assigned_to_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Task whose due date falls inside a deadline warning window
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DueTask {
    pub task_id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub due_date: DateTime<Utc>,
    pub project_name: String,
}

impl Task {
    /// Creates a task and writes its assignee
    ///
    /// Takes a connection rather than a generic executor because it issues several
    /// statements; pass `&mut *tx` to run it inside a transaction.
    pub async fn create(
        conn: &mut PgConnection,
        project_id: Uuid,
        created_by_id: Uuid,
        fields: TaskFields,
    ) -> Result<Self, sqlx::Error> {
        let query = format!(
            "INSERT INTO tasks (project_id, title, description, due_date, status, created_by_id) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            TASK_COLUMNS
        );

        let task = sqlx::query_as::<_, Task>(&query)
            .bind(project_id)
            .bind(&fields.title)
            .bind(&fields.description)
            .bind(fields.due_date)
            .bind(fields.status)
            .bind(created_by_id)
            .fetch_one(&mut *conn)
            .await?;

        Self::set_assignee(conn, task.id, fields.assignee_id).await
    }

    /// Finds a task by ID within a project
    ///
    /// A task ID from another project yields `None`.
    pub async fn find_in_project<'e, E>(
        executor: E,
        project_id: Uuid,
        task_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "SELECT {} FROM tasks WHERE id = $1 AND project_id = $2",
            TASK_COLUMNS
        );

        sqlx::query_as::<_, Task>(&query)
            .bind(task_id)
            .bind(project_id)
            .fetch_optional(executor)
            .await
    }

    /// Replaces the editable fields and the assignee
    pub async fn update(
        conn: &mut PgConnection,
        task_id: Uuid,
        fields: TaskFields,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET title = $2, description = $3, due_date = $4, status = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(fields.due_date)
        .bind(fields.status)
        .execute(&mut *conn)
        .await?;

        Self::set_assignee(conn, task_id, fields.assignee_id).await
    }

    /// Writes `assigned_to_id` and the assignee set together
    pub async fn set_assignee(
        conn: &mut PgConnection,
        task_id: Uuid,
        assignee_id: Option<Uuid>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query("DELETE FROM task_assignees WHERE task_id = $1")
            .bind(task_id)
            .execute(&mut *conn)
            .await?;

        if let Some(user_id) = assignee_id {
            sqlx::query("INSERT INTO task_assignees (task_id, user_id) VALUES ($1, $2)")
                .bind(task_id)
                .bind(user_id)
                .execute(&mut *conn)
                .await?;
        }

        let query = format!(
            "UPDATE tasks SET assigned_to_id = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            TASK_COLUMNS
        );

        sqlx::query_as::<_, Task>(&query)
            .bind(task_id)
            .bind(assignee_id)
            .fetch_one(&mut *conn)
            .await
    }

    /// Users in the task's assignee set
    pub async fn assignee_ids<'e, E>(executor: E, task_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar("SELECT user_id FROM task_assignees WHERE task_id = $1")
            .bind(task_id)
            .fetch_all(executor)
            .await
    }

    /// Moves the task to another column
    pub async fn update_status<'e, E>(
        executor: E,
        task_id: Uuid,
        status: TaskStatus,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result =
            sqlx::query("UPDATE tasks SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(task_id)
                .bind(status)
                .execute(executor)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete<'e, E>(executor: E, task_id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(task_id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Board cards of a project
    ///
    /// Ordered by due date with undated tasks last, then by creation time.
    pub async fn list_cards<'e, E>(
        executor: E,
        project_id: Uuid,
    ) -> Result<Vec<TaskCard>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, TaskCard>(
            r#"
            SELECT
                t.id, t.project_id, t.title, t.description, t.due_date, t.status,
                t.created_by_id, creator.name AS created_by_name,
                t.assigned_to_id, assignee.name AS assigned_to_name,
                t.created_at
            FROM tasks t
            JOIN users creator ON creator.id = t.created_by_id
            LEFT JOIN users assignee ON assignee.id = t.assigned_to_id
            WHERE t.project_id = $1
            ORDER BY t.due_date ASC NULLS LAST, t.created_at ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(executor)
        .await
    }

    /// Tasks due inside `[from, until]` that concern the user
    ///
    /// Covers every task of projects the user owns plus tasks where the user is in
    /// the assignee set. Finished tasks are included.
    pub async fn due_for_user<'e, E>(
        executor: E,
        user_id: Uuid,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DueTask>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, DueTask>(
            r#"
            SELECT t.id AS task_id, t.project_id, t.title, t.due_date, p.name AS project_name
            FROM tasks t
            JOIN projects p ON p.id = t.project_id
            WHERE t.due_date IS NOT NULL
              AND t.due_date >= $2
              AND t.due_date <= $3
              AND (
                  p.owner_id = $1
                  OR EXISTS (
                      SELECT 1 FROM task_assignees ta
                      WHERE ta.task_id = t.id AND ta.user_id = $1
                  )
              )
            ORDER BY t.due_date ASC
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(until)
        .fetch_all(executor)
        .await
    }
}
