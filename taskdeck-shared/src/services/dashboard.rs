/// Home view

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgConnection;
use uuid::Uuid;

use super::{notifications, ServiceError};
use crate::models::membership::MembershipRole;
use crate::models::notification::{Notification, NotificationType};
use crate::models::project::{Project, ProjectSummary};

/// Deadline notifications shown on the home view
pub const RECENT_DEADLINES: i64 = 5;

/// Counters shown above the project list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardStats {
    pub projects: usize,
    pub owned: usize,
    pub total_tasks: i64,
    pub active_tasks: i64,
    pub completed_tasks: i64,
}

impl DashboardStats {
    pub fn from_projects(projects: &[ProjectSummary]) -> Self {
        let total_tasks: i64 = projects.iter().map(|p| p.tasks_total).sum();
        let completed_tasks: i64 = projects.iter().map(|p| p.tasks_done).sum();

        Self {
            projects: projects.len(),
            owned: projects
                .iter()
                .filter(|p| p.role == MembershipRole::Owner)
                .count(),
            total_tasks,
            active_tasks: total_tasks - completed_tasks,
            completed_tasks,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardHome {
    pub projects: Vec<ProjectSummary>,
    pub deadlines: Vec<Notification>,
    pub stats: DashboardStats,
}

/// Refreshes deadline notifications, then gathers the home view
pub async fn home(
    conn: &mut PgConnection,
    user_id: Uuid,
    warning_days: i64,
    now: DateTime<Utc>,
) -> Result<DashboardHome, ServiceError> {
    notifications::ensure_deadline_notifications(conn, user_id, warning_days, now).await?;

    let projects = Project::list_for_user(&mut *conn, user_id).await?;
    let deadlines = Notification::recent_of_type(
        &mut *conn,
        user_id,
        NotificationType::Deadline,
        RECENT_DEADLINES,
    )
    .await?;

    Ok(DashboardHome {
        stats: DashboardStats::from_projects(&projects),
        projects,
        deadlines,
    })
}
