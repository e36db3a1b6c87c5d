/// Schema migrations
///
/// The SQL files under `migrations/` at the workspace root are compiled into
/// [`MIGRATOR`]. The server applies pending ones at startup; `/health` reports
/// whether the database has caught up with the build.
///
/// # Example
///
/// ```no_run
/// use taskdeck_shared::db::migrations::{get_migration_status, run_migrations};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// run_migrations(&pool).await?;
/// assert!(get_migration_status(&pool).await?.is_up_to_date);
/// # Ok(())
/// # }
/// ```

use serde::Serialize;
use sqlx::{
    migrate::{MigrateDatabase, MigrateError, Migrator},
    postgres::PgPool,
    Postgres,
};

/// Migrations embedded in this build
pub static MIGRATOR: Migrator = sqlx::migrate!("../migrations");

/// What the database has applied compared with this build
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub applied_migrations: usize,

    /// Newest applied version, e.g. `20260101000001`
    pub latest_version: Option<i64>,

    /// Every embedded migration is applied
    pub is_up_to_date: bool,
}

/// Applies pending migrations, each in its own transaction
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    tracing::info!(embedded = embedded_migration_count(), "Applying migrations");

    MIGRATOR.run(pool).await.map_err(|e| {
        tracing::error!(error = %e, "Migration failed");
        e
    })?;

    tracing::info!("Schema is up to date");
    Ok(())
}

/// Reads `_sqlx_migrations`; a database that never ran migrations reports zero
pub async fn get_migration_status(pool: &PgPool) -> Result<MigrationStatus, sqlx::Error> {
    let tracked: bool = sqlx::query_scalar("SELECT to_regclass('public._sqlx_migrations') IS NOT NULL")
        .fetch_one(pool)
        .await?;

    let applied: Vec<i64> = if tracked {
        sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success ORDER BY version")
            .fetch_all(pool)
            .await?
    } else {
        Vec::new()
    };

    let is_up_to_date = MIGRATOR
        .iter()
        .filter(|m| m.migration_type.is_up_migration())
        .all(|m| applied.contains(&m.version));

    Ok(MigrationStatus {
        applied_migrations: applied.len(),
        latest_version: applied.last().copied(),
        is_up_to_date,
    })
}

pub fn embedded_migration_count() -> usize {
    MIGRATOR
        .iter()
        .filter(|m| m.migration_type.is_up_migration())
        .count()
}

/// Creates the database named in `database_url` when it is missing
///
/// Handy for test runs and fresh development machines.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), sqlx::Error> {
    if Postgres::database_exists(database_url).await? {
        return Ok(());
    }

    tracing::info!("Creating missing database");
    Postgres::create_database(database_url).await
}
