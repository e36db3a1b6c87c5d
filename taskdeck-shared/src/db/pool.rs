/// PostgreSQL pool for the Taskdeck server
///
/// One pool is opened at startup and shared by all handlers through the
/// application state. Opening it also runs a round-trip query, so a bad
/// `DATABASE_URL` stops the server before it binds its port.
///
/// # Example
///
/// ```no_run
/// use taskdeck_shared::db::pool::{create_pool, pool_stats, DatabaseConfig};
///
/// # async fn example() -> Result<(), sqlx::Error> {
/// let pool = create_pool(DatabaseConfig::new("postgresql://localhost/taskdeck", 10)).await?;
/// println!("{} of {} connections idle", pool_stats(&pool).idle, pool_stats(&pool).open);
/// # Ok(())
/// # }
/// ```

use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Pool sizing and connection lifetimes
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,

    pub max_connections: u32,

    /// Connections opened eagerly and kept idle
    pub min_connections: u32,

    /// Seconds a handler waits for a free connection
    pub connect_timeout_seconds: u64,

    /// Seconds before an idle connection is closed
    pub idle_timeout_seconds: Option<u64>,

    /// Seconds before any connection is recycled
    pub max_lifetime_seconds: Option<u64>,

    pub test_before_acquire: bool,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>, max_connections: u32) -> Self {
        Self {
            url: url.into(),
            max_connections,
            ..Default::default()
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout_seconds: 30,
            idle_timeout_seconds: Some(600),
            max_lifetime_seconds: Some(1800),
            test_before_acquire: true,
        }
    }
}

/// Opens the pool and checks that the database answers
///
/// # Errors
///
/// Fails on a malformed URL, an unreachable server, or a failed round trip.
pub async fn create_pool(config: DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Opening database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
        .idle_timeout(config.idle_timeout_seconds.map(Duration::from_secs))
        .max_lifetime(config.max_lifetime_seconds.map(Duration::from_secs))
        .test_before_acquire(config.test_before_acquire)
        .connect(&config.url)
        .await?;

    health_check(&pool).await?;

    tracing::info!("Database pool ready");
    Ok(pool)
}

/// One round trip to the database
pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    let answer: i32 = sqlx::query_scalar("SELECT 1").fetch_one(pool).await?;

    if answer != 1 {
        tracing::warn!(answer, "Database answered the health query unexpectedly");
        return Err(sqlx::Error::Protocol(format!(
            "health query returned {}",
            answer
        )));
    }

    Ok(())
}

/// Connection counts shown by `/health`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub open: u32,
    pub idle: usize,
    pub in_use: u32,
}

pub fn pool_stats(pool: &PgPool) -> PoolStats {
    let open = pool.size();
    let idle = pool.num_idle();

    PoolStats {
        open,
        idle,
        in_use: open.saturating_sub(u32::try_from(idle).unwrap_or(u32::MAX)),
    }
}

/// Waits for checked-out connections to return, then closes the pool
pub async fn close_pool(pool: PgPool) {
    tracing::info!(stats = ?pool_stats(&pool), "Closing database pool");
    pool.close().await;
}
