/// Health check endpoint
///
/// Reports whether the server can reach its database, whether the schema is
/// current, and which session backend is in use.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "database": "connected",
///   "migrations_up_to_date": true,
///   "pool": { "open": 2, "idle": 2, "in_use": 0 },
///   "sessions": "redis"
/// }
/// ```

use crate::app::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use taskdeck_shared::db::{
    migrations::get_migration_status,
    pool::{self, pool_stats, PoolStats},
};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,

    pub version: String,

    /// Database status
    pub database: String,

    /// `None` when the database could not be asked
    pub migrations_up_to_date: Option<bool>,

    pub pool: PoolStats,

    /// Session store backend name
    pub sessions: String,
}

/// Health check handler
///
/// Answers `503 Service Unavailable` with the same body when the database is
/// unreachable.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let connected = match pool::health_check(&state.db).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            false
        }
    };

    let migrations_up_to_date = if connected {
        match get_migration_status(&state.db).await {
            Ok(status) => Some(status.is_up_to_date),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read migration status");
                None
            }
        }
    } else {
        None
    };

    let status = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if connected { "healthy" } else { "degraded" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: if connected { "connected" } else { "disconnected" }.to_string(),
            migrations_up_to_date,
            pool: pool_stats(&state.db),
            sessions: state.sessions.backend().to_string(),
        }),
    )
}
