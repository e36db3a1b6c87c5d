//! # Taskdeck API Server
//!
//! Serves the Taskdeck web API: registration with emailed codes, two-factor
//! sign-in, project boards, invitations and notifications.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p taskdeck-api
//! ```
//!
//! Configuration comes from the environment (and `.env`); see [`Config`].
//! Set `LOG_FORMAT=json` for JSON log lines.

use taskdeck_api::{
    app::{build_router, AppState},
    config::Config,
};
use taskdeck_shared::db::{
    migrations::run_migrations,
    pool::{close_pool, create_pool, DatabaseConfig},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Taskdeck API Server v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;

    let pool = create_pool(DatabaseConfig::new(
        config.database.url.as_str(),
        config.database.max_connections,
    ))
    .await?;

    run_migrations(&pool).await?;

    let address = config.bind_address();
    let state = AppState::from_config(pool.clone(), config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("Server listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    close_pool(pool).await;
    tracing::info!("Server stopped");

    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "taskdeck_api=debug,taskdeck_shared=info,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
