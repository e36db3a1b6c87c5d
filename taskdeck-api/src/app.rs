/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use taskdeck_api::{app::AppState, config::Config};
/// use sqlx::PgPool;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let state = AppState::from_config(pool, config).await?;
/// let app = taskdeck_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    config::Config,
    middleware::{security::SecurityHeadersLayer, session::session_layer},
    routes,
};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    response::Redirect,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use taskdeck_shared::{
    auth::otp::{OtpGenerator, RandomOtpGenerator},
    mail::{build_mailer, Mailer, OutgoingEmail},
    session::{
        memory::MemorySessionStore,
        redis::{RedisConfig, RedisSessionStore},
        SessionStore,
    },
};
use tower_http::{
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// This is cloned for each request handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,

    /// Application configuration
    pub config: Arc<Config>,

    pub sessions: Arc<dyn SessionStore>,

    pub mailer: Arc<dyn Mailer>,

    /// Source of emailed verification codes
    pub otp_generator: Arc<dyn OtpGenerator>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        config: Config,
        sessions: Arc<dyn SessionStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            db,
            config: Arc::new(config),
            sessions,
            mailer,
            otp_generator: Arc::new(RandomOtpGenerator),
        }
    }

    /// Picks the session store and mailer the configuration asks for
    ///
    /// Redis when `REDIS_URL` is set, in-memory sessions otherwise. SMTP when mail
    /// credentials are set, a log-only mailer otherwise.
    pub async fn from_config(db: PgPool, config: Config) -> anyhow::Result<Self> {
        let sessions: Arc<dyn SessionStore> = match &config.session.redis_url {
            Some(url) => Arc::new(RedisSessionStore::new(RedisConfig::new(url.as_str())).await?),
            None => {
                tracing::warn!("REDIS_URL is not set; sessions are kept in memory");
                Arc::new(MemorySessionStore::new())
            }
        };

        let mailer = build_mailer(&config.mail, &config.app_name)?;

        tracing::info!(
            sessions = sessions.backend(),
            mailer = mailer.kind(),
            "Application state ready"
        );

        Ok(Self::new(db, config, sessions, mailer))
    }

    /// Replaces the verification code source
    pub fn with_otp_generator(mut self, generator: Arc<dyn OtpGenerator>) -> Self {
        self.otp_generator = generator;
        self
    }

    /// Delivers an email; failures are logged and otherwise ignored
    pub async fn deliver(&self, email: Option<OutgoingEmail>) {
        let Some(email) = email else {
            return;
        };

        if let Err(e) = self.mailer.send(&email).await {
            tracing::error!(to = %email.to, error = %e, "Failed to deliver email");
        }
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── /health                          # Health check (public)
/// ├── /auth/                           # Sign-in sequence (public)
/// │   ├── GET|POST /register
/// │   ├── GET|POST /verify-otp
/// │   ├── GET|POST /login
/// │   ├── GET|POST /setup-2fa
/// │   ├── GET|POST /verify-2fa
/// │   └── GET      /logout
/// ├── /dashboard/                      # Signed-in user
/// │   ├── GET      /
/// │   ├── GET|POST /profile
/// │   ├── GET      /notifications
/// │   └── POST     /notifications/:id/read
/// ├── /projects/                       # Signed-in user
/// │   ├── POST     /create
/// │   ├── GET      /:id
/// │   ├── POST     /:id/tasks
/// │   ├── POST     /:id/tasks/:task_id
/// │   ├── POST     /:id/tasks/:task_id/move
/// │   ├── POST     /:id/tasks/:task_id/delete
/// │   ├── POST     /:id/delete
/// │   ├── POST     /:id/invite
/// │   └── POST     /invitations/:id/:action
/// └── /avatars/*                       # Uploaded avatars
/// ```
///
/// # Middleware Stack
///
/// Applied in order (bottom to top):
/// 1. Sessions (load before, save after the handler)
/// 2. Logging (tower-http TraceLayer)
/// 3. CORS (tower-http CorsLayer)
/// 4. Security headers
pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/register", get(routes::auth::register_view).post(routes::auth::register))
        .route(
            "/verify-otp",
            get(routes::auth::verify_otp_view).post(routes::auth::verify_otp),
        )
        .route("/login", get(routes::auth::login_view).post(routes::auth::login))
        .route(
            "/setup-2fa",
            get(routes::auth::setup_2fa_view).post(routes::auth::setup_2fa),
        )
        .route(
            "/verify-2fa",
            get(routes::auth::verify_2fa_view).post(routes::auth::verify_2fa),
        )
        .route("/logout", get(routes::auth::logout));

    let dashboard_routes = Router::new()
        .route(
            "/profile",
            get(routes::dashboard::profile_view).post(routes::dashboard::update_profile),
        )
        .route("/notifications", get(routes::dashboard::notifications))
        .route(
            "/notifications/:id/read",
            post(routes::dashboard::mark_notification_read),
        );

    let project_routes = Router::new()
        .route("/create", post(routes::projects::create_project))
        .route("/:id", get(routes::projects::detail))
        .route("/:id/tasks", post(routes::projects::create_task))
        .route("/:id/tasks/:task_id", post(routes::projects::update_task))
        .route("/:id/tasks/:task_id/move", post(routes::projects::move_task))
        .route("/:id/tasks/:task_id/delete", post(routes::projects::delete_task))
        .route("/:id/delete", post(routes::projects::delete_project))
        .route("/:id/invite", post(routes::projects::invite_member))
        .route(
            "/invitations/:id/:action",
            post(routes::projects::handle_invitation),
        );

    // Configure CORS based on environment
    let cors = if state.config.api.cors_origins.contains(&"*".to_string()) {
        // Development mode: permissive CORS
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                header::CONTENT_TYPE,
                header::ACCEPT,
                header::HeaderName::from_static("x-requested-with"),
            ])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .route("/", get(|| async { Redirect::to("/dashboard") }))
        .route("/health", get(routes::health::health_check))
        .nest("/auth", auth_routes)
        .route("/dashboard", get(routes::dashboard::home))
        .nest("/dashboard", dashboard_routes)
        .nest("/projects", project_routes)
        .nest_service("/avatars", ServeDir::new(&state.config.uploads.folder))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            session_layer,
        ))
        .layer(DefaultBodyLimit::max(state.config.uploads.max_content_length))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}
