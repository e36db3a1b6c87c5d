/// Configuration management for the API server
///
/// This module loads configuration from environment variables (and a `.env`
/// file when present) into a type-safe configuration struct.
///
/// # Environment Variables
///
/// - `APP_NAME`: Name shown in emails and authenticator apps (default: Taskdeck)
/// - `SECRET_KEY`: Key signing session cookies, at least 32 characters (required)
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 10)
/// - `API_HOST` / `API_PORT`: Bind address (default: 0.0.0.0:8080)
/// - `CORS_ORIGINS`: Comma separated origins, `*` for any (default: *)
/// - `PRODUCTION`: Enables HSTS and secure cookies (default: false)
/// - `REDIS_URL`: Session store; sessions stay in memory when unset
/// - `SESSION_TTL_SECONDS`: Session lifetime (default: 604800)
/// - `MAIL_SERVER`, `MAIL_PORT`, `MAIL_USE_TLS`, `MAIL_USERNAME`,
///   `MAIL_PASSWORD`, `MAIL_DEFAULT_SENDER`: SMTP relay
/// - `OTP_EXPIRATION_MINUTES`: Lifetime of emailed codes (default: 10)
/// - `TASK_DEADLINE_WARNING_DAYS`: Deadline notification window (default: 2)
/// - `UPLOAD_FOLDER`: Avatar directory (default: ./uploads/avatars)
/// - `RUST_LOG`: Log level (default: info)
///
/// # Example
///
/// ```no_run
/// use taskdeck_api::config::Config;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}:{}", config.api.host, config.api.port);
/// # Ok(())
/// # }
/// ```

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use taskdeck_shared::mail::MailConfig;
use taskdeck_shared::services::auth::AuthSettings;

/// Largest accepted request body (avatar uploads)
pub const MAX_CONTENT_LENGTH: usize = 5 * 1024 * 1024;

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,

    /// API server configuration
    pub api: ApiConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    pub session: SessionConfig,

    pub mail: MailConfig,

    pub auth: AuthConfig,

    pub uploads: UploadConfig,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,

    /// Production deployment behind HTTPS
    pub production: bool,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in pool
    pub max_connections: u32,
}

/// Session cookie and store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Key for signing session cookies
    ///
    /// IMPORTANT: This must be kept secret and should be at least 32 bytes.
    /// Generate with: `openssl rand -hex 32`
    pub secret_key: String,

    pub ttl_seconds: u64,

    /// Redis URL; `None` keeps sessions in process memory
    pub redis_url: Option<String>,
}

/// Sign-in settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub otp_expiration_minutes: i64,
    pub deadline_warning_days: i64,
}

/// Avatar upload settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub folder: PathBuf,
    pub max_content_length: usize,
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing
    /// - Environment variables have invalid values
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        let secret_key = env::var("SECRET_KEY")
            .map_err(|_| anyhow::anyhow!("SECRET_KEY environment variable is required"))?;

        if secret_key.len() < 32 {
            anyhow::bail!("SECRET_KEY must be at least 32 characters long");
        }

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        let otp_expiration_minutes: i64 = parse_var("OTP_EXPIRATION_MINUTES", 10)?;
        if otp_expiration_minutes <= 0 {
            anyhow::bail!("OTP_EXPIRATION_MINUTES must be positive");
        }

        let deadline_warning_days: i64 = parse_var("TASK_DEADLINE_WARNING_DAYS", 2)?;
        if deadline_warning_days < 0 {
            anyhow::bail!("TASK_DEADLINE_WARNING_DAYS must not be negative");
        }

        let mail_defaults = MailConfig::default();

        Ok(Self {
            app_name: env::var("APP_NAME").unwrap_or_else(|_| "Taskdeck".to_string()),
            api: ApiConfig {
                host: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_var("API_PORT", 8080)?,
                cors_origins: parse_origins(
                    &env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string()),
                ),
                production: parse_var("PRODUCTION", false)?,
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            session: SessionConfig {
                secret_key,
                ttl_seconds: parse_var("SESSION_TTL_SECONDS", 604_800)?,
                redis_url: optional_var("REDIS_URL"),
            },
            mail: MailConfig {
                server: env::var("MAIL_SERVER").unwrap_or(mail_defaults.server),
                port: parse_var("MAIL_PORT", mail_defaults.port)?,
                use_tls: parse_var("MAIL_USE_TLS", mail_defaults.use_tls)?,
                username: optional_var("MAIL_USERNAME"),
                password: optional_var("MAIL_PASSWORD"),
                default_sender: optional_var("MAIL_DEFAULT_SENDER"),
            },
            auth: AuthConfig {
                otp_expiration_minutes,
                deadline_warning_days,
            },
            uploads: UploadConfig {
                folder: env::var("UPLOAD_FOLDER")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./uploads/avatars")),
                max_content_length: MAX_CONTENT_LENGTH,
            },
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session.ttl_seconds)
    }

    /// Settings handed to the sign-in services
    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            app_name: self.app_name.clone(),
            otp_expiration_minutes: self.auth.otp_expiration_minutes,
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", name, e)),
        _ => Ok(default),
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}
