/// Error handling for the API server
///
/// This module provides a unified error type that maps to HTTP responses.
/// All handlers should return `Result<T, ApiError>` which automatically
/// converts to appropriate HTTP status codes.
///
/// Two variants do not produce a JSON body:
///
/// - [`ApiError::LoginRequired`] redirects anonymous users to the login page
/// - [`ApiError::Redirect`] carries a flash message and a `303 See Other`;
///   the session middleware picks the message up from the response extensions
///
/// # Example
///
/// ```
/// use taskdeck_api::error::{ApiError, ApiResult};
/// use axum::Json;
/// use serde_json::json;
///
/// async fn handler() -> ApiResult<Json<serde_json::Value>> {
///     Err(ApiError::NotFound("Project not found".to_string()))
/// }
/// ```

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use taskdeck_shared::{
    auth::{password::PasswordError, totp::TotpError},
    services::ServiceError,
    session::{Flash, SessionStoreError},
};
use validator::ValidationErrors;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Forbidden (403)
    Forbidden(String),

    /// Not found (404)
    NotFound(String),

    /// Unprocessable entity (422) - validation errors
    ValidationError(Vec<ValidationErrorDetail>),

    /// No signed-in user (303 to the login page)
    LoginRequired,

    /// Business rule refused the request (flash + 303)
    Redirect { flash: Flash, to: String },

    /// Internal server error (500)
    InternalError(String),

    /// Service unavailable (503)
    ServiceUnavailable(String),
}

/// Validation error detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Field that failed validation
    pub field: String,

    /// Error message
    pub message: String,
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "bad_request", "forbidden")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Optional validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

/// Flash message attached to a response for the session middleware to store
#[derive(Debug, Clone)]
pub struct PendingFlash(pub Flash);

pub const LOGIN_PATH: &str = "/auth/login";

impl ApiError {
    pub fn redirect(flash: Flash, to: impl Into<String>) -> Self {
        ApiError::Redirect {
            flash,
            to: to.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::LoginRequired => write!(f, "Login required"),
            ApiError::Redirect { flash, to } => write!(f, "Redirect to {}: {}", to, flash.message),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::LoginRequired => {
                return see_other(LOGIN_PATH, Some(Flash::info("Please log in to access this page.")));
            }
            ApiError::Redirect { flash, to } => {
                return see_other(&to, Some(flash));
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::ValidationError(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                "Request validation failed".to_string(),
                Some(errors),
            ),
            ApiError::InternalError(msg) => {
                // Log internal errors but don't expose details to clients
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                msg,
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

/// `303 See Other` to `to`, optionally carrying a flash message
pub fn see_other(to: &str, flash: Option<Flash>) -> Response {
    let mut response = (StatusCode::SEE_OTHER, [(header::LOCATION, to.to_string())]).into_response();
    if let Some(flash) = flash {
        response.extensions_mut().insert(PendingFlash(flash));
    }
    response
}

/// Convert sqlx errors to API errors
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            _ => ApiError::InternalError(format!("Database error: {}", err)),
        }
    }
}

/// Convert service errors to API errors
///
/// Rejections become a redirect to the dashboard. Handlers that know a better
/// destination use [`ServiceResultExt::or_redirect`].
impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            ServiceError::Forbidden => {
                ApiError::Forbidden("Not authorized to access this resource".to_string())
            }
            ServiceError::Rejected(flash) => ApiError::redirect(flash, "/dashboard"),
            ServiceError::Invalid(msg) => ApiError::BadRequest(msg),
            ServiceError::Database(e) => e.into(),
            ServiceError::Password(e) => e.into(),
            ServiceError::Totp(e) => e.into(),
        }
    }
}

/// Convert password errors to API errors
impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::InternalError(format!("Password operation failed: {}", err))
    }
}

impl From<TotpError> for ApiError {
    fn from(err: TotpError) -> Self {
        ApiError::InternalError(format!("TOTP operation failed: {}", err))
    }
}

impl From<SessionStoreError> for ApiError {
    fn from(err: SessionStoreError) -> Self {
        ApiError::InternalError(format!("Session store error: {}", err))
    }
}

/// Convert validator errors to a 422 with per-field details
impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::ValidationError(validation_details(&errors))
    }
}

/// Flattens validator errors into `{field, message}` entries, sorted by field
pub fn validation_details(errors: &ValidationErrors) -> Vec<ValidationErrorDetail> {
    let mut details: Vec<ValidationErrorDetail> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| ValidationErrorDetail {
                field: field.to_string(),
                message: error
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "Validation failed".to_string()),
            })
        })
        .collect();

    details.sort_by(|a, b| a.field.cmp(&b.field));
    details
}

/// Sends service rejections to a specific page
pub trait ServiceResultExt<T> {
    fn or_redirect(self, to: &str) -> ApiResult<T>;
}

impl<T> ServiceResultExt<T> for Result<T, ServiceError> {
    fn or_redirect(self, to: &str) -> ApiResult<T> {
        self.map_err(|err| match err {
            ServiceError::Rejected(flash) => ApiError::redirect(flash, to),
            other => other.into(),
        })
    }
}
