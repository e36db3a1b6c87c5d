/// Domain services
///
/// Each operation takes a `&mut PgConnection` so the caller controls the
/// transaction. Rejected requests return before writing anything, so rolling back
/// the caller's transaction is never needed to undo a rejection.
///
/// - `auth`: registration, email verification, login and two-factor steps
/// - `projects`: projects, tasks and their authorization rules
/// - `invitations`: inviting members and answering invitations
/// - `notifications`: invite and deadline notifications
/// - `dashboard`: home view and statistics
/// - `profile`: display name, avatar and password changes

pub mod auth;
pub mod dashboard;
pub mod invitations;
pub mod notifications;
pub mod profile;
pub mod projects;

use crate::auth::authorization::AuthzError;
use crate::auth::password::PasswordError;
use crate::auth::totp::TotpError;
use crate::session::Flash;

/// Error type shared by all services
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Entity does not exist (or is hidden from the actor)
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Actor lacks the role or ownership required
    #[error("Forbidden")]
    Forbidden,

    /// Business rule refused the request; nothing was written
    #[error("{}", .0.message)]
    Rejected(Flash),

    /// Malformed input that is not a form field error
    #[error("{0}")]
    Invalid(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Totp(#[from] TotpError),
}

impl ServiceError {
    pub fn rejected(flash: Flash) -> Self {
        ServiceError::Rejected(flash)
    }
}

impl From<AuthzError> for ServiceError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::ProjectNotFound(_) => ServiceError::NotFound("Project"),
            AuthzError::NotMember(_) | AuthzError::NotOwner => ServiceError::Forbidden,
            AuthzError::AssignmentNotAllowed | AuthzError::EditNotAllowed => {
                ServiceError::Rejected(Flash::danger(err.to_string()))
            }
            AuthzError::DatabaseError(e) => ServiceError::Database(e),
        }
    }
}

/// Whether a database error is a unique constraint violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}
