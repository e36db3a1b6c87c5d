/// Sign-in sequence endpoints
///
/// # Endpoints
///
/// - `GET|POST /auth/register` - Create an account and email a code
/// - `GET|POST /auth/verify-otp` - Confirm the emailed code (`resend=1` issues a new one)
/// - `GET|POST /auth/login` - Password step
/// - `GET|POST /auth/setup-2fa` - Authenticator enrollment (QR code)
/// - `GET|POST /auth/verify-2fa` - Authenticator challenge
/// - `GET /auth/logout` - Sign out
///
/// Posts answer `303 See Other` to the next step with a flash message. Each
/// step's progress marker lives in the session, so the steps only work in order.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult, ValidationErrorDetail},
    middleware::session::Session,
    routes::View,
};
use axum::{
    extract::State,
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use taskdeck_shared::{
    auth::password::validate_password_length,
    services::auth::{self as flow, AuthOutcome, AuthStep, Registration},
    session::Flash,
};
use validator::Validate;

/// Registration form
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct RegisterForm {
    #[validate(length(min = 1, max = 120, message = "Name is required (at most 120 characters)"))]
    pub name: String,

    #[validate(
        email(message = "Invalid email format"),
        length(max = 120, message = "Email must be at most 120 characters")
    )]
    pub email: String,

    pub password: String,

    #[validate(must_match(other = "password", message = "Passwords must match"))]
    pub confirm_password: String,
}

/// Emailed code form; `resend` asks for a new code instead
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct VerifyOtpForm {
    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub code: String,

    pub resend: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct LoginForm {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Authenticator code form
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(default)]
pub struct TokenForm {
    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    pub token: String,
}

/// Body of the simple sign-in pages
#[derive(Debug, Serialize)]
pub struct StepPage {
    pub step: &'static str,

    /// Account going through the step, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl StepPage {
    fn new(step: &'static str, email: Option<String>) -> Self {
        Self { step, email }
    }
}

/// `GET /auth/register`
pub async fn register_view(session: Session) -> Response {
    if session.user_id().await.is_some() {
        return Redirect::to(AuthStep::Dashboard.path()).into_response();
    }

    page(&session, StepPage::new("register", None)).await
}

/// `POST /auth/register`
///
/// # Errors
///
/// - `422 Unprocessable Entity`: Form validation failed
pub async fn register(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<RegisterForm>,
) -> ApiResult<Response> {
    if session.user_id().await.is_some() {
        return Ok(Redirect::to(AuthStep::Dashboard.path()).into_response());
    }

    form.validate()?;
    check_password_length("password", &form.password)?;

    let settings = state.config.auth_settings();
    let mut tx = state.db.begin().await?;

    let outcome = {
        let mut data = session.data_mut().await;
        flow::register(
            &mut tx,
            &mut data,
            state.otp_generator.as_ref(),
            &settings,
            Registration {
                email: form.email,
                name: form.name.trim().to_string(),
                password: form.password,
            },
        )
        .await?
    };

    tx.commit().await?;
    Ok(finish(&state, &session, outcome).await)
}

/// `GET /auth/verify-otp`
pub async fn verify_otp_view(State(state): State<AppState>, session: Session) -> ApiResult<Response> {
    let data = session.data().await;
    let mut conn = state.db.acquire().await?;

    match flow::pending_otp_user(&mut conn, &data).await? {
        Some(user) => Ok(page(&session, StepPage::new("verify_otp", Some(user.email))).await),
        None => {
            Ok(redirect_with(&session, Flash::warning("Start by registering or logging in first."), AuthStep::Login)
                .await)
        }
    }
}

/// `POST /auth/verify-otp`
pub async fn verify_otp(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<VerifyOtpForm>,
) -> ApiResult<Response> {
    let settings = state.config.auth_settings();
    let resend = form.resend.as_deref().is_some_and(|value| !value.is_empty() && value != "0");

    if !resend {
        form.validate()?;
    }

    let mut tx = state.db.begin().await?;

    let outcome = {
        let mut data = session.data_mut().await;
        if resend {
            flow::resend_otp(&mut tx, &mut data, state.otp_generator.as_ref(), &settings).await?
        } else {
            flow::verify_otp(&mut tx, &mut data, form.code.trim()).await?
        }
    };

    tx.commit().await?;
    Ok(finish(&state, &session, outcome).await)
}

/// `GET /auth/login`
pub async fn login_view(session: Session) -> Response {
    if session.user_id().await.is_some() {
        return Redirect::to(AuthStep::Dashboard.path()).into_response();
    }

    page(&session, StepPage::new("login", None)).await
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<LoginForm>,
) -> ApiResult<Response> {
    if session.user_id().await.is_some() {
        return Ok(Redirect::to(AuthStep::Dashboard.path()).into_response());
    }

    form.validate()?;

    let settings = state.config.auth_settings();
    let mut tx = state.db.begin().await?;

    let outcome = {
        let mut data = session.data_mut().await;
        flow::login(
            &mut tx,
            &mut data,
            state.otp_generator.as_ref(),
            &settings,
            &form.email,
            &form.password,
        )
        .await?
    };

    tx.commit().await?;
    Ok(finish(&state, &session, outcome).await)
}

/// `GET /auth/setup-2fa`
///
/// Creates the user's secret on the first visit and returns the provisioning
/// URI with a QR code as a `data:` URL.
pub async fn setup_2fa_view(State(state): State<AppState>, session: Session) -> ApiResult<Response> {
    let data = session.data().await;
    let mut tx = state.db.begin().await?;

    let Some(user) = flow::enrollment_user(&mut tx, &data).await? else {
        return Ok(
            redirect_with(&session, Flash::warning("No user pending two-factor setup."), AuthStep::Login).await,
        );
    };

    let enrollment = flow::two_factor_enrollment(&mut tx, &user, &state.config.auth_settings()).await?;
    tx.commit().await?;

    Ok(page(&session, enrollment).await)
}

/// `POST /auth/setup-2fa`
pub async fn setup_2fa(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<TokenForm>,
) -> ApiResult<Response> {
    form.validate()?;

    let settings = state.config.auth_settings();
    let mut tx = state.db.begin().await?;

    let outcome = {
        let mut data = session.data_mut().await;
        flow::setup_two_factor(&mut tx, &mut data, &settings, form.token.trim()).await?
    };

    tx.commit().await?;
    Ok(finish(&state, &session, outcome).await)
}

/// `GET /auth/verify-2fa`
pub async fn verify_2fa_view(State(state): State<AppState>, session: Session) -> ApiResult<Response> {
    if session.user_id().await.is_some() {
        return Ok(Redirect::to(AuthStep::Dashboard.path()).into_response());
    }

    let data = session.data().await;
    let mut conn = state.db.acquire().await?;

    match flow::challenge_user(&mut conn, &data).await? {
        Some(user) => Ok(page(&session, StepPage::new("verify_2fa", Some(user.email))).await),
        None => Ok(redirect_with(&session, Flash::warning("Start by logging in first."), AuthStep::Login).await),
    }
}

/// `POST /auth/verify-2fa`
pub async fn verify_2fa(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<TokenForm>,
) -> ApiResult<Response> {
    if session.user_id().await.is_some() {
        return Ok(Redirect::to(AuthStep::Dashboard.path()).into_response());
    }

    form.validate()?;

    let settings = state.config.auth_settings();
    let mut conn = state.db.acquire().await?;

    let outcome = {
        let mut data = session.data_mut().await;
        flow::verify_two_factor(&mut conn, &mut data, &settings, form.token.trim()).await?
    };

    Ok(finish(&state, &session, outcome).await)
}

/// `GET /auth/logout`
pub async fn logout(State(state): State<AppState>, session: Session) -> Response {
    let outcome = {
        let mut data = session.data_mut().await;
        flow::logout(&mut data)
    };

    finish(&state, &session, outcome).await
}

/// Delivers the step's email (the transaction is already committed) and
/// redirects to the next step
async fn finish(state: &AppState, session: &Session, outcome: AuthOutcome) -> Response {
    state.deliver(outcome.email).await;

    if outcome.renew_session {
        session.renew().await;
    }

    Redirect::to(outcome.next.path()).into_response()
}

async fn redirect_with(session: &Session, flash: Flash, step: AuthStep) -> Response {
    session.flash(flash).await;
    Redirect::to(step.path()).into_response()
}

async fn page<T: Serialize>(session: &Session, data: T) -> Response {
    Json(View::new(data, session.take_flashes().await)).into_response()
}

fn check_password_length(field: &str, password: &str) -> Result<(), ApiError> {
    validate_password_length(password).map_err(|message| {
        ApiError::ValidationError(vec![ValidationErrorDetail {
            field: field.to_string(),
            message,
        }])
    })
}
