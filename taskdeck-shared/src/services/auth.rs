/// Sign-in sequence
///
/// ```text
/// anonymous ──register──▶ registered_unverified ──verify_otp──▶ email_verified_no_2fa
///                                                                      │
///                               ┌──────────────── login ◀──────────────┘
///                               ▼
///                   no secret: setup_2fa ──▶ login again
///                   secret:    2fa_pending ──verify_2fa──▶ authenticated
/// ```
///
/// Progress is tracked with single-valued markers in [`SessionData`]. Each step
/// pushes its user-facing message onto the session and tells the caller where
/// to go next. Emails are returned rather than sent, so the caller can deliver
/// them after committing.

use sqlx::PgConnection;
use uuid::Uuid;

use super::{is_unique_violation, ServiceError};
use crate::auth::otp::{issue_code, verify_code, OtpGenerator};
use crate::auth::password::{hash_password, verify_password};
use crate::auth::totp::{ensure_secret, TotpSettings};
use crate::mail::{otp_email, OutgoingEmail};
use crate::models::user::{normalize_email, CreateUser, User};
use crate::session::{Flash, SessionData};

/// Settings the sign-in steps depend on
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Issuer shown in authenticator apps and email subjects
    pub app_name: String,

    pub otp_expiration_minutes: i64,
}

/// Where the client should go after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStep {
    Register,
    VerifyOtp,
    Login,
    SetupTwoFactor,
    VerifyTwoFactor,
    Dashboard,
}

impl AuthStep {
    pub fn path(&self) -> &'static str {
        match self {
            AuthStep::Register => "/auth/register",
            AuthStep::VerifyOtp => "/auth/verify-otp",
            AuthStep::Login => "/auth/login",
            AuthStep::SetupTwoFactor => "/auth/setup-2fa",
            AuthStep::VerifyTwoFactor => "/auth/verify-2fa",
            AuthStep::Dashboard => "/dashboard",
        }
    }
}

/// Result of a step: the next location and an email to deliver after commit
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub next: AuthStep,
    pub email: Option<OutgoingEmail>,

    /// The session should get a new ID (set after a successful sign-in)
    pub renew_session: bool,
}

impl AuthOutcome {
    fn go(next: AuthStep) -> Self {
        Self {
            next,
            email: None,
            renew_session: false,
        }
    }

    fn with_email(next: AuthStep, email: OutgoingEmail) -> Self {
        Self {
            next,
            email: Some(email),
            renew_session: false,
        }
    }
}

/// Registration form values
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub name: String,
    pub password: String,
}

/// What the enrollment page shows
#[derive(Debug, Clone, serde::Serialize)]
pub struct TwoFactorEnrollment {
    pub email: String,
    pub provisioning_uri: String,
    pub qr_data_url: String,
}

/// Creates or refreshes an unverified account and emails a code
///
/// An address that is already verified is refused. An address that registered
/// before but never verified gets the new name and password and a fresh code.
/// Markers left by an earlier attempt in the same session are dropped.
pub async fn register(
    conn: &mut PgConnection,
    session: &mut SessionData,
    generator: &dyn OtpGenerator,
    settings: &AuthSettings,
    form: Registration,
) -> Result<AuthOutcome, ServiceError> {
    session.clear_sign_in_markers();

    let email = normalize_email(&form.email);
    let existing = User::find_by_email(&mut *conn, &email).await?;

    if existing.as_ref().is_some_and(|user| user.is_verified) {
        session.flash(Flash::danger("Email is already registered."));
        return Ok(AuthOutcome::go(AuthStep::Register));
    }

    let password_hash = hash_password(&form.password)?;

    let user = match existing {
        Some(user) => User::reset_registration(&mut *conn, user.id, &form.name, &password_hash)
            .await?
            .ok_or(ServiceError::NotFound("User"))?,
        None => {
            let created = User::create(
                &mut *conn,
                CreateUser {
                    email: email.clone(),
                    name: form.name.clone(),
                    password_hash,
                },
            )
            .await;

            match created {
                Ok(user) => user,
                Err(e) if is_unique_violation(&e) => {
                    session.flash(Flash::danger("Email is already registered."));
                    return Ok(AuthOutcome::go(AuthStep::Register));
                }
                Err(e) => return Err(e.into()),
            }
        }
    };

    let code = issue_code(conn, generator, user.id, settings.otp_expiration_minutes).await?;

    session.pending_user_id = Some(user.id);
    session.flash(Flash::success(
        "Account created. Enter the verification code we emailed you.",
    ));

    tracing::info!(user_id = %user.id, "User registered, verification pending");

    Ok(AuthOutcome::with_email(
        AuthStep::VerifyOtp,
        otp_email(
            &settings.app_name,
            &user.email,
            &user.name,
            &code,
            settings.otp_expiration_minutes,
        ),
    ))
}

/// User waiting for the emailed code, if any
pub async fn pending_otp_user(
    conn: &mut PgConnection,
    session: &SessionData,
) -> Result<Option<User>, ServiceError> {
    match session.pending_user_id {
        Some(id) => Ok(User::find_by_id(&mut *conn, id).await?),
        None => Ok(None),
    }
}

/// Confirms the emailed code
///
/// A wrong or expired code changes nothing, so the user can simply try again.
pub async fn verify_otp(
    conn: &mut PgConnection,
    session: &mut SessionData,
    code: &str,
) -> Result<AuthOutcome, ServiceError> {
    let Some(user) = pending_otp_user(conn, session).await? else {
        session.pending_user_id = None;
        session.flash(Flash::warning("Start by registering or logging in first."));
        return Ok(AuthOutcome::go(AuthStep::Login));
    };

    if !verify_code(conn, user.id, code).await? {
        session.flash(Flash::danger("Invalid or expired code."));
        return Ok(AuthOutcome::go(AuthStep::VerifyOtp));
    }

    User::mark_verified(&mut *conn, user.id).await?;
    session.pending_user_id = None;
    session.flash(Flash::success("Email verified. You can log in now."));

    tracing::info!(user_id = %user.id, "Email verified");
    Ok(AuthOutcome::go(AuthStep::Login))
}

/// Issues a new code for the pending user, superseding the previous one
pub async fn resend_otp(
    conn: &mut PgConnection,
    session: &mut SessionData,
    generator: &dyn OtpGenerator,
    settings: &AuthSettings,
) -> Result<AuthOutcome, ServiceError> {
    let Some(user) = pending_otp_user(conn, session).await? else {
        session.pending_user_id = None;
        session.flash(Flash::warning("Start by registering or logging in first."));
        return Ok(AuthOutcome::go(AuthStep::Login));
    };

    let code = issue_code(conn, generator, user.id, settings.otp_expiration_minutes).await?;
    session.flash(Flash::info("A new verification code has been sent."));

    Ok(AuthOutcome::with_email(
        AuthStep::VerifyOtp,
        otp_email(
            &settings.app_name,
            &user.email,
            &user.name,
            &code,
            settings.otp_expiration_minutes,
        ),
    ))
}

/// Password step
///
/// Starts over: markers left by an earlier attempt are dropped before the
/// credentials are checked.
pub async fn login(
    conn: &mut PgConnection,
    session: &mut SessionData,
    generator: &dyn OtpGenerator,
    settings: &AuthSettings,
    email: &str,
    password: &str,
) -> Result<AuthOutcome, ServiceError> {
    session.clear_sign_in_markers();

    let user = match User::find_by_email(&mut *conn, email).await? {
        Some(user) if user.is_active && verify_password(password, &user.password_hash)? => user,
        _ => {
            session.flash(Flash::danger("Invalid credentials."));
            return Ok(AuthOutcome::go(AuthStep::Login));
        }
    };

    if !user.is_verified {
        let code = issue_code(conn, generator, user.id, settings.otp_expiration_minutes).await?;
        session.pending_user_id = Some(user.id);
        session.flash(Flash::info(
            "Please verify your email first. We sent you a new code.",
        ));

        return Ok(AuthOutcome::with_email(
            AuthStep::VerifyOtp,
            otp_email(
                &settings.app_name,
                &user.email,
                &user.name,
                &code,
                settings.otp_expiration_minutes,
            ),
        ));
    }

    if !user.has_two_factor() {
        session.setup_2fa_user_id = Some(user.id);
        session.flash(Flash::info("Scan the QR code to finish securing your account."));
        return Ok(AuthOutcome::go(AuthStep::SetupTwoFactor));
    }

    session.pending_2fa_user_id = Some(user.id);
    session.flash(Flash::info("Enter your authenticator code to continue."));
    Ok(AuthOutcome::go(AuthStep::VerifyTwoFactor))
}

/// User enrolling an authenticator: the setup marker, else the signed-in user
pub async fn enrollment_user(
    conn: &mut PgConnection,
    session: &SessionData,
) -> Result<Option<User>, ServiceError> {
    match session.setup_2fa_user_id.or(session.user_id) {
        Some(id) => Ok(User::find_by_id(&mut *conn, id).await?),
        None => Ok(None),
    }
}

/// Data for the enrollment page; creates the secret on first visit
pub async fn two_factor_enrollment(
    conn: &mut PgConnection,
    user: &User,
    settings: &AuthSettings,
) -> Result<TwoFactorEnrollment, ServiceError> {
    let secret = ensure_secret(&mut *conn, user).await?;
    let totp = TotpSettings::new(&secret, &settings.app_name, &user.email)?;

    Ok(TwoFactorEnrollment {
        email: user.email.clone(),
        provisioning_uri: totp.provisioning_uri(),
        qr_data_url: totp.qr_data_url()?,
    })
}

/// Confirms authenticator enrollment
///
/// Success sends the user back to the login page; no session is established here.
pub async fn setup_two_factor(
    conn: &mut PgConnection,
    session: &mut SessionData,
    settings: &AuthSettings,
    code: &str,
) -> Result<AuthOutcome, ServiceError> {
    let Some(user) = enrollment_user(conn, session).await? else {
        session.setup_2fa_user_id = None;
        session.flash(Flash::warning("No user pending two-factor setup."));
        return Ok(AuthOutcome::go(AuthStep::Login));
    };

    let secret = ensure_secret(&mut *conn, &user).await?;
    let totp = TotpSettings::new(&secret, &settings.app_name, &user.email)?;

    if !totp.verify(code) {
        session.flash(Flash::danger("Invalid authenticator code. Please try again."));
        return Ok(AuthOutcome::go(AuthStep::SetupTwoFactor));
    }

    session.setup_2fa_user_id = None;
    session.flash(Flash::success(
        "Two-factor authentication enabled. You can log in now.",
    ));

    tracing::info!(user_id = %user.id, "Two-factor authentication enrolled");
    Ok(AuthOutcome::go(AuthStep::Login))
}

/// User waiting at the authenticator challenge
pub async fn challenge_user(
    conn: &mut PgConnection,
    session: &SessionData,
) -> Result<Option<User>, ServiceError> {
    match session.pending_2fa_user_id {
        Some(id) => Ok(User::find_by_id(&mut *conn, id).await?),
        None => Ok(None),
    }
}

/// Authenticator challenge; success signs the user in
pub async fn verify_two_factor(
    conn: &mut PgConnection,
    session: &mut SessionData,
    settings: &AuthSettings,
    code: &str,
) -> Result<AuthOutcome, ServiceError> {
    let Some(user) = challenge_user(conn, session).await? else {
        session.pending_2fa_user_id = None;
        session.flash(Flash::warning("Start by logging in first."));
        return Ok(AuthOutcome::go(AuthStep::Login));
    };

    let verified = match &user.two_factor_secret {
        Some(secret) => TotpSettings::new(secret, &settings.app_name, &user.email)?.verify(code),
        None => false,
    };

    if !verified {
        session.flash(Flash::danger("Invalid authenticator code."));
        return Ok(AuthOutcome::go(AuthStep::VerifyTwoFactor));
    }

    sign_in(session, user.id);
    session.flash(Flash::success("Welcome back!"));

    tracing::info!(user_id = %user.id, "User signed in");
    Ok(AuthOutcome {
        next: AuthStep::Dashboard,
        email: None,
        renew_session: true,
    })
}

/// Clears the signed-in user
pub fn logout(session: &mut SessionData) -> AuthOutcome {
    session.user_id = None;
    session.flash(Flash::info("You have been signed out."));
    AuthOutcome {
        next: AuthStep::Login,
        email: None,
        renew_session: true,
    }
}

fn sign_in(session: &mut SessionData, user_id: Uuid) {
    session.user_id = Some(user_id);
    session.pending_2fa_user_id = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_paths() {
        assert_eq!(AuthStep::VerifyOtp.path(), "/auth/verify-otp");
        assert_eq!(AuthStep::SetupTwoFactor.path(), "/auth/setup-2fa");
        assert_eq!(AuthStep::VerifyTwoFactor.path(), "/auth/verify-2fa");
        assert_eq!(AuthStep::Dashboard.path(), "/dashboard");
    }

    #[test]
    fn test_logout_clears_user_and_flashes() {
        let mut session = SessionData {
            user_id: Some(Uuid::new_v4()),
            ..Default::default()
        };

        let outcome = logout(&mut session);

        assert_eq!(session.user_id, None);
        assert_eq!(outcome.next, AuthStep::Login);
        assert_eq!(session.flashes[0].message, "You have been signed out.");
    }

    #[test]
    fn test_sign_in_clears_challenge_marker() {
        let user_id = Uuid::new_v4();
        let mut session = SessionData {
            pending_2fa_user_id: Some(user_id),
            ..Default::default()
        };

        sign_in(&mut session, user_id);

        assert_eq!(session.user_id, Some(user_id));
        assert_eq!(session.pending_2fa_user_id, None);
    }
}
