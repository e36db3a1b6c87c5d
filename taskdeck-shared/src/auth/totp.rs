/// TOTP two-factor authentication
///
/// Authenticator apps are enrolled with a per-user base32 secret. Codes are
/// SHA1, 6 digits, 30 second steps, and one step of clock skew is accepted in
/// either direction.
///
/// # Example
///
/// ```
/// use taskdeck_shared::auth::totp::{generate_secret, TotpSettings};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let secret = generate_secret();
/// let settings = TotpSettings::new(&secret, "Taskdeck", "user@example.com")?;
///
/// assert!(settings.provisioning_uri().starts_with("otpauth://totp/"));
///
/// let code = settings.generate_at(1_700_000_000);
/// assert!(settings.verify_at(&code, 1_700_000_000));
/// # Ok(())
/// # }
/// ```

use sqlx::PgExecutor;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use crate::models::user::User;

const DIGITS: usize = 6;
const SKEW: u8 = 1;
const STEP_SECONDS: u64 = 30;

/// Error type for TOTP operations
#[derive(Debug, thiserror::Error)]
pub enum TotpError {
    /// Stored secret is not valid base32 or is too short
    #[error("Invalid TOTP secret: {0}")]
    InvalidSecret(String),

    /// QR image could not be rendered
    #[error("Failed to generate QR code: {0}")]
    QrCode(String),

    /// User row disappeared while enrolling
    #[error("User {0} not found")]
    UserNotFound(Uuid),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Generates a new random base32 secret
pub fn generate_secret() -> String {
    Secret::generate_secret().to_encoded().to_string()
}

/// Returns the user's secret, generating and storing one on first use
///
/// Calling this twice yields the same secret; concurrent first calls converge on
/// whichever secret was stored first.
pub async fn ensure_secret<'e, E>(executor: E, user: &User) -> Result<String, TotpError>
where
    E: PgExecutor<'e>,
{
    if let Some(secret) = &user.two_factor_secret {
        return Ok(secret.clone());
    }

    let candidate = generate_secret();
    let stored = User::set_two_factor_secret_if_absent(executor, user.id, &candidate)
        .await?
        .ok_or(TotpError::UserNotFound(user.id))?;

    tracing::info!(user_id = %user.id, "Generated two-factor secret");
    Ok(stored)
}

/// TOTP parameters bound to one secret and account
#[derive(Debug, Clone)]
pub struct TotpSettings {
    totp: TOTP,
}

impl TotpSettings {
    /// Builds the TOTP for `secret`, labelled with `issuer` and `account`
    ///
    /// # Errors
    ///
    /// Returns `TotpError::InvalidSecret` if the secret does not decode or is
    /// shorter than 128 bits, or if the labels contain a colon.
    pub fn new(secret: &str, issuer: &str, account: &str) -> Result<Self, TotpError> {
        let secret_bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| TotpError::InvalidSecret(e.to_string()))?;

        let totp = TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW,
            STEP_SECONDS,
            secret_bytes,
            Some(issuer.to_string()),
            account.to_string(),
        )
        .map_err(|e| TotpError::InvalidSecret(e.to_string()))?;

        Ok(Self { totp })
    }

    /// `otpauth://totp/...` URI understood by authenticator apps
    pub fn provisioning_uri(&self) -> String {
        self.totp.get_url()
    }

    /// QR code of the provisioning URI as a PNG data URL
    pub fn qr_data_url(&self) -> Result<String, TotpError> {
        let base64 = self.totp.get_qr_base64().map_err(TotpError::QrCode)?;
        Ok(format!("data:image/png;base64,{}", base64))
    }

    /// Checks `code` against the current time
    ///
    /// A clock error counts as a failed check.
    pub fn verify(&self, code: &str) -> bool {
        self.totp.check_current(code.trim()).unwrap_or(false)
    }

    /// Checks `code` against a given unix time
    pub fn verify_at(&self, code: &str, unix_time: u64) -> bool {
        self.totp.check(code.trim(), unix_time)
    }

    /// Code valid at a given unix time
    pub fn generate_at(&self, unix_time: u64) -> String {
        self.totp.generate(unix_time)
    }
}
