/// Emailed one-time verification codes
///
/// A user holds at most one live code. Issuing supersedes every earlier unused
/// code; verifying consumes the matching code if it has not expired.
///
/// # Example
///
/// ```no_run
/// use taskdeck_shared::auth::otp::{issue_code, verify_code, FixedOtpGenerator};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, user_id: Uuid) -> Result<(), sqlx::Error> {
/// let mut tx = pool.begin().await?;
/// let generator = FixedOtpGenerator::new("123456");
///
/// let code = issue_code(&mut *tx, &generator, user_id, 10).await?;
/// assert!(verify_code(&mut *tx, user_id, &code).await?);
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```

use chrono::{Duration, Utc};
use rand::Rng;
use sqlx::PgConnection;
use uuid::Uuid;

use crate::models::otp_token::OtpToken;

/// Length of an emailed code
pub const OTP_LENGTH: usize = 6;

/// Source of verification codes
pub trait OtpGenerator: Send + Sync {
    /// Returns a 6-digit, zero-padded code
    fn generate(&self) -> String;
}

/// Draws codes uniformly from `000000..=999999`
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomOtpGenerator;

impl OtpGenerator for RandomOtpGenerator {
    fn generate(&self) -> String {
        let value: u32 = rand::thread_rng().gen_range(0..1_000_000);
        format!("{:06}", value)
    }
}

/// Always returns the same code
///
/// Lets tests and local setups know the code without reading email.
#[derive(Debug, Clone)]
pub struct FixedOtpGenerator {
    code: String,
}

impl FixedOtpGenerator {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

impl OtpGenerator for FixedOtpGenerator {
    fn generate(&self) -> String {
        self.code.clone()
    }
}

/// Issues a fresh code for the user
///
/// Every earlier unused code of the user is marked used first. The new code
/// expires `expiration_minutes` from now.
pub async fn issue_code(
    conn: &mut PgConnection,
    generator: &dyn OtpGenerator,
    user_id: Uuid,
    expiration_minutes: i64,
) -> Result<String, sqlx::Error> {
    let superseded = OtpToken::invalidate_unused(&mut *conn, user_id).await?;

    let code = generator.generate();
    let expires_at = Utc::now() + Duration::minutes(expiration_minutes);
    OtpToken::create(&mut *conn, user_id, &code, expires_at).await?;

    tracing::debug!(%user_id, superseded, "Issued one-time code");
    Ok(code)
}

/// Verifies and consumes a code
///
/// Only the most recent unused token carrying `code` is considered. Returns
/// `false` without changing anything if there is none or it has expired.
pub async fn verify_code(
    conn: &mut PgConnection,
    user_id: Uuid,
    code: &str,
) -> Result<bool, sqlx::Error> {
    let code = code.trim();
    if !is_well_formed(code) {
        return Ok(false);
    }

    let Some(token) = OtpToken::find_latest_unused(&mut *conn, user_id, code).await? else {
        return Ok(false);
    };

    if !token.is_valid_at(Utc::now()) {
        tracing::debug!(%user_id, "One-time code expired");
        return Ok(false);
    }

    OtpToken::mark_used(&mut *conn, token.id).await
}

/// Six ASCII digits
pub fn is_well_formed(code: &str) -> bool {
    code.len() == OTP_LENGTH && code.chars().all(|c| c.is_ascii_digit())
}
