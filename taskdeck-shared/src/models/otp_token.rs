/// One-time email verification codes
///
/// # Schema
///
/// ```sql
/// CREATE TABLE otp_tokens (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
///     code VARCHAR(6) NOT NULL,
///     expires_at TIMESTAMPTZ NOT NULL,
///     is_used BOOLEAN NOT NULL DEFAULT FALSE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
/// );
/// ```
///
/// Rows are never deleted. Issuing a new code flips every earlier unused code of the
/// user to `is_used`, which leaves at most one live code per user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

/// Emailed verification code
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OtpToken {
    pub id: Uuid,
    pub user_id: Uuid,

    /// Six decimal digits, zero padded
    pub code: String,

    pub expires_at: DateTime<Utc>,

    /// Consumed or superseded
    pub is_used: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OtpToken {
    /// Whether the code can still be redeemed at `now`
    ///
    /// The expiry instant itself is still valid.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_used && now <= self.expires_at
    }

    /// Marks every unused code of the user as used
    ///
    /// Returns the number of superseded codes.
    pub async fn invalidate_unused<'e, E>(executor: E, user_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE otp_tokens
            SET is_used = TRUE, updated_at = NOW()
            WHERE user_id = $1 AND is_used = FALSE
            "#,
        )
        .bind(user_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Stores a freshly generated code
    pub async fn create<'e, E>(
        executor: E,
        user_id: Uuid,
        code: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, OtpToken>(
            r#"
            INSERT INTO otp_tokens (user_id, code, expires_at)
            VALUES ($1, $2, $3)
            RETURNING id, user_id, code, expires_at, is_used, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(code)
        .bind(expires_at)
        .fetch_one(executor)
        .await
    }

    /// Finds the most recent unused token of the user carrying this code
    ///
    /// Expiry is not checked here; see [`OtpToken::is_valid_at`].
    pub async fn find_latest_unused<'e, E>(
        executor: E,
        user_id: Uuid,
        code: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as::<_, OtpToken>(
            r#"
            SELECT id, user_id, code, expires_at, is_used, created_at, updated_at
            FROM otp_tokens
            WHERE user_id = $1 AND code = $2 AND is_used = FALSE
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(code)
        .fetch_optional(executor)
        .await
    }

    /// Consumes the token
    ///
    /// Returns `false` if it was already used, which happens when two requests race
    /// on the same code.
    pub async fn mark_used<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE otp_tokens SET is_used = TRUE, updated_at = NOW() WHERE id = $1 AND is_used = FALSE",
        )
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Number of codes of the user that are still unused
    pub async fn count_unused<'e, E>(executor: E, user_id: Uuid) -> Result<i64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM otp_tokens WHERE user_id = $1 AND is_used = FALSE",
        )
        .bind(user_id)
        .fetch_one(executor)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(expires_at: DateTime<Utc>, is_used: bool) -> OtpToken {
        OtpToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            code: "123456".to_string(),
            expires_at,
            is_used,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_valid_until_expiry_inclusive() {
        let now = Utc::now();
        let t = token(now + Duration::minutes(10), false);

        assert!(t.is_valid_at(now));
        assert!(t.is_valid_at(now + Duration::minutes(10)));
        assert!(!t.is_valid_at(now + Duration::minutes(10) + Duration::seconds(1)));
    }

    #[test]
    fn test_used_token_is_invalid() {
        let now = Utc::now();
        let t = token(now + Duration::minutes(10), true);
        assert!(!t.is_valid_at(now));
    }
}
