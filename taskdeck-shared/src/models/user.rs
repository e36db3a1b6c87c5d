/// User model and database operations
///
/// Users register with an email and password, prove control of the address with
/// an emailed one-time code, and enroll an authenticator app before they can sign in.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     email VARCHAR(120) NOT NULL UNIQUE,
///     name VARCHAR(120) NOT NULL,
///     password_hash VARCHAR(255) NOT NULL,
///     avatar_filename VARCHAR(255),
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     is_verified BOOLEAN NOT NULL DEFAULT FALSE,
///     two_factor_secret VARCHAR(64),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use taskdeck_shared::models::user::{User, CreateUser};
/// use taskdeck_shared::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
///
/// let user = User::create(&pool, CreateUser {
///     email: "user@example.com".to_string(),
///     name: "Jane Doe".to_string(),
///     password_hash: "$argon2id$...".to_string(),
/// }).await?;
///
/// let found = User::find_by_email(&pool, "USER@example.com").await?;
/// assert_eq!(found.map(|u| u.id), Some(user.id));
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, name, password_hash, avatar_filename, is_active, \
                            is_verified, two_factor_secret, created_at, updated_at";

/// User account
///
/// Passwords are stored as Argon2id hashes, never in plaintext.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Unique user ID
    pub id: Uuid,

    /// Email address, always stored lowercase
    pub email: String,

    /// Display name
    pub name: String,

    /// Argon2id password hash
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Stored avatar file name inside the upload folder
    pub avatar_filename: Option<String>,

    /// Whether the account may be used at all
    pub is_active: bool,

    /// Set once the emailed one-time code has been confirmed
    pub is_verified: bool,

    /// Base32 TOTP secret, present once enrollment has started
    #[serde(skip_serializing)]
    pub two_factor_secret: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new (unverified) user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    /// Email address (normalized to lowercase on insert)
    pub email: String,

    /// Display name
    pub name: String,

    /// Argon2id password hash (NOT plaintext password!)
    pub password_hash: String,
}

impl User {
    /// Initials shown when the user has no avatar
    ///
    /// First letter of the first two words of the name, or `?` for a blank name.
    pub fn initials(&self) -> String {
        initials(&self.name)
    }

    /// Whether the user has started authenticator enrollment
    pub fn has_two_factor(&self) -> bool {
        self.two_factor_secret.is_some()
    }

    /// Creates a new unverified user
    ///
    /// # Errors
    ///
    /// Returns an error if the email already exists (unique constraint violation)
    /// or the database is unreachable.
    pub async fn create<'e, E>(executor: E, data: CreateUser) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "INSERT INTO users (email, name, password_hash) VALUES ($1, $2, $3) RETURNING {}",
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&query)
            .bind(normalize_email(&data.email))
            .bind(data.name)
            .bind(data.password_hash)
            .fetch_one(executor)
            .await
    }

    /// Finds a user by ID
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Finds a user by email address
    ///
    /// The lookup is case-insensitive: the argument is lowercased the same way
    /// stored addresses are.
    pub async fn find_by_email<'e, E>(executor: E, email: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);

        sqlx::query_as::<_, User>(&query)
            .bind(normalize_email(email))
            .fetch_optional(executor)
            .await
    }

    /// Replaces name and password of an account that never finished verification
    ///
    /// Used when someone registers again with an address that is still unverified.
    pub async fn reset_registration<'e, E>(
        executor: E,
        id: Uuid,
        name: &str,
        password_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let query = format!(
            "UPDATE users SET name = $2, password_hash = $3, updated_at = NOW() \
             WHERE id = $1 AND is_verified = FALSE RETURNING {}",
            USER_COLUMNS
        );

        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .bind(name)
            .bind(password_hash)
            .fetch_optional(executor)
            .await
    }

    /// Marks the email address as verified
    pub async fn mark_verified<'e, E>(executor: E, id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE users SET is_verified = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Stores the TOTP secret only if the user does not have one yet
    ///
    /// Returns the secret that is stored after the call, which is the existing one
    /// when another request won the race.
    pub async fn set_two_factor_secret_if_absent<'e, E>(
        executor: E,
        id: Uuid,
        secret: &str,
    ) -> Result<Option<String>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let stored: Option<Option<String>> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET two_factor_secret = COALESCE(two_factor_secret, $2),
                updated_at = NOW()
            WHERE id = $1
            RETURNING two_factor_secret
            "#,
        )
        .bind(id)
        .bind(secret)
        .fetch_optional(executor)
        .await?;

        Ok(stored.flatten())
    }

    /// Updates the display name
    pub async fn update_name<'e, E>(executor: E, id: Uuid, name: &str) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("UPDATE users SET name = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(name)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replaces the password hash
    pub async fn update_password_hash<'e, E>(
        executor: E,
        id: Uuid,
        password_hash: &str,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(password_hash)
                .execute(executor)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Points the avatar at a stored file name
    pub async fn update_avatar<'e, E>(
        executor: E,
        id: Uuid,
        avatar_filename: &str,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result =
            sqlx::query("UPDATE users SET avatar_filename = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(avatar_filename)
                .execute(executor)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Lowercases and trims an email address for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn initials(name: &str) -> String {
    let words: Vec<&str> = name.split_whitespace().collect();
    let first_char = |word: &str| word.chars().next().map(|c| c.to_uppercase().to_string());

    match words.as_slice() {
        [] => "?".to_string(),
        [only] => first_char(only).unwrap_or_else(|| "?".to_string()),
        [first, second, ..] => format!(
            "{}{}",
            first_char(first).unwrap_or_default(),
            first_char(second).unwrap_or_default()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_named(name: &str) -> User {
        User {
            id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            name: name.to_string(),
            password_hash: "hash".to_string(),
            avatar_filename: None,
            is_active: true,
            is_verified: false,
            two_factor_secret: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_initials() {
        assert_eq!(user_named("Ada Lovelace").initials(), "AL");
        assert_eq!(user_named("grace").initials(), "G");
        assert_eq!(user_named("  Alan Mathison Turing ").initials(), "AM");
        assert_eq!(user_named("   ").initials(), "?");
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  A@X.Com "), "a@x.com");
        assert_eq!(normalize_email("b@x.com"), "b@x.com");
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut user = user_named("Ada Lovelace");
        user.two_factor_secret = Some("JBSWY3DPEHPK3PXP".to_string());

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("two_factor_secret").is_none());
        assert_eq!(json["name"], "Ada Lovelace");
        assert!(user.has_two_factor());
    }
}
