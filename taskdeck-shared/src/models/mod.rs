/// Database models for Taskdeck
///
/// Each model exposes async associated functions that take any `sqlx::PgExecutor`
/// (a pool, a connection, or `&mut *tx`), so callers decide the transaction scope.
///
/// # Models
///
/// - `user`: Accounts, verification and 2FA state
/// - `otp_token`: Emailed one-time codes
/// - `project`: Project boards
/// - `membership`: User-project relationships with roles
/// - `invitation`: Pending and answered project invitations
/// - `task`: Board tasks and their assignees
/// - `notification`: Invite and deadline notifications
///
/// # Example
///
/// ```no_run
/// use taskdeck_shared::models::user::{User, CreateUser};
/// use taskdeck_shared::db::pool::{create_pool, DatabaseConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::default()).await?;
/// let mut tx = pool.begin().await?;
///
/// let user = User::create(&mut *tx, CreateUser {
///     email: "user@example.com".to_string(),
///     name: "John Doe".to_string(),
///     password_hash: "$argon2id$...".to_string(),
/// }).await?;
///
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```

pub mod invitation;
pub mod membership;
pub mod notification;
pub mod otp_token;
pub mod project;
pub mod task;
pub mod user;
