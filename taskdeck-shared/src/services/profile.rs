/// Profile changes: display name, avatar and password

use sqlx::PgConnection;
use uuid::Uuid;

use super::ServiceError;
use crate::auth::password::{hash_password, verify_password};
use crate::models::user::User;
use crate::session::Flash;

pub const ALLOWED_AVATAR_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

pub async fn update_name(conn: &mut PgConnection, user_id: Uuid, name: &str) -> Result<(), ServiceError> {
    if !User::update_name(&mut *conn, user_id, name.trim()).await? {
        return Err(ServiceError::NotFound("User"));
    }

    tracing::info!(%user_id, "Display name updated");
    Ok(())
}

/// Stored name for an uploaded avatar: `user_<id>_<sanitized original>`
///
/// # Errors
///
/// Rejects files whose extension is not an allowed image type.
pub fn avatar_filename(user_id: Uuid, original: &str) -> Result<String, ServiceError> {
    let unsupported = || ServiceError::rejected(Flash::danger("Unsupported file type."));

    let sanitized = sanitize_filename(original);
    let (_, extension) = sanitized.rsplit_once('.').ok_or_else(unsupported)?;

    if !ALLOWED_AVATAR_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str()) {
        return Err(unsupported());
    }

    Ok(format!("user_{}_{}", user_id, sanitized))
}

/// Records the stored avatar file on the user
pub async fn set_avatar(conn: &mut PgConnection, user_id: Uuid, filename: &str) -> Result<(), ServiceError> {
    if !User::update_avatar(&mut *conn, user_id, filename).await? {
        return Err(ServiceError::NotFound("User"));
    }

    tracing::info!(%user_id, %filename, "Avatar updated");
    Ok(())
}

/// Replaces the password after checking the current one
pub async fn change_password(
    conn: &mut PgConnection,
    user: &User,
    current_password: &str,
    new_password: &str,
) -> Result<(), ServiceError> {
    if !verify_password(current_password, &user.password_hash)? {
        return Err(ServiceError::rejected(Flash::danger("Current password is incorrect.")));
    }

    let hash = hash_password(new_password)?;
    User::update_password_hash(&mut *conn, user.id, &hash).await?;

    tracing::info!(user_id = %user.id, "Password changed");
    Ok(())
}

/// Keeps ASCII letters, digits, `.`, `-` and `_`; whitespace becomes `_`
///
/// Path components are dropped and leading dots stripped, so the result can be
/// joined onto the upload directory safely.
fn sanitize_filename(original: &str) -> String {
    let base = original
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();

    cleaned.trim_start_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avatar_filename() {
        let id = Uuid::nil();
        assert_eq!(
            avatar_filename(id, "me.png").unwrap(),
            format!("user_{}_me.png", id)
        );
        assert_eq!(
            avatar_filename(id, "Holiday Photo.JPG").unwrap(),
            format!("user_{}_Holiday_Photo.JPG", id)
        );
    }

    #[test]
    fn test_avatar_filename_strips_paths() {
        let id = Uuid::nil();
        assert_eq!(
            avatar_filename(id, "../../etc/evil.gif").unwrap(),
            format!("user_{}_evil.gif", id)
        );
        assert_eq!(
            avatar_filename(id, "C:\\Users\\me\\face.jpeg").unwrap(),
            format!("user_{}_face.jpeg", id)
        );
    }

    #[test]
    fn test_avatar_filename_rejects_other_types() {
        for name in ["notes.txt", "archive.png.exe", "noextension", "", ".png"] {
            match avatar_filename(Uuid::nil(), name) {
                Err(ServiceError::Rejected(flash)) => {
                    assert_eq!(flash.message, "Unsupported file type.")
                }
                other => panic!("{} accepted: {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("ok-file_1.png"), "ok-file_1.png");
        assert_eq!(sanitize_filename("..hidden.png"), "hidden.png");
        assert_eq!(sanitize_filename("naïve café.gif"), "nave_caf.gif");
    }
}
