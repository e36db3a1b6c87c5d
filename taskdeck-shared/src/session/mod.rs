/// Server-side sessions
///
/// The browser only holds a signed, opaque session ID. Everything else (the
/// signed-in user, the markers of a login that is still in progress, and pending
/// flash messages) lives in a [`SessionStore`].
///
/// # Backends
///
/// - [`redis::RedisSessionStore`]: shared across processes, expiry handled by Redis
/// - [`memory::MemorySessionStore`]: single process, for development and tests
///
/// # Example
///
/// ```
/// use taskdeck_shared::session::{sign_session_id, verify_session_cookie, generate_session_id};
///
/// let secret = "a-secret-key-that-is-at-least-32-characters";
/// let id = generate_session_id();
/// let cookie = sign_session_id(&id, secret);
///
/// assert_eq!(verify_session_cookie(&cookie, secret).as_deref(), Some(id.as_str()));
/// ```

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Bytes of randomness in a session ID
const SESSION_ID_BYTES: usize = 32;

/// Session store errors
#[derive(Debug, thiserror::Error)]
pub enum SessionStoreError {
    /// Backend unreachable or command failed
    #[error("Session backend error: {0}")]
    Backend(String),

    /// Stored value is not a valid session
    #[error("Session data error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Severity of a flash message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Info,
    Warning,
    Danger,
}

/// One-shot message shown on the next page view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

impl Flash {
    pub fn new(level: FlashLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(FlashLevel::Success, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(FlashLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(FlashLevel::Warning, message)
    }

    pub fn danger(message: impl Into<String>) -> Self {
        Self::new(FlashLevel::Danger, message)
    }
}

/// Everything stored for one browser session
///
/// The three markers each hold the user currently going through that step of
/// the sign-in sequence. Starting a new registration or login overwrites them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    /// Fully signed-in user
    #[serde(default)]
    pub user_id: Option<Uuid>,

    /// Waiting for the emailed one-time code
    #[serde(default)]
    pub pending_user_id: Option<Uuid>,

    /// Verified, password checked, authenticator not enrolled yet
    #[serde(default)]
    pub setup_2fa_user_id: Option<Uuid>,

    /// Password checked, waiting for the authenticator code
    #[serde(default)]
    pub pending_2fa_user_id: Option<Uuid>,

    /// Flash messages not yet shown
    #[serde(default)]
    pub flashes: Vec<Flash>,
}

impl SessionData {
    pub fn flash(&mut self, flash: Flash) {
        self.flashes.push(flash);
    }

    /// Removes and returns all pending flash messages
    pub fn take_flashes(&mut self) -> Vec<Flash> {
        std::mem::take(&mut self.flashes)
    }

    /// Forgets every in-progress sign-in step
    ///
    /// Flashes and the signed-in user are kept.
    pub fn clear_sign_in_markers(&mut self) {
        self.pending_user_id = None;
        self.setup_2fa_user_id = None;
        self.pending_2fa_user_id = None;
    }

    /// Whether there is nothing worth persisting
    pub fn is_empty(&self) -> bool {
        *self == SessionData::default()
    }
}

/// Storage backend for sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads a session, `None` if unknown or expired
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, SessionStoreError>;

    /// Stores a session, replacing any previous value and resetting its expiry
    async fn save(
        &self,
        session_id: &str,
        data: &SessionData,
        ttl: Duration,
    ) -> Result<(), SessionStoreError>;

    /// Forgets a session
    async fn delete(&self, session_id: &str) -> Result<(), SessionStoreError>;

    /// Backend name for logs and the health endpoint
    fn backend(&self) -> &'static str;
}

/// Generates a new random session ID (64 hex characters)
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Produces the cookie value `<session_id>.<hex hmac-sha256>`
pub fn sign_session_id(session_id: &str, secret: &str) -> String {
    format!("{}.{}", session_id, hex::encode(signature(session_id, secret)))
}

/// Checks a cookie value and returns the session ID it carries
///
/// Returns `None` for anything malformed or signed with another key.
pub fn verify_session_cookie(cookie_value: &str, secret: &str) -> Option<String> {
    let (session_id, tag_hex) = cookie_value.rsplit_once('.')?;

    if session_id.len() != SESSION_ID_BYTES * 2
        || !session_id.chars().all(|c| c.is_ascii_hexdigit())
    {
        return None;
    }

    let tag = hex::decode(tag_hex).ok()?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(session_id.as_bytes());
    mac.verify_slice(&tag).ok()?;

    Some(session_id.to_string())
}

fn signature(session_id: &str, secret: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(session_id.as_bytes());
    mac.finalize().into_bytes().to_vec()
}
