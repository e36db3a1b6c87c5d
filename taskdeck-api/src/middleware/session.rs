/// Session middleware and extractors
///
/// Every request gets a [`Session`] handle in its extensions. The middleware
/// loads the data named by the `taskdeck_session` cookie before the handler
/// runs and writes it back afterwards, but only when something changed.
///
/// # Cookie
///
/// `taskdeck_session=<session id>.<hmac>`, with `HttpOnly`, `SameSite=Lax`,
/// `Path=/` and `Max-Age` set to the session lifetime. `Secure` is added in
/// production.
///
/// # Extractors
///
/// - [`Session`]: the raw handle, for anonymous pages such as the sign-in steps
/// - [`AuthContext`]: the signed-in user; anonymous requests are redirected to
///   the login page

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use taskdeck_shared::{
    models::user::User,
    session::{generate_session_id, sign_session_id, verify_session_cookie, Flash, SessionData},
};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use uuid::Uuid;

use crate::{
    app::AppState,
    error::{ApiError, PendingFlash},
};

pub const SESSION_COOKIE: &str = "taskdeck_session";

#[derive(Debug)]
struct SessionState {
    id: String,
    data: SessionData,

    /// Stored under `id` before this request
    persisted: bool,
    dirty: bool,

    /// Move the data to a fresh ID before saving
    renew: bool,
}

/// Handle to the current request's session
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    fn new(id: String, data: SessionData, persisted: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                id,
                data,
                persisted,
                dirty: false,
                renew: false,
            })),
        }
    }

    /// Session that is not backed by a cookie yet
    pub fn fresh() -> Self {
        Self::new(generate_session_id(), SessionData::default(), false)
    }

    pub async fn user_id(&self) -> Option<Uuid> {
        self.state.lock().await.data.user_id
    }

    /// Copy of the current data
    pub async fn data(&self) -> SessionData {
        self.state.lock().await.data.clone()
    }

    /// Mutable access; the session is saved after the request
    pub async fn data_mut(&self) -> MappedMutexGuard<'_, SessionData> {
        let mut guard = self.state.lock().await;
        guard.dirty = true;
        MutexGuard::map(guard, |state| &mut state.data)
    }

    pub async fn flash(&self, flash: Flash) {
        self.data_mut().await.flash(flash);
    }

    /// Drains pending flash messages for display
    pub async fn take_flashes(&self) -> Vec<Flash> {
        let mut guard = self.state.lock().await;
        if guard.data.flashes.is_empty() {
            return Vec::new();
        }
        guard.dirty = true;
        guard.data.take_flashes()
    }

    /// Issues a new session ID at the end of the request
    pub async fn renew(&self) {
        let mut guard = self.state.lock().await;
        guard.renew = true;
        guard.dirty = true;
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .ok_or_else(|| ApiError::InternalError("Session layer is not installed".to_string()))
    }
}

/// The signed-in user of the request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: User,
    pub session: Session,
}

impl AuthContext {
    pub fn user_id(&self) -> Uuid {
        self.user.id
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state).await?;
        let user_id = session.user_id().await.ok_or(ApiError::LoginRequired)?;

        let user = match User::find_by_id(&state.db, user_id).await? {
            Some(user) if user.is_active => user,
            _ => {
                tracing::warn!(%user_id, "Session refers to a missing or inactive user");
                session.data_mut().await.user_id = None;
                return Err(ApiError::LoginRequired);
            }
        };

        Ok(Self { user, session })
    }
}

/// Loads the session before the handler and persists it afterwards
pub async fn session_layer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let secret = state.config.session.secret_key.as_str();
    let cookie_id = session_cookie(req.headers())
        .and_then(|value| verify_session_cookie(&value, secret));

    let session = match cookie_id {
        Some(id) => match state.sessions.load(&id).await {
            Ok(Some(data)) => Session::new(id, data, true),
            Ok(None) => Session::fresh(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to load session");
                Session::fresh()
            }
        },
        None => Session::fresh(),
    };

    req.extensions_mut().insert(session.clone());

    let mut response = next.run(req).await;

    if let Some(PendingFlash(flash)) = response.extensions_mut().remove::<PendingFlash>() {
        session.flash(flash).await;
    }

    match persist(&state, &session).await {
        Ok(Some(cookie)) => {
            response.headers_mut().append(header::SET_COOKIE, cookie);
            response
        }
        Ok(None) => response,
        Err(e) => e.into_response(),
    }
}

/// Saves or deletes the session, returning the `Set-Cookie` value to send
async fn persist(state: &AppState, session: &Session) -> Result<Option<HeaderValue>, ApiError> {
    let mut guard = session.state.lock().await;
    if !guard.dirty {
        return Ok(None);
    }

    let had_cookie = guard.persisted;

    if guard.renew {
        if guard.persisted {
            state.sessions.delete(&guard.id).await?;
        }
        guard.id = generate_session_id();
        guard.persisted = false;
        guard.renew = false;
    }

    let secure = state.config.api.production;

    if guard.data.is_empty() {
        if guard.persisted {
            state.sessions.delete(&guard.id).await?;
            guard.persisted = false;
        }
        guard.dirty = false;
        return if had_cookie {
            Ok(Some(removal_cookie(secure)?))
        } else {
            Ok(None)
        };
    }

    let ttl = state.config.session_ttl();
    state.sessions.save(&guard.id, &guard.data, ttl).await?;
    guard.persisted = true;
    guard.dirty = false;

    let value = sign_session_id(&guard.id, &state.config.session.secret_key);
    Ok(Some(session_cookie_header(&value, ttl.as_secs(), secure)?))
}

/// Value of the session cookie, if the request carries one
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .find_map(|cookie| {
            let (name, value) = cookie.trim().split_once('=')?;
            (name == SESSION_COOKIE).then(|| value.to_string())
        })
}

fn session_cookie_header(value: &str, max_age: u64, secure: bool) -> Result<HeaderValue, ApiError> {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, value, max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }

    HeaderValue::from_str(&cookie)
        .map_err(|e| ApiError::InternalError(format!("Invalid session cookie: {}", e)))
}

fn removal_cookie(secure: bool) -> Result<HeaderValue, ApiError> {
    session_cookie_header("", 0, secure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; taskdeck_session=abc.def; other=1"),
        );

        assert_eq!(session_cookie(&headers).as_deref(), Some("abc.def"));
        assert_eq!(session_cookie(&HeaderMap::new()), None);
    }

    #[test]
    fn test_cookie_attributes() {
        let cookie = session_cookie_header("abc.def", 3600, false).unwrap();
        let cookie = cookie.to_str().unwrap();

        assert!(cookie.starts_with("taskdeck_session=abc.def;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(!cookie.contains("Secure"));

        let secure = session_cookie_header("abc.def", 3600, true).unwrap();
        assert!(secure.to_str().unwrap().ends_with("; Secure"));
    }

    #[tokio::test]
    async fn test_take_flashes_marks_dirty_only_when_present() {
        let session = Session::fresh();
        assert!(session.take_flashes().await.is_empty());
        assert!(!session.state.lock().await.dirty);

        session.flash(Flash::info("Hello")).await;
        let flashes = session.take_flashes().await;
        assert_eq!(flashes.len(), 1);
        assert!(session.state.lock().await.dirty);
    }

    #[tokio::test]
    async fn test_renew_marks_dirty() {
        let session = Session::fresh();
        session.renew().await;

        let state = session.state.lock().await;
        assert!(state.renew);
        assert!(state.dirty);
    }
}
