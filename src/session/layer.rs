//! Session middleware and request handle

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, header::SET_COOKIE, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::Cookie;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::token::{generate_session_id, sign_session_id, verify_session_cookie};
use super::{SessionData, SessionError, SessionStore};
use crate::AppState;
use crate::auth::Identity;
use crate::cookies::{SESSION_COOKIE, persistent_cookie, removal_cookie};
use crate::error::AppError;
use crate::origin::RequestOrigin;

#[derive(Debug)]
struct SessionState {
    id: String,
    data: SessionData,
    is_new: bool,
    dirty: bool,
    destroyed: bool,
    /// Previous id whose record is dropped on commit
    retired: Option<String>,
}

impl SessionState {
    /// Move the data to a fresh id
    ///
    /// A session that was never stored has not been handed out yet and keeps its id.
    fn rotate(&mut self) {
        if self.is_new {
            return;
        }
        let previous = std::mem::replace(&mut self.id, generate_session_id());
        self.retired = Some(previous);
        self.is_new = true;
    }
}

/// The current visitor's session
///
/// Cloned into request extensions by [`session_layer`]; changes are
/// persisted and the cookie refreshed once the response is produced.
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<Mutex<SessionState>>,
    store: Arc<dyn SessionStore>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("SessionHandle")
            .field("is_new", &state.is_new)
            .field("dirty", &state.dirty)
            .field("destroyed", &state.destroyed)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    fn new(id: String, data: SessionData, is_new: bool, store: Arc<dyn SessionStore>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                id,
                data,
                is_new,
                dirty: false,
                destroyed: false,
                retired: None,
            })),
            store,
        }
    }

    /// Load the session named by the request's cookie, or start a new one
    pub async fn load(
        store: Arc<dyn SessionStore>,
        jar: &CookieJar,
        secret: &str,
        default_max_age: Duration,
    ) -> Self {
        let existing_id = jar
            .get(SESSION_COOKIE)
            .and_then(|cookie| verify_session_cookie(cookie.value(), secret));

        if let Some(id) = existing_id {
            match store.load(&id).await {
                Ok(Some(data)) => return Self::new(id, data, false, store),
                Ok(None) => tracing::debug!("Session cookie refers to an expired session"),
                Err(error) => tracing::error!(%error, "Failed to load session; starting a new one"),
            }
        }

        Self::new(
            generate_session_id(),
            SessionData::new(default_max_age),
            true,
            store,
        )
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> String {
        self.lock().id.clone()
    }

    /// Snapshot of the current data
    pub fn data(&self) -> SessionData {
        self.lock().data.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.lock().data.identity()
    }

    /// Issue a fresh session id for the same data
    ///
    /// The record under the old id is removed when the response is committed,
    /// so a cookie handed out before sign-in cannot be replayed afterwards.
    pub fn regenerate(&self) {
        let mut state = self.lock();
        if !state.destroyed {
            state.rotate();
        }
    }

    /// Record the signed-in identity
    ///
    /// A different user than the one on record rotates the session id.
    pub fn set_identity(&self, identity: &Identity) {
        let mut state = self.lock();
        if state.destroyed {
            return;
        }
        if state.data.user_id.as_deref() != Some(identity.id.as_str()) {
            state.rotate();
        }
        if state.data.user_id.as_deref() != Some(identity.id.as_str())
            || state.data.user_email != identity.email
        {
            state.data.user_id = Some(identity.id.clone());
            state.data.user_email = identity.email.clone();
            state.dirty = true;
        }
    }

    /// Change the inactivity lifetime (and the session cookie's max-age)
    pub fn set_max_age(&self, max_age: Duration) {
        let mut state = self.lock();
        if state.destroyed {
            return;
        }
        if state.data.max_age_secs != max_age.as_secs() {
            state.data.max_age_secs = max_age.as_secs();
            state.dirty = true;
        }
    }

    /// Remove the session record
    ///
    /// The handle is marked destroyed even when the store reports an error,
    /// so the response still drops the session cookie.
    pub async fn destroy(&self) -> Result<(), SessionError> {
        let id = {
            let mut state = self.lock();
            state.destroyed = true;
            state.data.user_id = None;
            state.data.user_email = None;
            state.id.clone()
        };
        self.store.destroy(&id).await
    }

    /// Persist changes and produce the cookie the response should carry
    async fn commit(&self, secret: &str, secure: bool) -> Option<Cookie<'static>> {
        let (id, data, destroyed, needs_save, retired) = {
            let mut state = self.lock();
            (
                state.id.clone(),
                state.data.clone(),
                state.destroyed,
                state.is_new || state.dirty,
                state.retired.take(),
            )
        };

        if let Some(retired) = retired {
            if let Err(error) = self.store.destroy(&retired).await {
                tracing::error!(%error, "Failed to remove the previous session record");
            }
        }

        if destroyed {
            return Some(removal_cookie(SESSION_COOKIE));
        }

        if !needs_save {
            return None;
        }

        if let Err(error) = self.store.save(&id, &data).await {
            tracing::error!(%error, "Failed to persist session");
            return None;
        }

        match sign_session_id(&id, secret) {
            Ok(value) => Some(persistent_cookie(
                SESSION_COOKIE,
                value,
                data.max_age(),
                secure,
            )),
            Err(error) => {
                tracing::error!(%error, "Failed to sign session cookie");
                None
            }
        }
    }
}

/// Middleware attaching a [`SessionHandle`] to every request
///
/// # Usage
/// ```ignore
/// let pages = Router::new()
///     .route("/dashboard", get(dashboard))
///     .layer(middleware::from_fn_with_state(state, session_layer));
/// ```
pub async fn session_layer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(request.headers());
    let secure = RequestOrigin::resolve(&state.config.server, request.headers()).is_secure();

    let handle = SessionHandle::load(
        state.sessions.clone(),
        &jar,
        &state.config.session.secret,
        state.config.session.default_max_age(),
    )
    .await;
    request.extensions_mut().insert(handle.clone());

    let mut response = next.run(request).await;

    if let Some(cookie) = handle.commit(&state.config.session.secret, secure).await {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(error) => tracing::error!(%error, "Session cookie is not a valid header value"),
        }
    }

    response
}

#[async_trait]
impl<S> FromRequestParts<S> for SessionHandle
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionHandle>()
            .cloned()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("session layer is not installed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use axum::http::{HeaderMap, header::COOKIE};

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn load(&self, _id: &str) -> Result<Option<SessionData>, SessionError> {
            Err(SessionError::Store("unreachable".to_string()))
        }

        async fn save(&self, _id: &str, _data: &SessionData) -> Result<(), SessionError> {
            Err(SessionError::Store("unreachable".to_string()))
        }

        async fn destroy(&self, _id: &str) -> Result<(), SessionError> {
            Err(SessionError::Store("unreachable".to_string()))
        }
    }

    fn jar_with_session(value: &str) -> CookieJar {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE}={value}")).expect("header"),
        );
        CookieJar::from_headers(&headers)
    }

    /// Session for a visitor without a cookie
    async fn fresh(store: Arc<dyn SessionStore>, max_age_secs: u64) -> SessionHandle {
        SessionHandle::load(
            store,
            &CookieJar::new(),
            SECRET,
            Duration::from_secs(max_age_secs),
        )
        .await
    }

    fn identity() -> Identity {
        Identity {
            id: "user-1".to_string(),
            email: Some("ada@example.com".to_string()),
        }
    }

    #[tokio::test]
    async fn new_visitor_gets_a_cookie_on_first_response() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(10));
        let handle = SessionHandle::load(
            store.clone(),
            &CookieJar::new(),
            SECRET,
            Duration::from_secs(86_400),
        )
        .await;

        let cookie = handle.commit(SECRET, false).await.expect("cookie issued");
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(
            verify_session_cookie(cookie.value(), SECRET),
            Some(handle.id())
        );
        assert!(store.load(&handle.id()).await.expect("load").is_some());
    }

    #[tokio::test]
    async fn existing_session_is_reloaded_from_signed_cookie() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(10));
        let first = fresh(store.clone(), 60).await;
        first.set_identity(&identity());
        let cookie = first.commit(SECRET, false).await.expect("cookie issued");

        let second = SessionHandle::load(
            store.clone(),
            &jar_with_session(cookie.value()),
            SECRET,
            Duration::from_secs(60),
        )
        .await;
        assert_eq!(second.id(), first.id());
        assert_eq!(second.identity(), Some(identity()));

        // Unchanged sessions do not re-issue the cookie
        assert!(second.commit(SECRET, false).await.is_none());
    }

    #[tokio::test]
    async fn signing_in_moves_the_session_to_a_new_id() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(10));
        let anonymous =
            SessionHandle::load(store.clone(), &CookieJar::new(), SECRET, Duration::from_secs(60))
                .await;
        let planted = anonymous.commit(SECRET, false).await.expect("cookie issued");
        let planted_id = anonymous.id();

        let handle = SessionHandle::load(
            store.clone(),
            &jar_with_session(planted.value()),
            SECRET,
            Duration::from_secs(60),
        )
        .await;
        assert_eq!(handle.id(), planted_id);
        handle.set_identity(&identity());

        let cookie = handle.commit(SECRET, false).await.expect("cookie issued");
        assert_ne!(cookie.value(), planted.value());
        assert_ne!(handle.id(), planted_id);
        assert_eq!(store.load(&planted_id).await.expect("load"), None);
        assert_eq!(
            store
                .load(&handle.id())
                .await
                .expect("load")
                .and_then(|data| data.identity()),
            Some(identity())
        );
    }

    #[tokio::test]
    async fn same_user_keeps_the_session_id() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(10));
        let handle = fresh(store, 60).await;
        handle.set_identity(&identity());
        let id = handle.id();

        handle.set_identity(&identity());
        assert_eq!(handle.id(), id);
    }

    #[tokio::test]
    async fn forged_cookie_starts_a_fresh_session() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(10));
        let handle = SessionHandle::load(
            store,
            &jar_with_session("someone-else.bad-signature"),
            SECRET,
            Duration::from_secs(60),
        )
        .await;
        assert_ne!(handle.id(), "someone-else");
        assert!(handle.identity().is_none());
    }

    #[tokio::test]
    async fn remember_me_extends_cookie_max_age() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(10));
        let handle = fresh(store, 86_400).await;
        handle.set_max_age(Duration::from_secs(2_592_000));

        let cookie = handle.commit(SECRET, true).await.expect("cookie issued");
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(2_592_000)));
        assert_eq!(cookie.secure(), Some(true));
    }

    #[tokio::test]
    async fn destroy_failure_still_clears_the_cookie() {
        let store: Arc<dyn SessionStore> = Arc::new(FailingStore);
        let handle = fresh(store, 60).await;
        handle.set_identity(&identity());

        assert!(handle.destroy().await.is_err());
        assert!(handle.identity().is_none());

        let cookie = handle.commit(SECRET, false).await.expect("removal cookie");
        assert_eq!(cookie.value(), "");
    }

    #[tokio::test]
    async fn writes_after_destroy_are_ignored() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(10));
        let handle = fresh(store, 60).await;
        handle.destroy().await.expect("destroy");
        handle.set_identity(&identity());
        assert!(handle.identity().is_none());
    }
}
