//! Authentication middleware
//!
//! Protects routes that require a signed-in visitor.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;

use super::engine::{Identity, Verdict};
use super::handlers::LOGIN_PATH;
use crate::AppState;
use crate::cookies::ProviderTokens;
use crate::error::AppError;
use crate::session::SessionHandle;

/// Middleware to require authentication
///
/// Reconciles the provider cookies with the session, applies the resulting
/// cookie and session changes, and either forwards the request with the
/// [`Identity`] in its extensions or redirects to the login page.
///
/// Must run inside [`crate::session::session_layer`].
///
/// # Usage
/// ```ignore
/// let protected_routes = Router::new()
///     .route("/dashboard", get(dashboard))
///     .route_layer(middleware::from_fn_with_state(state, require_auth));
/// ```
pub async fn require_auth(
    State(state): State<AppState>,
    session: SessionHandle,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let tokens = ProviderTokens::from_jar(&jar);
    let reconciliation = state.auth.authenticate(&tokens, &session.data()).await;
    let jar = reconciliation.apply(jar, &session);

    match reconciliation.verdict {
        Verdict::Authenticated { identity, .. } => {
            request.extensions_mut().insert(identity);
            (jar, next.run(request).await).into_response()
        }
        Verdict::Unauthenticated => (jar, Redirect::to(LOGIN_PATH)).into_response(),
    }
}

/// Extractor for current authenticated user
///
/// Only available behind [`require_auth`].
///
/// # Usage
/// ```ignore
/// async fn handler(
///     CurrentUser(identity): CurrentUser,
/// ) -> impl IntoResponse {
///     format!("Hello, {}", identity.id)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(CurrentUser)
            .ok_or(AppError::Unauthorized)
    }
}

/// Optional current user extractor
///
/// Reads the identity recorded in the session without asking the provider,
/// for pages that only adapt their links to the visitor.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Identity>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>().cloned() {
            return Ok(MaybeUser(Some(identity)));
        }

        let identity = parts
            .extensions
            .get::<SessionHandle>()
            .and_then(SessionHandle::identity);
        Ok(MaybeUser(identity))
    }
}
