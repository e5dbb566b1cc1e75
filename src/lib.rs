//! Sessiongate - server-rendered account pages backed by a hosted identity provider
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP Layer (Axum)                       │
//! │  - Auth transactions (login, register, reset, ...)          │
//! │  - Pages, status, health, metrics                           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Auth Reconciliation Engine                  │
//! │  - Provider token cookies vs. server session                │
//! │  - Email link proofs (PKCE code, token hash, token pair)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌──────────────────────────────┬──────────────────────────────┐
//! │      Identity Provider       │        Session Store         │
//! │  - GoTrue REST client        │  - moka cache, sliding TTL   │
//! │  - in-memory demo provider   │  - signed session cookie     │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `auth`: reconciliation engine, transactions, middleware
//! - `provider`: identity provider capability and implementations
//! - `session`: server-side sessions
//! - `web`: pages and operational endpoints
//! - `cookies`: cookie names and policy
//! - `origin`: externally visible base URL
//! - `config`: Configuration management
//! - `error`: Error types

pub mod auth;
pub mod config;
pub mod cookies;
pub mod error;
pub mod metrics;
pub mod origin;
pub mod provider;
pub mod session;
pub mod web;

use axum::{
    Router,
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use std::sync::Arc;

use provider::{IdentityProvider, MemoryProvider, SupabaseClient};
use session::{MemorySessionStore, SessionStore};

const MAX_FORM_BODY_BYTES: usize = 64 * 1024;

/// Application state shared across all handlers
///
/// Cloned for each request; every field is shared behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Identity provider every credential check is delegated to
    pub provider: Arc<dyn IdentityProvider>,

    /// Server-side session records
    pub sessions: Arc<dyn SessionStore>,

    /// Reconciliation engine bound to `provider`
    pub auth: Arc<auth::AuthEngine>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Validate configuration
    /// 2. Connect the identity provider (or fall back to the demo provider)
    /// 3. Create the session store
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the provider client
    /// cannot be built
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let provider: Arc<dyn IdentityProvider> = match config.provider.remote() {
            Some((url, anon_key)) => {
                let client = SupabaseClient::new(url, anon_key, config.provider.timeout())?;
                tracing::info!(provider_url = %url, "Identity provider client initialized");
                Arc::new(client)
            }
            None => {
                tracing::warn!(
                    "No identity provider configured; using the in-memory demo provider (email links are logged)"
                );
                Arc::new(MemoryProvider::new())
            }
        };

        Self::with_provider(config, provider)
    }

    /// Build state around an explicit provider
    pub fn with_provider(
        config: config::AppConfig,
        provider: Arc<dyn IdentityProvider>,
    ) -> Result<Self, error::AppError> {
        config.validate()?;

        let sessions: Arc<dyn SessionStore> =
            Arc::new(MemorySessionStore::new(config.session.max_sessions));
        let auth = Arc::new(auth::AuthEngine::new(
            provider.clone(),
            config.provider.timeout(),
        ));

        tracing::info!(
            max_sessions = config.session.max_sessions,
            "Application state initialized successfully"
        );

        Ok(Self {
            config: Arc::new(config),
            provider,
            sessions,
            auth,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
///
/// Pages and auth routes run inside the session layer; `/health`,
/// `/api/status` and `/metrics` do not create sessions.
pub fn build_router(state: AppState) -> Router {
    use axum::middleware;
    use tower_http::{
        catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
    };

    let protected = Router::new()
        .route(auth::DASHBOARD_PATH, get(web::dashboard))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    let pages = Router::new()
        .route("/", get(web::landing))
        .merge(protected)
        .merge(auth::auth_router())
        .fallback(web::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session::session_layer,
        ));

    Router::new()
        .route("/health", get(web::health_check))
        .route("/api/status", get(web::status))
        .route("/metrics", get(web::metrics))
        .merge(pages)
        .layer(RequestBodyLimitLayer::new(MAX_FORM_BODY_BYTES))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Panics end on the landing page with a generic message
fn handle_panic(_: Box<dyn std::any::Any + Send + 'static>) -> Response {
    tracing::error!("Request handler panicked");
    crate::metrics::ERRORS_TOTAL
        .with_label_values(&["panic"])
        .inc();
    Redirect::to(&format!(
        "/?error={}",
        urlencoding::encode(error::GENERIC_ERROR_MESSAGE)
    ))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    fn app() -> Router {
        let state = AppState::with_provider(
            config::tests::valid_config(),
            Arc::new(MemoryProvider::new()),
        )
        .expect("state");
        build_router(state)
    }

    #[tokio::test]
    async fn health_does_not_start_a_session() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }

    #[tokio::test]
    async fn pages_start_a_session() {
        let response = app()
            .oneshot(Request::get("/").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .expect("session cookie");
        assert!(cookie.starts_with("session-id="));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn unknown_paths_render_not_found() {
        let response = app()
            .oneshot(Request::get("/nope").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn panics_redirect_to_landing_page() {
        let response = handle_panic(Box::new("boom"));

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .expect("location");
        assert!(location.starts_with("/?error="));
    }

    #[tokio::test]
    async fn dashboard_redirects_anonymous_visitors() {
        let response = app()
            .oneshot(Request::get("/dashboard").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response
                .headers()
                .get(header::LOCATION)
                .and_then(|value| value.to_str().ok()),
            Some("/auth/login")
        );
    }
}
