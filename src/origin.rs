//! Externally visible base URL
//!
//! Callback links handed to the identity provider must point at the URL the
//! visitor actually used. Resolution order:
//! 1. `server.public_url` when configured
//! 2. `X-Forwarded-Proto` (or http) + `Host` of the request
//! 3. `server.fallback_url`

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header::HOST, request::Parts},
};
use std::convert::Infallible;

use crate::AppState;
use crate::config::ServerConfig;

const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Base URL and transport security of the current request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOrigin {
    base_url: String,
}

/// Absolute URLs of the auth pages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUrls {
    pub confirm: String,
    pub reset_password: String,
}

impl RequestOrigin {
    pub fn resolve(server: &ServerConfig, headers: &HeaderMap) -> Self {
        if let Some(public_url) = server
            .public_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            return Self::from_base(public_url);
        }

        if let Some(derived) = derive_from_headers(headers) {
            return Self::from_base(&derived);
        }

        Self::from_base(&server.fallback_url)
    }

    fn from_base(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether cookies must carry the `Secure` attribute
    pub fn is_secure(&self) -> bool {
        self.base_url
            .get(..8)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"))
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn auth_urls(&self) -> AuthUrls {
        AuthUrls {
            confirm: self.url("/auth/confirm"),
            reset_password: self.url("/auth/reset-password"),
        }
    }
}

fn derive_from_headers(headers: &HeaderMap) -> Option<String> {
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())?;

    let protocol = headers
        .get(FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| value == "http" || value == "https")
        .unwrap_or_else(|| "http".to_string());

    let candidate = format!("{protocol}://{host}");
    let parsed = url::Url::parse(&candidate).ok()?;

    // Reject hosts carrying paths, credentials or queries
    if parsed.path() != "/" || !parsed.username().is_empty() || parsed.query().is_some() {
        return None;
    }
    parsed.host_str()?;

    Some(candidate)
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestOrigin
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        Ok(RequestOrigin::resolve(&state.config.server, &parts.headers))
    }
}
