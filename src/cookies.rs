//! Cookie names and builders
//!
//! Every cookie is `HttpOnly`, `SameSite=Lax`, scoped to `/`, and `Secure`
//! when the visitor reached us over https.

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use std::time::Duration;

use crate::provider::ProviderSession;

/// Signed server-side session identifier
pub const SESSION_COOKIE: &str = "session-id";
/// Provider access token
pub const ACCESS_TOKEN_COOKIE: &str = "provider-access-token";
/// Provider refresh token
pub const REFRESH_TOKEN_COOKIE: &str = "provider-refresh-token";
/// PKCE verifier waiting for an email link to come back
pub const CODE_VERIFIER_COOKIE: &str = "provider-code-verifier";

const CODE_VERIFIER_MAX_AGE: Duration = Duration::from_secs(600);

fn cookie_max_age(max_age: Duration) -> time::Duration {
    time::Duration::seconds(i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX))
}

/// Build a cookie that lives for `max_age`
pub fn persistent_cookie(
    name: &'static str,
    value: String,
    max_age: Duration,
    secure: bool,
) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(cookie_max_age(max_age))
        .build()
}

/// Build a cookie that tells the browser to drop `name`
pub fn removal_cookie(name: &'static str) -> Cookie<'static> {
    let mut cookie = Cookie::build((name, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    cookie.make_removal();
    cookie
}

/// Provider tokens carried by a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl ProviderTokens {
    pub fn from_jar(jar: &CookieJar) -> Self {
        let read = |name: &str| {
            jar.get(name)
                .map(|cookie| cookie.value().trim().to_string())
                .filter(|value| !value.is_empty())
        };

        Self {
            access_token: read(ACCESS_TOKEN_COOKIE),
            refresh_token: read(REFRESH_TOKEN_COOKIE),
        }
    }
}

/// Store a provider session in the token cookies
///
/// A session without a refresh token only sets the access cookie and drops
/// whatever refresh cookie the browser still holds.
pub fn set_provider_tokens(
    jar: CookieJar,
    session: &ProviderSession,
    max_age: Duration,
    secure: bool,
) -> CookieJar {
    let jar = jar.add(persistent_cookie(
        ACCESS_TOKEN_COOKIE,
        session.access_token.clone(),
        max_age,
        secure,
    ));

    match &session.refresh_token {
        Some(refresh_token) => jar.add(persistent_cookie(
            REFRESH_TOKEN_COOKIE,
            refresh_token.clone(),
            max_age,
            secure,
        )),
        None => jar.add(removal_cookie(REFRESH_TOKEN_COOKIE)),
    }
}

/// Drop both provider token cookies
pub fn clear_provider_tokens(jar: CookieJar) -> CookieJar {
    jar.add(removal_cookie(ACCESS_TOKEN_COOKIE))
        .add(removal_cookie(REFRESH_TOKEN_COOKIE))
}

/// Remember a PKCE verifier until the email link is followed
pub fn set_code_verifier(jar: CookieJar, verifier: String, secure: bool) -> CookieJar {
    jar.add(persistent_cookie(
        CODE_VERIFIER_COOKIE,
        verifier,
        CODE_VERIFIER_MAX_AGE,
        secure,
    ))
}

pub fn code_verifier(jar: &CookieJar) -> Option<String> {
    jar.get(CODE_VERIFIER_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
}

pub fn clear_code_verifier(jar: CookieJar) -> CookieJar {
    jar.add(removal_cookie(CODE_VERIFIER_COOKIE))
}
