//! GoTrue (Supabase Auth) REST client

use axum::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

use super::{
    AuthResponse, IdentityProvider, OtpType, ProviderError, ProviderSession, RedirectOptions, User,
};

/// HTTP client for a GoTrue-compatible auth API
#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct SessionPayload {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    user: User,
}

impl From<SessionPayload> for ProviderSession {
    fn from(payload: SessionPayload) -> Self {
        ProviderSession {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token.filter(|token| !token.is_empty()),
            expires_in: payload.expires_in,
            user: payload.user,
        }
    }
}

impl SupabaseClient {
    /// Create a client for the project at `base_url`
    ///
    /// `timeout` bounds every request at the transport level.
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("sessiongate/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Build a request authenticated with the anon key, or a user token when given
    fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> RequestBuilder {
        self.http
            .request(method, self.endpoint(path))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer.unwrap_or(self.anon_key.as_str()))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, ProviderError> {
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(api_error(status, &body));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: Value,
    ) -> Result<ProviderSession, ProviderError> {
        let request = self
            .request(Method::POST, "token", None)
            .query(&[("grant_type", grant_type)])
            .json(&body);
        let value = self.send(request).await?;
        parse_session(value)
    }
}

fn parse_session(value: Value) -> Result<ProviderSession, ProviderError> {
    serde_json::from_value::<SessionPayload>(value)
        .map(ProviderSession::from)
        .map_err(|e| ProviderError::Malformed(e.to_string()))
}

fn parse_user(value: Value) -> Result<User, ProviderError> {
    serde_json::from_value(value).map_err(|e| ProviderError::Malformed(e.to_string()))
}

/// Interpret a response that is either a session, a bare user, or `{ user }`
fn parse_auth_response(value: Value) -> Result<AuthResponse, ProviderError> {
    if value.get("access_token").is_some() {
        return Ok(AuthResponse {
            user: None,
            session: Some(parse_session(value)?),
        });
    }

    if let Some(user) = value.get("user").filter(|user| !user.is_null()) {
        return Ok(AuthResponse {
            user: Some(parse_user(user.clone())?),
            session: None,
        });
    }

    if value.get("id").is_some() {
        return Ok(AuthResponse {
            user: Some(parse_user(value)?),
            session: None,
        });
    }

    Ok(AuthResponse::default())
}

/// Map an error response into a `ProviderError::Api`
///
/// GoTrue has used several error shapes over time:
/// `{"error_code", "msg"}`, `{"code", "message"}` and
/// `{"error", "error_description"}`.
fn api_error(status: StatusCode, body: &str) -> ProviderError {
    let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);

    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.is_empty())
    };

    let code = text("error_code")
        .or_else(|| text("code"))
        .or_else(|| text("error"));
    let message = text("msg")
        .or_else(|| text("message"))
        .or_else(|| text("error_description"))
        .or_else(|| text("error"))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("provider request failed")
                    .to_string()
            } else {
                trimmed.chars().take(200).collect()
            }
        });

    ProviderError::Api {
        status: status.as_u16(),
        code,
        message,
    }
}

fn verify_type(otp_type: OtpType) -> &'static str {
    match otp_type {
        OtpType::EmailConfirmation => "email",
        OtpType::Recovery => "recovery",
    }
}

fn with_pkce(mut body: Value, options: &RedirectOptions) -> Value {
    if let (Some(challenge), Some(object)) =
        (options.code_challenge.as_deref(), body.as_object_mut())
    {
        object.insert("code_challenge".to_string(), json!(challenge));
        object.insert("code_challenge_method".to_string(), json!("s256"));
    }
    body
}

#[async_trait]
impl IdentityProvider for SupabaseClient {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ProviderError> {
        let request = self
            .request(Method::POST, "token", None)
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));
        let value = self.send(request).await?;
        parse_auth_response(value)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        options: &RedirectOptions,
    ) -> Result<AuthResponse, ProviderError> {
        let body = with_pkce(json!({ "email": email, "password": password }), options);
        let request = self
            .request(Method::POST, "signup", None)
            .query(&[("redirect_to", options.redirect_url.as_str())])
            .json(&body);
        let value = self.send(request).await?;
        parse_auth_response(value)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        let request = self.request(Method::POST, "logout", Some(access_token));
        self.send(request).await.map(|_| ())
    }

    async fn get_user(&self, access_token: &str) -> Result<User, ProviderError> {
        let request = self.request(Method::GET, "user", Some(access_token));
        let value = self.send(request).await?;
        parse_user(value)
    }

    async fn verify_one_time_token(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> Result<AuthResponse, ProviderError> {
        let request = self.request(Method::POST, "verify", None).json(&json!({
            "type": verify_type(otp_type),
            "token_hash": token_hash,
        }));
        let value = self.send(request).await?;
        parse_auth_response(value)
    }

    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderSession, ProviderError> {
        self.token_grant(
            "pkce",
            json!({ "auth_code": code, "code_verifier": code_verifier }),
        )
        .await
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<ProviderSession, ProviderError> {
        self.token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn update_user_password(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<User, ProviderError> {
        let request = self
            .request(Method::PUT, "user", Some(access_token))
            .json(&json!({ "password": new_password }));
        let value = self.send(request).await?;
        parse_user(value)
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        options: &RedirectOptions,
    ) -> Result<(), ProviderError> {
        let body = with_pkce(json!({ "email": email }), options);
        let request = self
            .request(Method::POST, "recover", None)
            .query(&[("redirect_to", options.redirect_url.as_str())])
            .json(&body);
        self.send(request).await.map(|_| ())
    }
}
