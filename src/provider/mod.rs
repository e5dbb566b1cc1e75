//! Identity provider capability
//!
//! All credential storage and verification is delegated to a hosted
//! identity provider. The rest of the crate only talks to it through the
//! [`IdentityProvider`] trait, injected once at startup via `AppState`.
//!
//! Implementations:
//! - [`SupabaseClient`]: GoTrue-compatible REST API
//! - [`MemoryProvider`]: in-process demo provider, also used by tests

mod memory;
mod supabase;

pub use memory::{MemoryProvider, SentEmail};
pub use supabase::SupabaseClient;

use axum::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Provider user record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }
}

/// Provider-issued bearer tokens plus the user they belong to
///
/// `refresh_token` is optional: recovery links may carry an access token only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSession {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub user: User,
}

/// Result of sign-in, sign-up and one-time-token verification
///
/// The provider may report success while omitting either part; callers
/// decide whether that is acceptable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthResponse {
    pub user: Option<User>,
    pub session: Option<ProviderSession>,
}

impl AuthResponse {
    /// User from the response, preferring the one attached to the session
    pub fn user(&self) -> Option<&User> {
        self.session
            .as_ref()
            .map(|session| &session.user)
            .or(self.user.as_ref())
    }
}

/// Kind of one-time email token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OtpType {
    EmailConfirmation,
    Recovery,
}

impl OtpType {
    /// Parse the `type` query parameter sent with email links
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "recovery" => Some(OtpType::Recovery),
            "email_confirmation" | "signup" | "email" => Some(OtpType::EmailConfirmation),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OtpType::EmailConfirmation => "email_confirmation",
            OtpType::Recovery => "recovery",
        }
    }
}

/// Options for calls that make the provider send an email link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectOptions {
    /// Where the email link should send the visitor
    pub redirect_url: String,
    /// PKCE S256 challenge; the verifier stays with the visitor
    pub code_challenge: Option<String>,
}

/// Error returned by the identity provider
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider answered with an error response
    #[error("{message}")]
    Api {
        status: u16,
        /// Structured error code (e.g. "invalid_credentials"), when provided
        code: Option<String>,
        message: String,
    },

    /// The provider could not be reached
    #[error("identity provider unreachable: {0}")]
    Transport(String),

    /// The call did not finish within the configured timeout
    #[error("identity provider timed out after {0:?}")]
    Timeout(Duration),

    /// The provider answered with something we cannot interpret
    #[error("unexpected identity provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Whether the failure is on the provider's side rather than the caller's
    pub fn is_unavailable(&self) -> bool {
        match self {
            ProviderError::Api { status, .. } => *status >= 500,
            ProviderError::Transport(_) | ProviderError::Timeout(_) => true,
            ProviderError::Malformed(_) => false,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ProviderError::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Short label used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Api { .. } => "api",
            ProviderError::Transport(_) => "transport",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::Malformed(_) => "malformed",
        }
    }

    /// Checks the structured code first, then the message as a fallback
    pub fn matches(&self, codes: &[&str], message_fragments: &[&str]) -> bool {
        if let Some(code) = self.code() {
            if codes.iter().any(|candidate| code.eq_ignore_ascii_case(candidate)) {
                return true;
            }
        }

        let message = self.to_string().to_ascii_lowercase();
        message_fragments
            .iter()
            .any(|fragment| message.contains(&fragment.to_ascii_lowercase()))
    }
}

/// Capability set consumed from the identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify email and password and issue a token pair
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ProviderError>;

    /// Create an account; the provider emails a confirmation link unless it auto-confirms
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        options: &RedirectOptions,
    ) -> Result<AuthResponse, ProviderError>;

    /// Revoke the session behind an access token
    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError>;

    /// Resolve the user behind an access token
    async fn get_user(&self, access_token: &str) -> Result<User, ProviderError>;

    /// Consume a one-time email token
    async fn verify_one_time_token(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> Result<AuthResponse, ProviderError>;

    /// Exchange a PKCE authorization code for a session
    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderSession, ProviderError>;

    /// Issue a new token pair from a refresh token
    async fn refresh_session(&self, refresh_token: &str) -> Result<ProviderSession, ProviderError>;

    /// Set a new password for the user behind an access token
    async fn update_user_password(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<User, ProviderError>;

    /// Email a password recovery link
    async fn reset_password_for_email(
        &self,
        email: &str,
        options: &RedirectOptions,
    ) -> Result<(), ProviderError>;
}
