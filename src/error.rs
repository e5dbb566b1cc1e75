//! Error types for Sessiongate
//!
//! Infrastructure failures are `AppError`, which implements `IntoResponse`.
//! Failures inside an auth transaction are `AuthError`; every transaction
//! handler turns them into a redirect or a re-rendered form carrying a
//! user-facing message, so no auth failure ever reaches the client as a bare 500.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use thiserror::Error;

use crate::provider::ProviderError;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Authentication required (redirects to the login page)
    #[error("Authentication required")]
    Unauthorized,

    /// Identity provider error (502)
    #[error("Identity provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl IntoResponse for AppError {
    /// Convert error to HTTP response
    ///
    /// Unauthorized requests are sent to the login page; everything else
    /// renders a small HTML error page.
    fn into_response(self) -> Response {
        let (status, error_message, error_type) = match &self {
            AppError::Unauthorized => {
                crate::metrics::ERRORS_TOTAL
                    .with_label_values(&["unauthorized"])
                    .inc();
                return Redirect::to("/auth/login").into_response();
            }
            AppError::NotFound => {
                crate::metrics::ERRORS_TOTAL
                    .with_label_values(&["not_found"])
                    .inc();
                let page = crate::web::views::not_found_page();
                return (StatusCode::NOT_FOUND, Html(page)).into_response();
            }
            AppError::Provider(_) => (
                StatusCode::BAD_GATEWAY,
                "Identity provider unavailable".to_string(),
                "provider",
            ),
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "config"),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "internal",
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        crate::metrics::ERRORS_TOTAL
            .with_label_values(&[error_type])
            .inc();

        let page = crate::web::views::error_page(status, &error_message);
        (status, Html(page)).into_response()
    }
}

/// Which credential check failed during sign-in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialError {
    InvalidCredentials,
    EmailNotConfirmed,
}

/// Failure of an auth transaction
///
/// Every variant is recoverable from the visitor's point of view: the
/// transaction answers with a redirect or a re-rendered form.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing or malformed input
    #[error("validation failed: {0}")]
    Validation(String),

    /// Bad password or unconfirmed email
    #[error("credential check failed: {0:?}")]
    Credential(CredentialError),

    /// Sign-up for an address that already has an account
    #[error("email address already registered")]
    AlreadyRegistered,

    /// Provider could not be reached, timed out, or failed server-side
    #[error("identity provider unavailable")]
    ProviderUnavailable,

    /// Provider rejected the request for a reason we do not classify
    #[error("identity provider rejected the request: {0}")]
    Rejected(String),

    /// Reset/confirm flow found no usable token or session
    #[error("no valid proof of identity")]
    NoValidProof,

    /// Anything else; logged and answered with a generic message
    #[error("unexpected error: {0}")]
    Unexpected(#[from] anyhow::Error),
}

pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred. Please try again.";

impl AuthError {
    /// Message shown to the visitor
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Validation(msg) | AuthError::Rejected(msg) => msg.clone(),
            AuthError::Credential(CredentialError::InvalidCredentials) => {
                "Incorrect email or password. If you don't have an account yet, please register."
                    .to_string()
            }
            AuthError::Credential(CredentialError::EmailNotConfirmed) => {
                "Please confirm your email address first.".to_string()
            }
            AuthError::AlreadyRegistered => {
                "This email is already registered. Please sign in instead.".to_string()
            }
            AuthError::ProviderUnavailable => {
                "The sign-in service is currently unavailable. Please try again later.".to_string()
            }
            AuthError::NoValidProof => {
                "No valid session found. Please request a new password reset link.".to_string()
            }
            AuthError::Unexpected(_) => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }

    /// Short label used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "validation",
            AuthError::Credential(_) => "credential",
            AuthError::AlreadyRegistered => "already_registered",
            AuthError::ProviderUnavailable => "provider_unavailable",
            AuthError::Rejected(_) => "rejected",
            AuthError::NoValidProof => "no_valid_proof",
            AuthError::Unexpected(_) => "unexpected",
        }
    }
}
