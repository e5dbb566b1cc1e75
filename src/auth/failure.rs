//! Provider error classification
//!
//! Structured error codes are checked first; message substrings only cover
//! providers that do not send codes.

use crate::error::{AuthError, CredentialError};
use crate::provider::ProviderError;

const INVALID_CREDENTIALS_CODES: &[&str] = &["invalid_credentials"];
/// Legacy OAuth code sent for every failed password grant, whatever the cause
const LEGACY_GRANT_CODE: &str = "invalid_grant";
const INVALID_CREDENTIALS_TEXT: &[&str] = &["invalid login credentials", "invalid credentials"];

const EMAIL_NOT_CONFIRMED_CODES: &[&str] = &["email_not_confirmed"];
const EMAIL_NOT_CONFIRMED_TEXT: &[&str] = &["email not confirmed"];

const ALREADY_REGISTERED_CODES: &[&str] = &["user_already_exists", "email_exists"];
const ALREADY_REGISTERED_TEXT: &[&str] = &["already registered", "already exists"];

const INVALID_EMAIL_CODES: &[&str] = &["email_address_invalid", "validation_failed"];
const INVALID_EMAIL_TEXT: &[&str] = &["invalid email", "unable to validate email"];

const WEAK_PASSWORD_CODES: &[&str] = &["weak_password"];

/// Sign-in failure as shown on the login page
///
/// A legacy `invalid_grant` code says nothing about the cause, so the
/// message decides before it is read as bad credentials.
pub fn classify_sign_in(error: &ProviderError, expose_provider_errors: bool) -> AuthError {
    if error.matches(EMAIL_NOT_CONFIRMED_CODES, EMAIL_NOT_CONFIRMED_TEXT) {
        return AuthError::Credential(CredentialError::EmailNotConfirmed);
    }
    if error.matches(INVALID_CREDENTIALS_CODES, INVALID_CREDENTIALS_TEXT)
        || error.code() == Some(LEGACY_GRANT_CODE)
    {
        return AuthError::Credential(CredentialError::InvalidCredentials);
    }
    if error.is_unavailable() {
        return AuthError::ProviderUnavailable;
    }
    unclassified("Sign-in failed", error, expose_provider_errors)
}

/// Sign-up failure as shown on the registration page
pub fn classify_sign_up(error: &ProviderError, expose_provider_errors: bool) -> AuthError {
    if error.matches(ALREADY_REGISTERED_CODES, ALREADY_REGISTERED_TEXT) {
        return AuthError::AlreadyRegistered;
    }
    if error.matches(INVALID_EMAIL_CODES, INVALID_EMAIL_TEXT) {
        return AuthError::Validation("Please enter a valid email address.".to_string());
    }
    if error.matches(WEAK_PASSWORD_CODES, &[]) {
        return AuthError::Validation(error.to_string());
    }
    if error.is_unavailable() {
        return AuthError::ProviderUnavailable;
    }
    unclassified("Registration failed", error, expose_provider_errors)
}

/// Failure of a request that makes the provider send an email
pub fn classify_email_request(error: &ProviderError, expose_provider_errors: bool) -> AuthError {
    if error.matches(INVALID_EMAIL_CODES, INVALID_EMAIL_TEXT) {
        return AuthError::Validation("Please enter a valid email address.".to_string());
    }
    if error.is_unavailable() {
        return AuthError::ProviderUnavailable;
    }
    unclassified("Could not send the email", error, expose_provider_errors)
}

/// Failure of a password update, shown on the reset form
pub fn classify_password_update(error: &ProviderError) -> AuthError {
    if error.is_unavailable() {
        return AuthError::ProviderUnavailable;
    }
    match error {
        ProviderError::Malformed(_) => unexpected(error),
        // Provider messages for rejected passwords are written for end users
        ProviderError::Api { message, .. } if !message.trim().is_empty() => {
            AuthError::Rejected(message.clone())
        }
        _ => AuthError::Rejected("Password update failed. Please request a new link.".to_string()),
    }
}

fn unclassified(prefix: &str, error: &ProviderError, expose_provider_errors: bool) -> AuthError {
    if matches!(error, ProviderError::Malformed(_)) {
        return unexpected(error);
    }
    if expose_provider_errors {
        AuthError::Rejected(format!("{prefix}: {error}"))
    } else {
        AuthError::Rejected(format!("{prefix}. Please try again."))
    }
}

/// Provider answers we cannot interpret
fn unexpected(error: &ProviderError) -> AuthError {
    AuthError::Unexpected(anyhow::Error::new(error.clone()))
}
