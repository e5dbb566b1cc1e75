//! Form bodies of the auth transactions
//!
//! Every field defaults to empty so a missing field reaches validation
//! instead of failing extraction. Bodies arrive url-encoded from the pages
//! or as JSON from scripted clients; see [`Submission`].

use axum::{
    Form, Json, async_trait,
    extract::{FromRequest, Request},
    http::header::CONTENT_TYPE,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::convert::Infallible;

use crate::error::AuthError;

pub const MISSING_FIELDS: &str = "Please fill in all fields.";
pub const PASSWORD_MISMATCH: &str = "Passwords do not match.";
pub const MISSING_EMAIL: &str = "Please enter your email address.";
pub const UNREADABLE_SUBMISSION: &str = "Your request could not be read. Please try again.";

pub fn password_too_short(min_length: usize) -> String {
    format!("Password must be at least {min_length} characters long.")
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn check_password(password: &str, min_length: usize) -> Result<(), AuthError> {
    if password.chars().count() < min_length {
        return Err(AuthError::Validation(password_too_short(min_length)));
    }
    Ok(())
}

/// Body of a transaction request, url-encoded or JSON
///
/// Never rejects: an unreadable body becomes a validation error that the
/// handler reports like any other failed submission.
#[derive(Debug)]
pub struct Submission<T>(pub Result<T, AuthError>);

#[async_trait]
impl<T, S> FromRequest<S> for Submission<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| {
                value
                    .trim_start()
                    .to_ascii_lowercase()
                    .starts_with("application/json")
            });

        let parsed = if is_json {
            Json::<T>::from_request(request, state)
                .await
                .map(|Json(body)| body)
                .map_err(|rejection| rejection.body_text())
        } else {
            Form::<T>::from_request(request, state)
                .await
                .map(|Form(body)| body)
                .map_err(|rejection| rejection.body_text())
        };

        Ok(Self(parsed.map_err(|reason| {
            tracing::debug!(%reason, json = is_json, "Unreadable submission");
            AuthError::Validation(UNREADABLE_SUBMISSION.to_string())
        })))
    }
}

/// Checkbox from a form (`"on"`) or a JSON body (`true`)
fn checkbox<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Checkbox {
        Flag(bool),
        Text(String),
    }

    Ok(Option::<Checkbox>::deserialize(deserializer)?.map(|value| match value {
        Checkbox::Flag(flag) => flag.to_string(),
        Checkbox::Text(text) => text,
    }))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    /// Checkbox value; browsers send "on" when ticked
    #[serde(default, deserialize_with = "checkbox")]
    pub remember: Option<String>,
}

impl LoginForm {
    pub fn email(&self) -> &str {
        self.email.trim()
    }

    pub fn remember(&self) -> bool {
        self.remember.as_deref().is_some_and(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "on" | "true" | "1" | "yes"
            )
        })
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if is_blank(&self.email) || self.password.is_empty() {
            return Err(AuthError::Validation(MISSING_FIELDS.to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "confirmPassword")]
    pub confirm_password: String,
}

impl RegisterForm {
    pub fn email(&self) -> &str {
        self.email.trim()
    }

    pub fn validate(&self, min_password_length: usize) -> Result<(), AuthError> {
        if is_blank(&self.email) || self.password.is_empty() || self.confirm_password.is_empty() {
            return Err(AuthError::Validation(MISSING_FIELDS.to_string()));
        }
        if self.password != self.confirm_password {
            return Err(AuthError::Validation(PASSWORD_MISMATCH.to_string()));
        }
        check_password(&self.password, min_password_length)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ForgotPasswordForm {
    #[serde(default)]
    pub email: String,
}

impl ForgotPasswordForm {
    pub fn email(&self) -> &str {
        self.email.trim()
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if is_blank(&self.email) {
            return Err(AuthError::Validation(MISSING_EMAIL.to_string()));
        }
        Ok(())
    }
}

/// New password plus the proof carried over from the email link
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetPasswordForm {
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "confirmPassword")]
    pub confirm_password: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl ResetPasswordForm {
    pub fn email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn validate(&self, min_password_length: usize) -> Result<(), AuthError> {
        if self.password.is_empty() {
            return Err(AuthError::Validation(MISSING_FIELDS.to_string()));
        }
        check_password(&self.password, min_password_length)?;
        match self.confirm_password.as_deref() {
            Some(confirm) if !confirm.is_empty() && confirm != self.password => {
                Err(AuthError::Validation(PASSWORD_MISMATCH.to_string()))
            }
            _ => Ok(()),
        }
    }
}
