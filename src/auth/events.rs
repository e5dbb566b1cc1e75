//! Structured auth events
//!
//! Every auth decision is reported through [`emit`], which writes a
//! `tracing` record under the `sessiongate::auth` target and bumps the
//! matching Prometheus counter.

use std::time::Duration;

use crate::error::AuthError;
use crate::metrics::{
    AUTH_TRANSACTIONS_TOTAL, AUTH_VERDICTS_TOTAL, PROOFS_TOTAL, PROVIDER_CALL_DURATION_SECONDS,
    PROVIDER_CALLS_TOTAL, PROVIDER_COOKIES_CLEARED_TOTAL,
};
use crate::provider::ProviderError;

use super::engine::{ProofSource, VerdictSource};

/// Something the auth layer decided or observed
#[derive(Debug)]
pub enum AuthEvent<'a> {
    /// Gate verdict for a protected request
    Verdict {
        user_id: Option<&'a str>,
        source: Option<VerdictSource>,
    },
    /// Provider token cookies were dropped
    ProviderCookiesCleared { reason: &'static str },
    /// Session record now mirrors the provider identity
    SessionSynchronized { user_id: &'a str },
    /// One identity provider round trip
    ProviderCall {
        operation: &'static str,
        error: Option<&'a ProviderError>,
        elapsed: Duration,
    },
    /// A one-time proof from an email link was accepted
    ProofRedeemed {
        source: ProofSource,
        user_id: &'a str,
    },
    /// A one-time proof was present but could not be used
    ProofRejected {
        source: ProofSource,
        reason: &'a str,
    },
    /// Outcome of an auth transaction (login, register, ...)
    Transaction {
        name: &'static str,
        error: Option<&'a AuthError>,
    },
}

pub fn emit(event: AuthEvent<'_>) {
    match event {
        AuthEvent::Verdict { user_id, source } => {
            let (verdict, source_label) = match source {
                Some(source) => ("authenticated", source.as_str()),
                None => ("unauthenticated", "none"),
            };
            tracing::debug!(
                target: "sessiongate::auth",
                verdict,
                source = source_label,
                user_id = user_id.unwrap_or(""),
                "Gate verdict"
            );
            AUTH_VERDICTS_TOTAL
                .with_label_values(&[verdict, source_label])
                .inc();
        }
        AuthEvent::ProviderCookiesCleared { reason } => {
            tracing::info!(target: "sessiongate::auth", reason, "Provider cookies cleared");
            PROVIDER_COOKIES_CLEARED_TOTAL
                .with_label_values(&[reason])
                .inc();
        }
        AuthEvent::SessionSynchronized { user_id } => {
            tracing::debug!(target: "sessiongate::auth", user_id, "Session synchronized");
        }
        AuthEvent::ProviderCall {
            operation,
            error,
            elapsed,
        } => {
            let outcome = match error {
                None => "ok",
                Some(error) => error.kind(),
            };
            match error {
                Some(error) if error.is_unavailable() => tracing::warn!(
                    target: "sessiongate::auth",
                    operation,
                    %error,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Identity provider unavailable"
                ),
                Some(error) => tracing::debug!(
                    target: "sessiongate::auth",
                    operation,
                    code = error.code().unwrap_or(""),
                    %error,
                    "Identity provider rejected request"
                ),
                None => tracing::trace!(
                    target: "sessiongate::auth",
                    operation,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Identity provider call completed"
                ),
            }
            PROVIDER_CALLS_TOTAL
                .with_label_values(&[operation, outcome])
                .inc();
            PROVIDER_CALL_DURATION_SECONDS
                .with_label_values(&[operation])
                .observe(elapsed.as_secs_f64());
        }
        AuthEvent::ProofRedeemed { source, user_id } => {
            tracing::info!(
                target: "sessiongate::auth",
                source = source.as_str(),
                user_id,
                "Email link proof accepted"
            );
            PROOFS_TOTAL
                .with_label_values(&[source.as_str(), "accepted"])
                .inc();
        }
        AuthEvent::ProofRejected { source, reason } => {
            tracing::info!(
                target: "sessiongate::auth",
                source = source.as_str(),
                reason,
                "Email link proof rejected"
            );
            PROOFS_TOTAL
                .with_label_values(&[source.as_str(), "rejected"])
                .inc();
        }
        AuthEvent::Transaction { name, error } => {
            let outcome = error.map_or("success", AuthError::kind);
            match error {
                None => tracing::info!(
                    target: "sessiongate::auth",
                    transaction = name,
                    "Auth transaction succeeded"
                ),
                Some(error @ AuthError::Unexpected(_)) => tracing::error!(
                    target: "sessiongate::auth",
                    transaction = name,
                    %error,
                    "Auth transaction failed unexpectedly"
                ),
                Some(error) => tracing::info!(
                    target: "sessiongate::auth",
                    transaction = name,
                    outcome,
                    %error,
                    "Auth transaction rejected"
                ),
            }
            AUTH_TRANSACTIONS_TOTAL
                .with_label_values(&[name, outcome])
                .inc();
        }
    }
}
