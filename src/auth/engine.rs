//! Auth reconciliation engine
//!
//! Decides who the caller is from three overlapping sources:
//! - the provider token cookies (checked live against the provider)
//! - the server-side session record
//! - one-time proofs carried by email links
//!
//! The engine never renders or redirects. The gate and the transaction
//! handlers apply its [`Effect`]s and act on its verdict.

use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::events::{self, AuthEvent};
use crate::cookies::{self, ProviderTokens};
use crate::provider::{
    AuthResponse, IdentityProvider, OtpType, ProviderError, ProviderSession, RedirectOptions, User,
};
use crate::session::{SessionData, SessionHandle};

/// Who the caller is, valid for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
        }
    }
}

/// Which source vouched for an authenticated verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    ProviderToken,
    Session,
}

impl VerdictSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictSource::ProviderToken => "provider_token",
            VerdictSource::Session => "session",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Authenticated {
        identity: Identity,
        source: VerdictSource,
    },
    Unauthenticated,
}

/// Side effect the caller must apply to the response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ClearProviderCookies,
    SyncSession(Identity),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    pub verdict: Verdict,
    pub effects: Vec<Effect>,
}

impl Reconciliation {
    /// Apply the effects to the outgoing cookies and the session
    pub fn apply(&self, mut jar: CookieJar, session: &SessionHandle) -> CookieJar {
        for effect in &self.effects {
            match effect {
                Effect::ClearProviderCookies => jar = cookies::clear_provider_tokens(jar),
                Effect::SyncSession(identity) => {
                    session.set_identity(identity);
                    events::emit(AuthEvent::SessionSynchronized {
                        user_id: &identity.id,
                    });
                }
            }
        }
        jar
    }
}

/// Query parameters an email link (or the fragment resubmission) may carry
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OneTimeProof {
    pub code: Option<String>,
    pub token_hash: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

impl OneTimeProof {
    pub fn code(&self) -> Option<&str> {
        non_empty(&self.code)
    }

    pub fn token_hash(&self) -> Option<&str> {
        non_empty(&self.token_hash)
    }

    pub fn otp_type(&self) -> Option<OtpType> {
        non_empty(&self.kind).and_then(OtpType::parse)
    }

    pub fn access_token(&self) -> Option<&str> {
        non_empty(&self.access_token)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        non_empty(&self.refresh_token)
    }

    /// Error the provider reported through the link itself
    pub fn provider_error(&self) -> Option<&str> {
        non_empty(&self.error_description).or_else(|| non_empty(&self.error))
    }
}

/// Which part of an email link produced the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofSource {
    AuthorizationCode,
    TokenHash,
    TokenPair,
    LiveSession,
}

impl ProofSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofSource::AuthorizationCode => "authorization_code",
            ProofSource::TokenHash => "token_hash",
            ProofSource::TokenPair => "token_pair",
            ProofSource::LiveSession => "live_session",
        }
    }
}

/// User recovered from an email link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub user: User,
    /// Absent when the provider verified the token without issuing tokens
    pub session: Option<ProviderSession>,
    pub source: ProofSource,
}

impl Redemption {
    fn from_session(session: ProviderSession, source: ProofSource) -> Self {
        Self {
            user: session.user.clone(),
            session: Some(session),
            source,
        }
    }
}

/// Reconciliation engine bound to one identity provider
pub struct AuthEngine {
    provider: Arc<dyn IdentityProvider>,
    timeout: Duration,
}

impl AuthEngine {
    pub fn new(provider: Arc<dyn IdentityProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Run one provider call under the configured timeout and report it
    async fn call<T, F>(&self, operation: &'static str, future: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.timeout)),
        };

        events::emit(AuthEvent::ProviderCall {
            operation,
            error: result.as_ref().err(),
            elapsed: started.elapsed(),
        });
        result
    }

    /// Gate decision for a protected request
    ///
    /// A live access token wins and re-synchronizes the session. A rejected
    /// or orphaned token clears the provider cookies and falls back to the
    /// session record. Provider failures never authenticate.
    pub async fn authenticate(
        &self,
        tokens: &ProviderTokens,
        session: &SessionData,
    ) -> Reconciliation {
        let mut effects = Vec::new();

        if let Some(access_token) = tokens.access_token.as_deref() {
            match self.call("get_user", self.provider.get_user(access_token)).await {
                Ok(user) => {
                    let identity = Identity::from(&user);
                    effects.push(Effect::SyncSession(identity.clone()));
                    events::emit(AuthEvent::Verdict {
                        user_id: Some(&identity.id),
                        source: Some(VerdictSource::ProviderToken),
                    });
                    return Reconciliation {
                        verdict: Verdict::Authenticated {
                            identity,
                            source: VerdictSource::ProviderToken,
                        },
                        effects,
                    };
                }
                Err(_) => {
                    events::emit(AuthEvent::ProviderCookiesCleared {
                        reason: "access_token_rejected",
                    });
                    effects.push(Effect::ClearProviderCookies);
                }
            }
        } else if tokens.refresh_token.is_some() {
            events::emit(AuthEvent::ProviderCookiesCleared {
                reason: "orphaned_refresh_token",
            });
            effects.push(Effect::ClearProviderCookies);
        }

        let verdict = match session.identity() {
            Some(identity) => Verdict::Authenticated {
                identity,
                source: VerdictSource::Session,
            },
            None => Verdict::Unauthenticated,
        };

        match &verdict {
            Verdict::Authenticated { identity, source } => events::emit(AuthEvent::Verdict {
                user_id: Some(&identity.id),
                source: Some(*source),
            }),
            Verdict::Unauthenticated => events::emit(AuthEvent::Verdict {
                user_id: None,
                source: None,
            }),
        }

        Reconciliation { verdict, effects }
    }

    /// Turn a token pair into a live provider session
    ///
    /// Validates the access token first; when that fails and a refresh
    /// token is available, a fresh pair is requested instead.
    pub async fn establish_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<ProviderSession, ProviderError> {
        match self.call("get_user", self.provider.get_user(access_token)).await {
            Ok(user) => Ok(ProviderSession {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.map(str::to_string),
                expires_in: None,
                user,
            }),
            Err(error) => match refresh_token {
                Some(refresh_token) => {
                    tracing::debug!(%error, "Access token rejected; trying refresh token");
                    self.call(
                        "refresh_session",
                        self.provider.refresh_session(refresh_token),
                    )
                    .await
                }
                None => Err(error),
            },
        }
    }

    /// Walk the email-link extraction chain, stopping at the first success
    ///
    /// Order: PKCE code, token hash, token pair, then the live provider
    /// session from cookies. `purpose` is the token type assumed when the
    /// link does not name one.
    pub async fn redeem(
        &self,
        proof: &OneTimeProof,
        purpose: OtpType,
        code_verifier: Option<&str>,
        live: &ProviderTokens,
    ) -> Option<Redemption> {
        if let Some(code) = proof.code() {
            match code_verifier {
                Some(verifier) => match self
                    .call(
                        "exchange_code_for_session",
                        self.provider.exchange_code_for_session(code, verifier),
                    )
                    .await
                {
                    Ok(session) => {
                        return Some(self.accepted(Redemption::from_session(
                            session,
                            ProofSource::AuthorizationCode,
                        )));
                    }
                    Err(error) => rejected(ProofSource::AuthorizationCode, &error.to_string()),
                },
                None => rejected(ProofSource::AuthorizationCode, "missing code verifier"),
            }
        }

        if let Some(token_hash) = proof.token_hash() {
            let otp_type = proof.otp_type().unwrap_or(purpose);
            match self
                .call(
                    "verify_one_time_token",
                    self.provider.verify_one_time_token(token_hash, otp_type),
                )
                .await
            {
                Ok(AuthResponse { user, session }) => {
                    let user = session.as_ref().map(|s| s.user.clone()).or(user);
                    match user {
                        Some(user) => {
                            return Some(self.accepted(Redemption {
                                user,
                                session,
                                source: ProofSource::TokenHash,
                            }));
                        }
                        None => rejected(ProofSource::TokenHash, "verified without a user"),
                    }
                }
                Err(error) => rejected(ProofSource::TokenHash, &error.to_string()),
            }
        }

        if let Some(access_token) = proof.access_token() {
            match self
                .establish_session(access_token, proof.refresh_token())
                .await
            {
                Ok(session) => {
                    return Some(
                        self.accepted(Redemption::from_session(session, ProofSource::TokenPair)),
                    );
                }
                Err(error) => rejected(ProofSource::TokenPair, &error.to_string()),
            }
        }

        if let Some(access_token) = live.access_token.as_deref() {
            match self
                .establish_session(access_token, live.refresh_token.as_deref())
                .await
            {
                Ok(session) => {
                    return Some(
                        self.accepted(Redemption::from_session(session, ProofSource::LiveSession)),
                    );
                }
                Err(error) => rejected(ProofSource::LiveSession, &error.to_string()),
            }
        }

        None
    }

    fn accepted(&self, redemption: Redemption) -> Redemption {
        events::emit(AuthEvent::ProofRedeemed {
            source: redemption.source,
            user_id: &redemption.user.id,
        });
        redemption
    }

    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ProviderError> {
        self.call(
            "sign_in_with_password",
            self.provider.sign_in_with_password(email, password),
        )
        .await
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        options: &RedirectOptions,
    ) -> Result<AuthResponse, ProviderError> {
        self.call("sign_up", self.provider.sign_up(email, password, options))
            .await
    }

    pub async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        self.call("sign_out", self.provider.sign_out(access_token))
            .await
    }

    pub async fn update_password(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<User, ProviderError> {
        self.call(
            "update_user_password",
            self.provider.update_user_password(access_token, new_password),
        )
        .await
    }

    pub async fn send_password_reset(
        &self,
        email: &str,
        options: &RedirectOptions,
    ) -> Result<(), ProviderError> {
        self.call(
            "reset_password_for_email",
            self.provider.reset_password_for_email(email, options),
        )
        .await
    }
}

fn rejected(source: ProofSource, reason: &str) {
    events::emit(AuthEvent::ProofRejected { source, reason });
}
