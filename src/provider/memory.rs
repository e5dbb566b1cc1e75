//! In-memory identity provider
//!
//! Used when no provider is configured (demo mode) and as the provider
//! behind the test suite. Emails are not sent; they are logged and kept in
//! an outbox that can be inspected. Issued tokens expire, and the outbox and
//! call log only keep their most recent entries.

use axum::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::{
    AuthResponse, IdentityProvider, OtpType, ProviderError, ProviderSession, RedirectOptions, User,
};
use crate::auth::pkce::code_challenge;

const ACCESS_TOKEN_TTL_SECONDS: u64 = 3_600;
const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 3_600);
const EMAIL_LINK_TTL: Duration = Duration::from_secs(3_600);
const MIN_PASSWORD_LENGTH: usize = 6;
const OUTBOX_CAPACITY: usize = 100;
const CALL_LOG_CAPACITY: usize = 1_000;

/// An email the provider would have sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub otp_type: OtpType,
    /// Link the visitor would click
    pub link: String,
    pub token_hash: String,
    /// PKCE authorization code, when the request carried a challenge
    pub code: Option<String>,
}

#[derive(Debug, Clone)]
struct Account {
    user: User,
    password_digest: String,
}

#[derive(Debug, Clone)]
struct PendingCode {
    user_id: String,
    challenge: String,
    otp_type: OtpType,
}

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default)]
struct Inner {
    /// Lowercased email -> account
    accounts: HashMap<String, Account>,
    /// Access token -> user id
    access_tokens: HashMap<String, Expiring<String>>,
    /// Refresh token -> user id
    refresh_tokens: HashMap<String, Expiring<String>>,
    /// Token hash -> (user id, type)
    one_time_tokens: HashMap<String, Expiring<(String, OtpType)>>,
    auth_codes: HashMap<String, Expiring<PendingCode>>,
    outbox: VecDeque<SentEmail>,
    calls: VecDeque<&'static str>,
    unavailable: bool,
}

impl Inner {
    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.access_tokens.retain(|_, grant| grant.is_live(now));
        self.refresh_tokens.retain(|_, grant| grant.is_live(now));
        self.one_time_tokens.retain(|_, grant| grant.is_live(now));
        self.auth_codes.retain(|_, grant| grant.is_live(now));
    }

    fn record_call(&mut self, operation: &'static str) {
        if self.calls.len() == CALL_LOG_CAPACITY {
            self.calls.pop_front();
        }
        self.calls.push_back(operation);
    }

    fn account_by_id(&self, user_id: &str) -> Option<&Account> {
        self.accounts.values().find(|account| account.user.id == user_id)
    }

    fn account_by_id_mut(&mut self, user_id: &str) -> Option<&mut Account> {
        self.accounts
            .values_mut()
            .find(|account| account.user.id == user_id)
    }

    fn issue_session(&mut self, user: User) -> ProviderSession {
        let access_token = issue_token("mem-at");
        let refresh_token = issue_token("mem-rt");
        self.access_tokens.insert(
            access_token.clone(),
            Expiring::new(
                user.id.clone(),
                Duration::from_secs(ACCESS_TOKEN_TTL_SECONDS),
            ),
        );
        self.refresh_tokens.insert(
            refresh_token.clone(),
            Expiring::new(user.id.clone(), REFRESH_TOKEN_TTL),
        );

        ProviderSession {
            access_token,
            refresh_token: Some(refresh_token),
            expires_in: Some(ACCESS_TOKEN_TTL_SECONDS),
            user,
        }
    }

    /// Queue a one-time link for `user_id`
    fn send_link(
        &mut self,
        to: &str,
        user_id: &str,
        otp_type: OtpType,
        options: &RedirectOptions,
    ) -> SentEmail {
        let token_hash = issue_token("mem-otp");
        self.one_time_tokens.insert(
            token_hash.clone(),
            Expiring::new((user_id.to_string(), otp_type), EMAIL_LINK_TTL),
        );

        let code = options.code_challenge.as_ref().map(|challenge| {
            let code = issue_token("mem-code");
            self.auth_codes.insert(
                code.clone(),
                Expiring::new(
                    PendingCode {
                        user_id: user_id.to_string(),
                        challenge: challenge.clone(),
                        otp_type,
                    },
                    EMAIL_LINK_TTL,
                ),
            );
            code
        });

        let separator = if options.redirect_url.contains('?') { '&' } else { '?' };
        let link = match &code {
            Some(code) => format!(
                "{}{}code={}",
                options.redirect_url,
                separator,
                urlencoding::encode(code)
            ),
            None => format!(
                "{}{}token_hash={}&type={}",
                options.redirect_url,
                separator,
                urlencoding::encode(&token_hash),
                otp_type.as_str()
            ),
        };

        let email = SentEmail {
            to: to.to_string(),
            otp_type,
            link,
            token_hash,
            code,
        };

        tracing::info!(
            to = %email.to,
            kind = otp_type.as_str(),
            link = %email.link,
            "Demo provider: email link issued"
        );

        if self.outbox.len() == OUTBOX_CAPACITY {
            self.outbox.pop_front();
        }
        self.outbox.push_back(email.clone());
        email
    }

    fn confirm(&mut self, user_id: &str) -> Option<User> {
        let account = self.account_by_id_mut(user_id)?;
        if account.user.email_confirmed_at.is_none() {
            account.user.email_confirmed_at = Some(Utc::now());
        }
        Some(account.user.clone())
    }
}

/// In-process identity provider
#[derive(Clone, Default)]
pub struct MemoryProvider {
    inner: Arc<RwLock<Inner>>,
    auto_confirm: bool,
}

impl MemoryProvider {
    /// Provider that requires email confirmation after sign-up
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider that confirms accounts at creation time
    pub fn auto_confirming() -> Self {
        Self {
            auto_confirm: true,
            ..Self::default()
        }
    }

    /// Seed an account
    pub async fn create_user(&self, email: &str, password: &str, confirmed: bool) -> User {
        let user = User {
            id: ulid::Ulid::new().to_string(),
            email: Some(email.to_string()),
            email_confirmed_at: confirmed.then(Utc::now),
        };

        let mut inner = self.inner.write().await;
        inner.accounts.insert(
            normalize_email(email),
            Account {
                user: user.clone(),
                password_digest: password_digest(password),
            },
        );
        user
    }

    /// Issue a token pair for an existing account, bypassing the password
    pub async fn issue_session_for(&self, email: &str) -> Option<ProviderSession> {
        let mut inner = self.inner.write().await;
        let user = inner.accounts.get(&normalize_email(email))?.user.clone();
        Some(inner.issue_session(user))
    }

    /// Simulate an outage: every call fails with a transport error
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.write().await.unavailable = unavailable;
    }

    /// Most recent emails issued, oldest first
    pub async fn sent_emails(&self) -> Vec<SentEmail> {
        self.inner.read().await.outbox.iter().cloned().collect()
    }

    /// Most recent capability calls received, oldest first
    pub async fn calls(&self) -> Vec<&'static str> {
        self.inner.read().await.calls.iter().copied().collect()
    }

    /// Number of calls received for one capability
    pub async fn call_count(&self, operation: &str) -> usize {
        self.inner
            .read()
            .await
            .calls
            .iter()
            .filter(|call| **call == operation)
            .count()
    }

    /// Record the call and fail if an outage is simulated
    async fn enter(
        &self,
        operation: &'static str,
    ) -> Result<tokio::sync::RwLockWriteGuard<'_, Inner>, ProviderError> {
        let mut inner = self.inner.write().await;
        inner.record_call(operation);
        inner.purge_expired();
        if inner.unavailable {
            return Err(ProviderError::Transport("connection refused".to_string()));
        }
        Ok(inner)
    }
}

#[async_trait]
impl IdentityProvider for MemoryProvider {
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ProviderError> {
        let mut inner = self.enter("sign_in_with_password").await?;

        let account = inner
            .accounts
            .get(&normalize_email(email))
            .filter(|account| account.password_digest == password_digest(password))
            .cloned()
            .ok_or_else(|| {
                api_error(400, "invalid_credentials", "Invalid login credentials")
            })?;

        if !account.user.is_confirmed() {
            return Err(api_error(400, "email_not_confirmed", "Email not confirmed"));
        }

        let session = inner.issue_session(account.user);
        Ok(AuthResponse {
            user: None,
            session: Some(session),
        })
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        options: &RedirectOptions,
    ) -> Result<AuthResponse, ProviderError> {
        let mut inner = self.enter("sign_up").await?;

        if !looks_like_email(email) {
            return Err(api_error(
                400,
                "email_address_invalid",
                "Unable to validate email address: invalid format",
            ));
        }
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(api_error(
                422,
                "weak_password",
                "Password should be at least 6 characters.",
            ));
        }

        let key = normalize_email(email);
        if inner.accounts.contains_key(&key) {
            return Err(api_error(422, "user_already_exists", "User already registered"));
        }

        let user = User {
            id: ulid::Ulid::new().to_string(),
            email: Some(email.trim().to_string()),
            email_confirmed_at: self.auto_confirm.then(Utc::now),
        };
        inner.accounts.insert(
            key,
            Account {
                user: user.clone(),
                password_digest: password_digest(password),
            },
        );

        if self.auto_confirm {
            let session = inner.issue_session(user);
            return Ok(AuthResponse {
                user: None,
                session: Some(session),
            });
        }

        inner.send_link(email, &user.id, OtpType::EmailConfirmation, options);
        Ok(AuthResponse {
            user: Some(user),
            session: None,
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), ProviderError> {
        let mut inner = self.enter("sign_out").await?;
        let user_id = inner
            .access_tokens
            .remove(access_token)
            .map(|grant| grant.value)
            .ok_or_else(|| api_error(401, "bad_jwt", "invalid JWT"))?;
        inner.refresh_tokens.retain(|_, grant| grant.value != user_id);
        Ok(())
    }

    async fn get_user(&self, access_token: &str) -> Result<User, ProviderError> {
        let inner = self.enter("get_user").await?;
        inner
            .access_tokens
            .get(access_token)
            .and_then(|grant| inner.account_by_id(&grant.value))
            .map(|account| account.user.clone())
            .ok_or_else(|| api_error(401, "bad_jwt", "invalid JWT: token is expired"))
    }

    async fn verify_one_time_token(
        &self,
        token_hash: &str,
        otp_type: OtpType,
    ) -> Result<AuthResponse, ProviderError> {
        let mut inner = self.enter("verify_one_time_token").await?;

        let user_id = match inner.one_time_tokens.remove(token_hash).map(|grant| grant.value) {
            Some((user_id, issued_for)) if issued_for == otp_type => user_id,
            _ => {
                return Err(api_error(
                    403,
                    "otp_expired",
                    "Email link is invalid or has expired",
                ));
            }
        };

        let user = inner
            .confirm(&user_id)
            .ok_or_else(|| api_error(404, "user_not_found", "User not found"))?;
        let session = inner.issue_session(user);
        Ok(AuthResponse {
            user: None,
            session: Some(session),
        })
    }

    async fn exchange_code_for_session(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<ProviderSession, ProviderError> {
        let mut inner = self.enter("exchange_code_for_session").await?;

        let pending = inner.auth_codes.remove(code).map(|grant| grant.value).ok_or_else(|| {
            api_error(404, "flow_state_not_found", "invalid flow state, no valid flow state found")
        })?;

        if code_challenge(code_verifier) != pending.challenge {
            return Err(api_error(
                400,
                "bad_code_verifier",
                "code challenge does not match previously saved code verifier",
            ));
        }

        let user = match pending.otp_type {
            OtpType::EmailConfirmation => inner.confirm(&pending.user_id),
            OtpType::Recovery => inner
                .account_by_id(&pending.user_id)
                .map(|account| account.user.clone()),
        }
        .ok_or_else(|| api_error(404, "user_not_found", "User not found"))?;

        Ok(inner.issue_session(user))
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<ProviderSession, ProviderError> {
        let mut inner = self.enter("refresh_session").await?;

        let user = inner
            .refresh_tokens
            .remove(refresh_token)
            .and_then(|grant| inner.account_by_id(&grant.value))
            .map(|account| account.user.clone())
            .ok_or_else(|| {
                api_error(
                    400,
                    "refresh_token_not_found",
                    "Invalid Refresh Token: Refresh Token Not Found",
                )
            })?;

        Ok(inner.issue_session(user))
    }

    async fn update_user_password(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<User, ProviderError> {
        let mut inner = self.enter("update_user_password").await?;

        let user_id = inner
            .access_tokens
            .get(access_token)
            .map(|grant| grant.value.clone())
            .ok_or_else(|| api_error(401, "bad_jwt", "invalid JWT: token is expired"))?;

        if new_password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(api_error(
                422,
                "weak_password",
                "Password should be at least 6 characters.",
            ));
        }

        let account = inner
            .account_by_id_mut(&user_id)
            .ok_or_else(|| api_error(404, "user_not_found", "User not found"))?;

        let digest = password_digest(new_password);
        if account.password_digest == digest {
            return Err(api_error(
                422,
                "same_password",
                "New password should be different from the old password.",
            ));
        }
        account.password_digest = digest;
        Ok(account.user.clone())
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        options: &RedirectOptions,
    ) -> Result<(), ProviderError> {
        let mut inner = self.enter("reset_password_for_email").await?;

        // Unknown addresses succeed silently so the endpoint cannot be used to probe accounts.
        let Some(user_id) = inner
            .accounts
            .get(&normalize_email(email))
            .map(|account| account.user.id.clone())
        else {
            return Ok(());
        };

        inner.send_link(email, &user_id, OtpType::Recovery, options);
        Ok(())
    }
}

fn api_error(status: u16, code: &str, message: &str) -> ProviderError {
    ProviderError::Api {
        status,
        code: Some(code.to_string()),
        message: message.to_string(),
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn looks_like_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

fn password_digest(password: &str) -> String {
    general_purpose::STANDARD_NO_PAD.encode(Sha256::digest(password.as_bytes()))
}

fn issue_token(prefix: &str) -> String {
    let mut bytes = [0_u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{}-{}", prefix, general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirm_options() -> RedirectOptions {
        RedirectOptions {
            redirect_url: "http://localhost/auth/confirm".to_string(),
            code_challenge: None,
        }
    }

    #[tokio::test]
    async fn sign_in_requires_confirmed_email() {
        let provider = MemoryProvider::new();
        provider.create_user("ada@example.com", "secret1", false).await;

        let error = provider
            .sign_in_with_password("ada@example.com", "secret1")
            .await
            .expect_err("unconfirmed account cannot sign in");
        assert_eq!(error.code(), Some("email_not_confirmed"));
    }

    #[tokio::test]
    async fn sign_in_rejects_wrong_password() {
        let provider = MemoryProvider::new();
        provider.create_user("ada@example.com", "secret1", true).await;

        let error = provider
            .sign_in_with_password("ada@example.com", "wrong-password")
            .await
            .expect_err("wrong password");
        assert_eq!(error.code(), Some("invalid_credentials"));
    }

    #[tokio::test]
    async fn confirmation_token_is_single_use() {
        let provider = MemoryProvider::new();
        provider
            .sign_up("ada@example.com", "secret1", &confirm_options())
            .await
            .expect("sign up succeeds");

        let email = provider.sent_emails().await.pop().expect("email sent");
        assert!(email.link.contains("token_hash="));

        let response = provider
            .verify_one_time_token(&email.token_hash, OtpType::EmailConfirmation)
            .await
            .expect("first use succeeds");
        assert!(response.user().expect("user").is_confirmed());

        let error = provider
            .verify_one_time_token(&email.token_hash, OtpType::EmailConfirmation)
            .await
            .expect_err("second use fails");
        assert_eq!(error.code(), Some("otp_expired"));
    }

    #[tokio::test]
    async fn pkce_code_requires_matching_verifier() {
        let provider = MemoryProvider::new();
        let verifier = crate::auth::pkce::generate_code_verifier();
        let options = RedirectOptions {
            redirect_url: "http://localhost/auth/confirm".to_string(),
            code_challenge: Some(code_challenge(&verifier)),
        };
        provider
            .sign_up("ada@example.com", "secret1", &options)
            .await
            .expect("sign up succeeds");
        let code = provider
            .sent_emails()
            .await
            .pop()
            .and_then(|email| email.code)
            .expect("code issued");

        let session = provider
            .exchange_code_for_session(&code, &verifier)
            .await
            .expect("exchange succeeds");
        assert!(session.user.is_confirmed());
    }

    #[tokio::test]
    async fn refresh_rotates_tokens() {
        let provider = MemoryProvider::new();
        provider.create_user("ada@example.com", "secret1", true).await;
        let session = provider
            .issue_session_for("ada@example.com")
            .await
            .expect("session");
        let refresh = session.refresh_token.expect("refresh token");

        let renewed = provider
            .refresh_session(&refresh)
            .await
            .expect("refresh succeeds");
        assert_ne!(renewed.access_token, session.access_token);
        assert!(provider.refresh_session(&refresh).await.is_err());
    }

    #[tokio::test]
    async fn outage_fails_every_call_but_records_it() {
        let provider = MemoryProvider::new();
        provider.set_unavailable(true).await;

        let error = provider
            .get_user("anything")
            .await
            .expect_err("outage");
        assert!(error.is_unavailable());
        assert_eq!(provider.call_count("get_user").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn access_tokens_expire() {
        let provider = MemoryProvider::new();
        provider.create_user("ada@example.com", "secret1", true).await;
        let session = provider
            .issue_session_for("ada@example.com")
            .await
            .expect("session");
        assert!(provider.get_user(&session.access_token).await.is_ok());

        tokio::time::advance(Duration::from_secs(ACCESS_TOKEN_TTL_SECONDS + 1)).await;

        let error = provider
            .get_user(&session.access_token)
            .await
            .expect_err("expired token");
        assert_eq!(error.code(), Some("bad_jwt"));
        assert!(provider.inner.read().await.access_tokens.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn email_links_expire() {
        let provider = MemoryProvider::new();
        provider
            .sign_up("ada@example.com", "secret1", &confirm_options())
            .await
            .expect("sign up succeeds");
        let email = provider.sent_emails().await.pop().expect("email sent");

        tokio::time::advance(EMAIL_LINK_TTL + Duration::from_secs(1)).await;

        let error = provider
            .verify_one_time_token(&email.token_hash, OtpType::EmailConfirmation)
            .await
            .expect_err("expired link");
        assert_eq!(error.code(), Some("otp_expired"));
    }

    #[tokio::test]
    async fn call_log_and_outbox_are_bounded() {
        let provider = MemoryProvider::new();
        provider.create_user("ada@example.com", "secret1", true).await;

        for _ in 0..CALL_LOG_CAPACITY + 5 {
            let _ = provider.get_user("unknown").await;
        }
        for _ in 0..OUTBOX_CAPACITY + 5 {
            provider
                .reset_password_for_email("ada@example.com", &confirm_options())
                .await
                .expect("reset email");
        }

        assert_eq!(provider.calls().await.len(), CALL_LOG_CAPACITY);
        assert_eq!(provider.sent_emails().await.len(), OUTBOX_CAPACITY);
    }

    #[tokio::test]
    async fn reset_for_unknown_email_sends_nothing() {
        let provider = MemoryProvider::new();
        provider
            .reset_password_for_email("nobody@example.com", &confirm_options())
            .await
            .expect("silently succeeds");
        assert!(provider.sent_emails().await.is_empty());
    }
}
