//! Auth transaction routes
//!
//! Every handler answers with a redirect or a rendered page. Failures are
//! turned into an `error` query message (or a re-rendered form) here and
//! never leave the handler as a server error.

use axum::{
    Router,
    extract::{Query, State, rejection::QueryRejection},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;

use super::engine::{Identity, OneTimeProof};
use super::events::{self, AuthEvent};
use super::failure::{
    classify_email_request, classify_password_update, classify_sign_in, classify_sign_up,
};
use super::forms::{
    ForgotPasswordForm, LoginForm, RegisterForm, ResetPasswordForm, Submission,
};
use super::pkce;
use crate::AppState;
use crate::cookies::{self, ProviderTokens};
use crate::error::AuthError;
use crate::origin::RequestOrigin;
use crate::provider::{OtpType, ProviderSession, RedirectOptions};
use crate::session::SessionHandle;
use crate::web::views::{self, FragmentResubmission, Notice, ResetPasswordView};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
pub const CONFIRM_PATH: &str = "/auth/confirm";
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password";
pub const DASHBOARD_PATH: &str = "/dashboard";

const SIGN_IN_INCOMPLETE: &str = "Sign-in failed. Please try again.";
const REGISTRATION_INCOMPLETE: &str = "Registration failed. Please try again.";
const CHECK_YOUR_EMAIL: &str =
    "Registration successful! Please check your email to confirm your account.";
const RESET_EMAIL_SENT: &str =
    "If an account exists for that address, a password reset link has been sent.";
const EMAIL_CONFIRMED: &str = "Email confirmed successfully!";
const PASSWORD_UPDATED: &str = "Your password has been updated.";

/// Create authentication router
///
/// Routes:
/// - GET/POST /auth/login
/// - GET /auth/logout
/// - GET/POST /auth/register
/// - GET/POST /auth/forgot-password
/// - GET /auth/confirm - Email confirmation link target
/// - POST /auth/confirm - Tokens posted back from a link's URL fragment
/// - GET/POST /auth/reset-password - Recovery link target and new password form
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route(LOGIN_PATH, get(login_page).post(login))
        .route("/auth/logout", get(logout))
        .route(REGISTER_PATH, get(register_page).post(register))
        .route(
            FORGOT_PASSWORD_PATH,
            get(forgot_password_page).post(forgot_password),
        )
        .route(CONFIRM_PATH, get(confirm).post(confirm_fragment))
        .route(
            RESET_PASSWORD_PATH,
            get(reset_password_page).post(reset_password),
        )
}

/// `path?key=message`
fn redirect_with(path: &str, key: &str, message: &str) -> Redirect {
    Redirect::to(&format!("{path}?{key}={}", urlencoding::encode(message)))
}

/// Report a transaction outcome and turn failures into a redirect
fn finish(
    transaction: &'static str,
    failure_path: &str,
    result: Result<Response, AuthError>,
) -> Response {
    match result {
        Ok(response) => {
            events::emit(AuthEvent::Transaction {
                name: transaction,
                error: None,
            });
            response
        }
        Err(error) => {
            events::emit(AuthEvent::Transaction {
                name: transaction,
                error: Some(&error),
            });
            let mut target = format!(
                "{failure_path}?error={}",
                urlencoding::encode(&error.user_message())
            );
            if matches!(error, AuthError::AlreadyRegistered) {
                target.push_str("&showLogin=true");
            }
            Redirect::to(&target).into_response()
        }
    }
}

fn sync_session(session: &SessionHandle, identity: &Identity) {
    session.regenerate();
    session.set_identity(identity);
    events::emit(AuthEvent::SessionSynchronized {
        user_id: &identity.id,
    });
}

// =============================================================================
// Login
// =============================================================================

/// GET /auth/login
async fn login_page(notice: Result<Query<Notice>, QueryRejection>) -> Html<String> {
    let notice = Notice::from_query(notice);
    Html(views::login_page(&notice))
}

/// POST /auth/login
///
/// # Steps
/// 1. Validate email and password are present
/// 2. Sign in with the identity provider
/// 3. Store the token pair in cookies (30 days with "remember me", else 24 h)
/// 4. Mirror the identity into the session with the same lifetime
/// 5. Redirect to the dashboard
async fn login(
    State(state): State<AppState>,
    session: SessionHandle,
    origin: RequestOrigin,
    jar: CookieJar,
    Submission(form): Submission<LoginForm>,
) -> Response {
    let result = match form {
        Ok(form) => login_transaction(&state, &session, &origin, jar, &form).await,
        Err(error) => Err(error),
    };
    finish("login", LOGIN_PATH, result)
}

async fn login_transaction(
    state: &AppState,
    session: &SessionHandle,
    origin: &RequestOrigin,
    jar: CookieJar,
    form: &LoginForm,
) -> Result<Response, AuthError> {
    form.validate()?;

    let response = state
        .auth
        .sign_in(form.email(), &form.password)
        .await
        .map_err(|error| classify_sign_in(&error, state.config.auth.expose_provider_errors))?;

    let Some(provider_session) = response.session else {
        return Err(AuthError::Rejected(SIGN_IN_INCOMPLETE.to_string()));
    };

    let max_age = state.config.session.max_age_for(form.remember());
    session.set_max_age(max_age);
    sync_session(session, &Identity::from(&provider_session.user));

    let jar = cookies::set_provider_tokens(jar, &provider_session, max_age, origin.is_secure());
    Ok((jar, Redirect::to(DASHBOARD_PATH)).into_response())
}

// =============================================================================
// Logout
// =============================================================================

/// GET /auth/logout
///
/// Best effort on the provider side; locally the provider cookies and the
/// session are always dropped, so repeating the request is harmless.
async fn logout(
    State(state): State<AppState>,
    session: SessionHandle,
    jar: CookieJar,
) -> Response {
    let tokens = ProviderTokens::from_jar(&jar);
    if let Some(access_token) = tokens.access_token.as_deref() {
        if let Err(error) = state.auth.sign_out(access_token).await {
            tracing::warn!(%error, "Provider sign-out failed; clearing local state anyway");
        }
    }

    let jar = cookies::clear_provider_tokens(jar);
    events::emit(AuthEvent::ProviderCookiesCleared { reason: "logout" });

    if let Err(error) = session.destroy().await {
        tracing::error!(%error, "Failed to destroy session during logout");
    }

    events::emit(AuthEvent::Transaction {
        name: "logout",
        error: None,
    });
    (jar, Redirect::to("/")).into_response()
}

// =============================================================================
// Registration
// =============================================================================

/// GET /auth/register
async fn register_page(notice: Result<Query<Notice>, QueryRejection>) -> Html<String> {
    let notice = Notice::from_query(notice);
    Html(views::register_page(&notice))
}

/// POST /auth/register
///
/// # Steps
/// 1. Validate fields, password confirmation and length (no provider call on failure)
/// 2. Sign up with a PKCE challenge and the confirmation callback URL
/// 3. Auto-confirmed accounts are signed in right away
/// 4. Everyone else is asked to check their email
async fn register(
    State(state): State<AppState>,
    session: SessionHandle,
    origin: RequestOrigin,
    jar: CookieJar,
    Submission(form): Submission<RegisterForm>,
) -> Response {
    let result = match form {
        Ok(form) => register_transaction(&state, &session, &origin, jar, &form).await,
        Err(error) => Err(error),
    };
    finish("register", REGISTER_PATH, result)
}

async fn register_transaction(
    state: &AppState,
    session: &SessionHandle,
    origin: &RequestOrigin,
    jar: CookieJar,
    form: &RegisterForm,
) -> Result<Response, AuthError> {
    form.validate(state.config.auth.min_password_length)?;

    let verifier = pkce::generate_code_verifier();
    let options = RedirectOptions {
        redirect_url: origin.auth_urls().confirm,
        code_challenge: Some(pkce::code_challenge(&verifier)),
    };

    let response = state
        .auth
        .sign_up(form.email(), &form.password, &options)
        .await
        .map_err(|error| classify_sign_up(&error, state.config.auth.expose_provider_errors))?;

    let Some(user) = response.user().cloned() else {
        return Err(AuthError::Rejected(REGISTRATION_INCOMPLETE.to_string()));
    };

    if !user.is_confirmed() {
        let jar = cookies::set_code_verifier(jar, verifier, origin.is_secure());
        return Ok((jar, redirect_with(LOGIN_PATH, "success", CHECK_YOUR_EMAIL)).into_response());
    }

    sync_session(session, &Identity::from(&user));
    let jar = match &response.session {
        Some(provider_session) => cookies::set_provider_tokens(
            jar,
            provider_session,
            session.data().max_age(),
            origin.is_secure(),
        ),
        None => jar,
    };
    Ok((jar, Redirect::to(DASHBOARD_PATH)).into_response())
}

// =============================================================================
// Forgot Password
// =============================================================================

/// GET /auth/forgot-password
async fn forgot_password_page(notice: Result<Query<Notice>, QueryRejection>) -> Html<String> {
    let notice = Notice::from_query(notice);
    Html(views::forgot_password_page(&notice))
}

/// POST /auth/forgot-password
async fn forgot_password(
    State(state): State<AppState>,
    origin: RequestOrigin,
    jar: CookieJar,
    Submission(form): Submission<ForgotPasswordForm>,
) -> Response {
    let result = match form {
        Ok(form) => forgot_password_transaction(&state, &origin, jar, &form).await,
        Err(error) => Err(error),
    };
    finish("forgot_password", FORGOT_PASSWORD_PATH, result)
}

async fn forgot_password_transaction(
    state: &AppState,
    origin: &RequestOrigin,
    jar: CookieJar,
    form: &ForgotPasswordForm,
) -> Result<Response, AuthError> {
    form.validate()?;

    let verifier = pkce::generate_code_verifier();
    let options = RedirectOptions {
        redirect_url: origin.auth_urls().reset_password,
        code_challenge: Some(pkce::code_challenge(&verifier)),
    };

    state
        .auth
        .send_password_reset(form.email(), &options)
        .await
        .map_err(|error| {
            classify_email_request(&error, state.config.auth.expose_provider_errors)
        })?;

    let jar = cookies::set_code_verifier(jar, verifier, origin.is_secure());
    Ok((jar, redirect_with(LOGIN_PATH, "success", RESET_EMAIL_SENT)).into_response())
}

// =============================================================================
// Email Links
// =============================================================================

/// Route an email link arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkRoute {
    Confirm,
    ResetPassword,
}

impl LinkRoute {
    fn path(self) -> &'static str {
        match self {
            LinkRoute::Confirm => CONFIRM_PATH,
            LinkRoute::ResetPassword => RESET_PASSWORD_PATH,
        }
    }

    /// Token type assumed when the link does not name one
    fn purpose(self, proof: &OneTimeProof) -> OtpType {
        match (self, proof.otp_type()) {
            (LinkRoute::ResetPassword, _) | (_, Some(OtpType::Recovery)) => OtpType::Recovery,
            _ => OtpType::EmailConfirmation,
        }
    }
}

/// Proof carried by the link's query; an unreadable query carries none
fn link_proof(query: Result<Query<OneTimeProof>, QueryRejection>) -> OneTimeProof {
    query.map(|Query(proof)| proof).unwrap_or_else(|rejection| {
        tracing::debug!(reason = %rejection.body_text(), "Unreadable email link query");
        OneTimeProof::default()
    })
}

/// GET /auth/confirm
async fn confirm(
    State(state): State<AppState>,
    session: SessionHandle,
    origin: RequestOrigin,
    jar: CookieJar,
    proof: Result<Query<OneTimeProof>, QueryRejection>,
) -> Response {
    let proof = link_proof(proof);
    follow_email_link(&state, &session, &origin, jar, &proof, LinkRoute::Confirm).await
}

/// POST /auth/confirm
///
/// Fragment mode posts the tokens of either link here, along with the link
/// type the originating page assumes.
async fn confirm_fragment(
    State(state): State<AppState>,
    session: SessionHandle,
    origin: RequestOrigin,
    jar: CookieJar,
    Submission(proof): Submission<OneTimeProof>,
) -> Response {
    let proof = proof.unwrap_or_else(|error| {
        tracing::debug!(%error, "Unreadable fragment resubmission");
        OneTimeProof::default()
    });
    follow_email_link(&state, &session, &origin, jar, &proof, LinkRoute::Confirm).await
}

/// GET /auth/reset-password
async fn reset_password_page(
    State(state): State<AppState>,
    session: SessionHandle,
    origin: RequestOrigin,
    jar: CookieJar,
    proof: Result<Query<OneTimeProof>, QueryRejection>,
) -> Response {
    let proof = link_proof(proof);
    follow_email_link(
        &state,
        &session,
        &origin,
        jar,
        &proof,
        LinkRoute::ResetPassword,
    )
    .await
}

/// Redeem whatever proof the link carries
///
/// # Steps
/// 1. Try code, token hash, token pair, then the live provider session
/// 2. Nothing usable: render the reset form in fragment mode so the browser
///    can resubmit tokens the provider put in the URL fragment
/// 3. Otherwise sync the session, store the provider tokens, drop the PKCE cookie
/// 4. Recovery shows the new-password form; confirmation goes to the dashboard,
///    with the provider's error instead of a success notice when the link carried one
async fn follow_email_link(
    state: &AppState,
    session: &SessionHandle,
    origin: &RequestOrigin,
    jar: CookieJar,
    proof: &OneTimeProof,
    route: LinkRoute,
) -> Response {
    let purpose = route.purpose(proof);
    let verifier = cookies::code_verifier(&jar);
    let live = ProviderTokens::from_jar(&jar);

    let Some(redemption) = state
        .auth
        .redeem(proof, purpose, verifier.as_deref(), &live)
        .await
    else {
        tracing::debug!(route = route.path(), "No usable proof; rendering fragment mode");
        let view = ResetPasswordView {
            fragment: Some(FragmentResubmission {
                action: CONFIRM_PATH,
                default_type: purpose.as_str(),
            }),
            error: proof.provider_error().map(str::to_string),
            ..ResetPasswordView::default()
        };
        return Html(views::reset_password_page(&view)).into_response();
    };

    sync_session(session, &Identity::from(&redemption.user));

    let mut jar = cookies::clear_code_verifier(jar);
    if let Some(provider_session) = &redemption.session {
        jar = cookies::set_provider_tokens(
            jar,
            provider_session,
            session.data().max_age(),
            origin.is_secure(),
        );
    }

    events::emit(AuthEvent::Transaction {
        name: "email_link",
        error: None,
    });

    match purpose {
        OtpType::Recovery => {
            let view = ResetPasswordView {
                email: redemption.user.email.clone(),
                access_token: redemption
                    .session
                    .as_ref()
                    .map(|provider_session| provider_session.access_token.clone()),
                refresh_token: redemption
                    .session
                    .as_ref()
                    .and_then(|provider_session| provider_session.refresh_token.clone()),
                ..ResetPasswordView::default()
            };
            (jar, Html(views::reset_password_page(&view))).into_response()
        }
        // A failed link that fell back to the live session confirmed nothing
        OtpType::EmailConfirmation => match proof.provider_error() {
            Some(description) => {
                (jar, redirect_with(DASHBOARD_PATH, "error", description)).into_response()
            }
            None => {
                (jar, redirect_with(DASHBOARD_PATH, "success", EMAIL_CONFIRMED)).into_response()
            }
        },
    }
}

// =============================================================================
// Password Reset
// =============================================================================

/// POST /auth/reset-password
///
/// Failures re-render the form (keeping the email) instead of redirecting,
/// since the token pair from the link only lives in the form.
async fn reset_password(
    State(state): State<AppState>,
    session: SessionHandle,
    origin: RequestOrigin,
    jar: CookieJar,
    Submission(form): Submission<ResetPasswordForm>,
) -> Response {
    let (form, result) = match form {
        Ok(form) => {
            let result = reset_password_transaction(&state, &session, &origin, jar, &form).await;
            (form, result)
        }
        Err(error) => (ResetPasswordForm::default(), Err(error)),
    };

    match result {
        Ok(response) => {
            events::emit(AuthEvent::Transaction {
                name: "reset_password",
                error: None,
            });
            response
        }
        Err(error) => {
            events::emit(AuthEvent::Transaction {
                name: "reset_password",
                error: Some(&error),
            });

            let keep_proof = !matches!(error, AuthError::NoValidProof);
            let view = ResetPasswordView {
                email: form.email().map(str::to_string),
                access_token: form
                    .access_token()
                    .filter(|_| keep_proof)
                    .map(str::to_string),
                refresh_token: form
                    .refresh_token()
                    .filter(|_| keep_proof)
                    .map(str::to_string),
                error: Some(error.user_message()),
                ..ResetPasswordView::default()
            };
            Html(views::reset_password_page(&view)).into_response()
        }
    }
}

async fn reset_password_transaction(
    state: &AppState,
    session: &SessionHandle,
    origin: &RequestOrigin,
    jar: CookieJar,
    form: &ResetPasswordForm,
) -> Result<Response, AuthError> {
    form.validate(state.config.auth.min_password_length)?;

    let live = ProviderTokens::from_jar(&jar);
    let provider_session = prove_identity(state, form, &live)
        .await
        .ok_or(AuthError::NoValidProof)?;

    let user = state
        .auth
        .update_password(&provider_session.access_token, &form.password)
        .await
        .map_err(|error| classify_password_update(&error))?;

    sync_session(session, &Identity::from(&user));
    let jar = cookies::set_provider_tokens(
        jar,
        &provider_session,
        session.data().max_age(),
        origin.is_secure(),
    );
    Ok((jar, redirect_with(DASHBOARD_PATH, "success", PASSWORD_UPDATED)).into_response())
}

/// Token pair from the form first, then the session already in the cookies
async fn prove_identity(
    state: &AppState,
    form: &ResetPasswordForm,
    live: &ProviderTokens,
) -> Option<ProviderSession> {
    if let Some(access_token) = form.access_token() {
        match state
            .auth
            .establish_session(access_token, form.refresh_token())
            .await
        {
            Ok(provider_session) => return Some(provider_session),
            Err(error) => tracing::debug!(%error, "Token pair from the reset form was rejected"),
        }
    }

    let access_token = live.access_token.as_deref()?;
    match state
        .auth
        .establish_session(access_token, live.refresh_token.as_deref())
        .await
    {
        Ok(provider_session) => Some(provider_session),
        Err(error) => {
            tracing::debug!(%error, "Provider session from cookies was rejected");
            None
        }
    }
}
