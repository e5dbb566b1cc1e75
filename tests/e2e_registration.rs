//! E2E tests for registration and email confirmation

mod common;

use common::{TestServer, location, query_param, response_cookie, sign_in};
use sessiongate::cookies::{ACCESS_TOKEN_COOKIE, CODE_VERIFIER_COOKIE};
use sessiongate::provider::MemoryProvider;

const EMAIL: &str = "grace@example.com";

fn registration<'a>(password: &'a str, confirm: &'a str) -> Vec<(&'a str, &'a str)> {
    vec![
        ("email", EMAIL),
        ("password", password),
        ("confirm_password", confirm),
    ]
}

#[tokio::test]
async fn test_register_page_renders() {
    let server = TestServer::new().await;
    let mut browser = server.browser();

    let response = browser.get("/auth/register").await;

    assert_eq!(response.status(), 200);
    let body = response.text().await.expect("body");
    assert!(body.contains(r#"name="confirm_password""#));
}

#[tokio::test]
async fn test_short_password_is_rejected_without_provider_call() {
    let server = TestServer::new().await;
    let mut browser = server.browser();

    let response = browser
        .post_form("/auth/register", &registration("abc", "abc"))
        .await;

    let target = location(&response);
    assert!(target.starts_with("/auth/register?"));
    assert_eq!(
        query_param(&target, "error").as_deref(),
        Some("Password must be at least 6 characters long.")
    );
    assert_eq!(server.provider.call_count("sign_up").await, 0);
}

#[tokio::test]
async fn test_password_mismatch_is_rejected() {
    let server = TestServer::new().await;
    let mut browser = server.browser();

    let response = browser
        .post_form("/auth/register", &registration("secret-one", "secret-two"))
        .await;

    assert_eq!(
        query_param(&location(&response), "error").as_deref(),
        Some("Passwords do not match.")
    );
    assert_eq!(server.provider.call_count("sign_up").await, 0);
}

#[tokio::test]
async fn test_registration_asks_to_confirm_email() {
    let server = TestServer::new().await;
    let mut browser = server.browser();

    let response = browser
        .post_form("/auth/register", &registration("secret-one", "secret-one"))
        .await;

    let target = location(&response);
    assert!(target.starts_with("/auth/login?success="));
    assert!(
        query_param(&target, "success")
            .expect("success message")
            .contains("check your email")
    );
    assert!(response_cookie(&response, CODE_VERIFIER_COOKIE).is_some());
    assert!(response_cookie(&response, ACCESS_TOKEN_COOKIE).is_none());

    let email = server.provider.sent_emails().await.pop().expect("email sent");
    assert_eq!(email.to, EMAIL);
    assert!(email.link.starts_with(&server.url("/auth/confirm?code=")));

    // Not signed in until the email is confirmed
    let response = browser.get("/dashboard").await;
    assert_eq!(location(&response), "/auth/login");
}

#[tokio::test]
async fn test_confirmation_link_signs_the_visitor_in() {
    let server = TestServer::new().await;
    let mut browser = server.browser();
    browser
        .post_form("/auth/register", &registration("secret-one", "secret-one"))
        .await;
    let email = server.provider.sent_emails().await.pop().expect("email sent");

    let response = browser.get(&email.link).await;

    let target = location(&response);
    assert!(target.starts_with("/dashboard?success="));
    assert!(response_cookie(&response, ACCESS_TOKEN_COOKIE).is_some());
    assert!(response_cookie(&response, CODE_VERIFIER_COOKIE).is_some_and(|c| c.is_removal()));

    let response = browser.get(&target).await;
    assert_eq!(response.status(), 200);
    let body = response.text().await.expect("body");
    assert!(body.contains(EMAIL));
    assert!(body.contains("Email confirmed successfully!"));
}

#[tokio::test]
async fn test_failed_link_with_live_session_reports_the_link_error() {
    let server = TestServer::new().await;
    server.confirmed_user(EMAIL).await;
    let mut browser = sign_in(&server, EMAIL, false).await;

    let response = browser
        .get("/auth/confirm?error=access_denied&error_description=Email+link+is+invalid+or+has+expired")
        .await;

    let target = location(&response);
    assert!(target.starts_with("/dashboard?error="));
    assert_eq!(
        query_param(&target, "error").as_deref(),
        Some("Email link is invalid or has expired")
    );

    let body = browser.get(&target).await.text().await.expect("body");
    assert!(!body.contains("Email confirmed successfully!"));
}

#[tokio::test]
async fn test_token_hash_link_works_in_another_browser() {
    let server = TestServer::new().await;
    server
        .browser()
        .post_form("/auth/register", &registration("secret-one", "secret-one"))
        .await;
    let email = server.provider.sent_emails().await.pop().expect("email sent");

    let mut other_browser = server.browser();
    let response = other_browser
        .get(&format!(
            "/auth/confirm?token_hash={}&type=signup",
            email.token_hash
        ))
        .await;

    assert!(location(&response).starts_with("/dashboard?success="));
    assert_eq!(
        server.provider.call_count("verify_one_time_token").await,
        1
    );
}

#[tokio::test]
async fn test_code_without_verifier_falls_back_to_fragment_mode() {
    let server = TestServer::new().await;
    server
        .browser()
        .post_form("/auth/register", &registration("secret-one", "secret-one"))
        .await;
    let email = server.provider.sent_emails().await.pop().expect("email sent");

    let mut other_browser = server.browser();
    let response = other_browser.get(&email.link).await;

    assert_eq!(response.status(), 200);
    let body = response.text().await.expect("body");
    assert!(body.contains(r#"form.action = "/auth/confirm";"#));
    assert_eq!(
        server.provider.call_count("exchange_code_for_session").await,
        0
    );
}

#[tokio::test]
async fn test_unreadable_link_query_falls_back_to_fragment_mode() {
    let server = TestServer::new().await;
    let mut browser = server.browser();

    let response = browser.get("/auth/confirm?code=one&code=two").await;

    assert_eq!(response.status(), 200);
    let body = response.text().await.expect("body");
    assert!(body.contains(r#"form.action = "/auth/confirm";"#));
    assert!(server.provider.calls().await.is_empty());
}

#[tokio::test]
async fn test_existing_account_suggests_login() {
    let server = TestServer::new().await;
    server.confirmed_user(EMAIL).await;
    let mut browser = server.browser();

    let response = browser
        .post_form("/auth/register", &registration("secret-one", "secret-one"))
        .await;

    let target = location(&response);
    assert!(target.starts_with("/auth/register?"));
    assert_eq!(query_param(&target, "showLogin").as_deref(), Some("true"));

    let response = browser.get(&target).await;
    let body = response.text().await.expect("body");
    assert!(body.contains("Sign in with your existing account"));
}

#[tokio::test]
async fn test_invalid_email_is_reported() {
    let server = TestServer::new().await;
    let mut browser = server.browser();

    let response = browser
        .post_form(
            "/auth/register",
            &[
                ("email", "not-an-email"),
                ("password", "secret-one"),
                ("confirm_password", "secret-one"),
            ],
        )
        .await;

    assert_eq!(
        query_param(&location(&response), "error").as_deref(),
        Some("Please enter a valid email address.")
    );
}

#[tokio::test]
async fn test_auto_confirmed_registration_goes_straight_to_dashboard() {
    let server = TestServer::with_provider(MemoryProvider::auto_confirming()).await;
    let mut browser = server.browser();

    let response = browser
        .post_form("/auth/register", &registration("secret-one", "secret-one"))
        .await;

    assert_eq!(location(&response), "/dashboard");
    assert!(response_cookie(&response, ACCESS_TOKEN_COOKIE).is_some());

    let response = browser.get("/dashboard").await;
    assert_eq!(response.status(), 200);
}
