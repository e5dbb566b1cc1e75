//! E2E tests for the protected-route gate

mod common;

use common::{TestServer, location, response_cookie, sign_in};
use sessiongate::cookies::{ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE, SESSION_COOKIE};

#[tokio::test]
async fn test_dashboard_without_credentials_redirects_to_login() {
    let server = TestServer::new().await;
    let mut browser = server.browser();

    let response = browser.get("/dashboard").await;

    assert_eq!(response.status(), 303);
    assert_eq!(location(&response), "/auth/login");
}

#[tokio::test]
async fn test_invalid_provider_cookie_without_session_redirects_and_clears_cookies() {
    let server = TestServer::new().await;
    let mut browser = server.browser();
    browser.set_cookie(ACCESS_TOKEN_COOKIE, "not-a-real-token");
    browser.set_cookie(REFRESH_TOKEN_COOKIE, "not-a-real-refresh");

    let response = browser.get("/dashboard").await;

    assert_eq!(location(&response), "/auth/login");
    assert!(response_cookie(&response, ACCESS_TOKEN_COOKIE).is_some_and(|c| c.is_removal()));
    assert!(response_cookie(&response, REFRESH_TOKEN_COOKIE).is_some_and(|c| c.is_removal()));
    assert_eq!(browser.cookie(ACCESS_TOKEN_COOKIE), None);
}

#[tokio::test]
async fn test_valid_access_token_authenticates_and_synchronizes_session() {
    let server = TestServer::new().await;
    server.confirmed_user("ada@example.com").await;
    let provider_session = server
        .provider
        .issue_session_for("ada@example.com")
        .await
        .expect("provider session");

    let mut browser = server.browser();
    browser.set_cookie(ACCESS_TOKEN_COOKIE, &provider_session.access_token);

    let response = browser.get("/dashboard").await;
    assert_eq!(response.status(), 200);
    assert!(response_cookie(&response, SESSION_COOKIE).is_some());
    let body = response.text().await.expect("body");
    assert!(body.contains("ada@example.com"));

    // The session alone now vouches for the visitor
    browser.remove_cookie(ACCESS_TOKEN_COOKIE);
    let response = browser.get("/dashboard").await;
    assert_eq!(response.status(), 200);
    assert_eq!(server.provider.call_count("get_user").await, 1);
}

#[tokio::test]
async fn test_invalid_access_token_falls_back_to_session() {
    let server = TestServer::new().await;
    server.confirmed_user("ada@example.com").await;
    let mut browser = sign_in(&server, "ada@example.com", false).await;

    browser.set_cookie(ACCESS_TOKEN_COOKIE, "revoked-token");
    let response = browser.get("/dashboard").await;

    assert_eq!(response.status(), 200);
    assert!(response_cookie(&response, ACCESS_TOKEN_COOKIE).is_some_and(|c| c.is_removal()));
    assert!(response_cookie(&response, REFRESH_TOKEN_COOKIE).is_some_and(|c| c.is_removal()));
    assert_eq!(browser.cookie(ACCESS_TOKEN_COOKIE), None);
    assert_eq!(browser.cookie(REFRESH_TOKEN_COOKIE), None);
}

#[tokio::test]
async fn test_provider_outage_falls_back_to_session() {
    let server = TestServer::new().await;
    server.confirmed_user("ada@example.com").await;
    let mut browser = sign_in(&server, "ada@example.com", false).await;

    server.provider.set_unavailable(true).await;
    let response = browser.get("/dashboard").await;

    assert_eq!(response.status(), 200);
    assert!(response_cookie(&response, ACCESS_TOKEN_COOKIE).is_some_and(|c| c.is_removal()));
}

#[tokio::test]
async fn test_orphaned_refresh_cookie_is_cleared() {
    let server = TestServer::new().await;
    let mut browser = server.browser();
    browser.set_cookie(REFRESH_TOKEN_COOKIE, "lonely-refresh");

    let response = browser.get("/dashboard").await;

    assert_eq!(location(&response), "/auth/login");
    assert!(response_cookie(&response, REFRESH_TOKEN_COOKIE).is_some_and(|c| c.is_removal()));
    assert!(server.provider.calls().await.is_empty());
}

#[tokio::test]
async fn test_tampered_session_cookie_is_not_trusted() {
    let server = TestServer::new().await;
    server.confirmed_user("ada@example.com").await;
    let mut browser = sign_in(&server, "ada@example.com", false).await;

    let session_cookie = browser.cookie(SESSION_COOKIE).expect("session cookie").to_string();
    let (id, _signature) = session_cookie.split_once('.').expect("signed cookie");
    browser.set_cookie(SESSION_COOKIE, &format!("{id}.forged"));
    browser.remove_cookie(ACCESS_TOKEN_COOKIE);
    browser.remove_cookie(REFRESH_TOKEN_COOKIE);

    let response = browser.get("/dashboard").await;
    assert_eq!(location(&response), "/auth/login");
}
