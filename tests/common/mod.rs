//! Common test utilities for E2E tests

#![allow(dead_code)]

use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use sessiongate::provider::MemoryProvider;
use sessiongate::{AppState, config};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpListener;

pub const PASSWORD: &str = "correct-horse";

/// Test configuration backed by the in-memory provider
pub fn test_config() -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
            public_url: None,
            fallback_url: "http://localhost:8080".to_string(),
        },
        provider: config::ProviderConfig {
            url: None,
            anon_key: None,
            timeout_ms: 2_000,
        },
        session: config::SessionConfig {
            secret: "test-secret-key-32-bytes-long!!!".to_string(),
            default_max_age_secs: 86_400,
            remember_max_age_secs: 2_592_000,
            max_sessions: 1_000,
        },
        auth: config::AuthConfig {
            expose_provider_errors: false,
            min_password_length: 6,
        },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub provider: MemoryProvider,
}

impl TestServer {
    /// Server whose provider requires email confirmation
    pub async fn new() -> Self {
        Self::with_provider(MemoryProvider::new()).await
    }

    pub async fn with_provider(provider: MemoryProvider) -> Self {
        let state = AppState::with_provider(test_config(), Arc::new(provider.clone()))
            .expect("test state");
        Self::start(state, provider).await
    }

    /// Serve an already assembled state (e.g. with a custom session store)
    pub async fn start(state: AppState, provider: MemoryProvider) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let app = sessiongate::build_router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server runs");
        });

        Self {
            addr: format!("http://{}", addr),
            state,
            provider,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// A fresh visitor with an empty cookie jar
    pub fn browser(&self) -> Browser {
        Browser {
            base: self.addr.clone(),
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("failed to build no-redirect client"),
            cookies: BTreeMap::new(),
        }
    }

    /// Seed a confirmed account
    pub async fn confirmed_user(&self, email: &str) {
        self.provider.create_user(email, PASSWORD, true).await;
    }
}

/// Minimal cookie-keeping client that never follows redirects
pub struct Browser {
    base: String,
    client: reqwest::Client,
    cookies: BTreeMap<String, String>,
}

impl Browser {
    pub async fn get(&mut self, path: &str) -> reqwest::Response {
        let request = self.client.get(self.absolute(path));
        self.send(request).await
    }

    pub async fn post_form(&mut self, path: &str, fields: &[(&str, &str)]) -> reqwest::Response {
        let request = self.client.post(self.absolute(path)).form(fields);
        self.send(request).await
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.cookies.insert(name.to_string(), value.to_string());
    }

    pub fn remove_cookie(&mut self, name: &str) {
        self.cookies.remove(name);
    }

    fn absolute(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base, path)
        }
    }

    async fn send(&mut self, request: reqwest::RequestBuilder) -> reqwest::Response {
        let request = if self.cookies.is_empty() {
            request
        } else {
            let header = self
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            request.header(COOKIE, header)
        };

        let response = request.send().await.expect("request succeeds");
        for set_cookie in set_cookies(&response) {
            let parsed = ParsedCookie::parse(&set_cookie);
            if parsed.is_removal() {
                self.cookies.remove(&parsed.name);
            } else {
                self.cookies.insert(parsed.name, parsed.value);
            }
        }
        response
    }
}

/// One `Set-Cookie` header
#[derive(Debug, Clone)]
pub struct ParsedCookie {
    pub name: String,
    pub value: String,
    pub attributes: Vec<String>,
}

impl ParsedCookie {
    pub fn parse(header: &str) -> Self {
        let mut parts = header.split(';').map(str::trim);
        let (name, value) = parts
            .next()
            .and_then(|pair| pair.split_once('='))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .unwrap_or_default();
        Self {
            name,
            value,
            attributes: parts.map(str::to_string).collect(),
        }
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.iter().find_map(|attribute| {
            let (name, value) = attribute.split_once('=').unwrap_or((attribute.as_str(), ""));
            name.eq_ignore_ascii_case(key).then_some(value)
        })
    }

    pub fn has_flag(&self, key: &str) -> bool {
        self.attributes
            .iter()
            .any(|attribute| attribute.eq_ignore_ascii_case(key))
    }

    pub fn max_age(&self) -> Option<i64> {
        self.attribute("Max-Age").and_then(|value| value.parse().ok())
    }

    pub fn is_removal(&self) -> bool {
        self.value.is_empty() || self.max_age() == Some(0)
    }
}

pub fn set_cookies(response: &reqwest::Response) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

/// The `Set-Cookie` header for `name`, if the response carried one
pub fn response_cookie(response: &reqwest::Response, name: &str) -> Option<ParsedCookie> {
    set_cookies(response)
        .iter()
        .map(|header| ParsedCookie::parse(header))
        .find(|cookie| cookie.name == name)
}

pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .expect("location header")
        .to_string()
}

/// Decoded value of a query parameter in a redirect target
pub fn query_param(target: &str, key: &str) -> Option<String> {
    let url = url::Url::parse(&format!("http://placeholder{}", target)).ok()?;
    url.query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}

/// Sign in through the login form
pub async fn sign_in(server: &TestServer, email: &str, remember: bool) -> Browser {
    let mut browser = server.browser();
    let mut fields = vec![("email", email), ("password", PASSWORD)];
    if remember {
        fields.push(("remember", "on"));
    }
    let response = browser.post_form("/auth/login", &fields).await;
    assert_eq!(location(&response), "/dashboard");
    browser
}
