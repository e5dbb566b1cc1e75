//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub session: SessionConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Explicit externally visible base URL (e.g., "https://app.example.com")
    ///
    /// When unset, the base URL is derived from the request's Host and
    /// X-Forwarded-Proto headers.
    pub public_url: Option<String>,
    /// Base URL used when neither the override nor the request headers are usable
    pub fallback_url: String,
}

/// Identity provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider project URL (e.g., "https://xyz.supabase.co")
    ///
    /// When unset, the in-memory demo provider is used.
    pub url: Option<String>,
    /// Public (anon) API key sent with every provider request
    pub anon_key: Option<String>,
    /// Upper bound for a single provider call in milliseconds
    pub timeout_ms: u64,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns the provider URL and key when both are configured
    pub fn remote(&self) -> Option<(&str, &str)> {
        let url = self.url.as_deref().map(str::trim).filter(|v| !v.is_empty())?;
        let key = self
            .anon_key
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())?;
        Some((url, key))
    }
}

/// Server-side session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Secret used to sign the session-id cookie (32+ bytes)
    pub secret: String,
    /// Session lifetime in seconds (default: 86400 = 24h)
    pub default_max_age_secs: u64,
    /// Session lifetime with "remember me" in seconds (default: 2592000 = 30 days)
    pub remember_max_age_secs: u64,
    /// Maximum number of sessions kept in memory
    pub max_sessions: u64,
}

impl SessionConfig {
    pub fn default_max_age(&self) -> Duration {
        Duration::from_secs(self.default_max_age_secs)
    }

    pub fn remember_max_age(&self) -> Duration {
        Duration::from_secs(self.remember_max_age_secs)
    }

    /// Lifetime for a login with or without "remember me"
    pub fn max_age_for(&self, remember: bool) -> Duration {
        if remember {
            self.remember_max_age()
        } else {
            self.default_max_age()
        }
    }
}

/// Auth transaction behavior
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Pass unclassified provider error text through to the visitor
    ///
    /// Useful while debugging; keep disabled in production.
    pub expose_provider_errors: bool,
    /// Minimum accepted password length
    pub min_password_length: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (SESSIONGATE__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.fallback_url", "http://localhost:8080")?
            .set_default("provider.timeout_ms", 10_000)?
            .set_default("session.default_max_age_secs", 86_400)?
            .set_default("session.remember_max_age_secs", 2_592_000)?
            .set_default("session.max_sessions", 100_000)?
            .set_default("auth.expose_provider_errors", false)?
            .set_default("auth.min_password_length", 6)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("SESSIONGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.session.secret.as_bytes().len() < MIN_SESSION_SECRET_BYTES {
            return Err(crate::error::AppError::Config(format!(
                "session.secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.session.default_max_age_secs == 0 || self.session.remember_max_age_secs == 0 {
            return Err(crate::error::AppError::Config(
                "session max ages must be greater than 0".to_string(),
            ));
        }

        if self.provider.timeout_ms == 0 {
            return Err(crate::error::AppError::Config(
                "provider.timeout_ms must be greater than 0".to_string(),
            ));
        }

        if let Some(public_url) = self.server.public_url.as_deref() {
            if !public_url.trim().is_empty() {
                url::Url::parse(public_url).map_err(|e| {
                    crate::error::AppError::Config(format!("server.public_url is invalid: {e}"))
                })?;
            }
        }

        url::Url::parse(&self.server.fallback_url).map_err(|e| {
            crate::error::AppError::Config(format!("server.fallback_url is invalid: {e}"))
        })?;

        if self.provider.url.is_some() && self.provider.remote().is_none() {
            return Err(crate::error::AppError::Config(
                "provider.anon_key is required when provider.url is set".to_string(),
            ));
        }

        Ok(())
    }
}
