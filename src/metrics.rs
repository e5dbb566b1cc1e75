//! Prometheus metrics registry and instruments.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Auth Metrics
    pub static ref AUTH_VERDICTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sessiongate_auth_verdicts_total", "Total number of gate verdicts"),
        &["verdict", "source"]
    ).expect("metric can be created");
    pub static ref AUTH_TRANSACTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sessiongate_auth_transactions_total", "Total number of auth transactions"),
        &["transaction", "outcome"]
    ).expect("metric can be created");
    pub static ref PROVIDER_COOKIES_CLEARED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "sessiongate_provider_cookies_cleared_total",
            "Total number of provider cookie clears"
        ),
        &["reason"]
    ).expect("metric can be created");
    pub static ref PROOFS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "sessiongate_email_link_proofs_total",
            "Total number of one-time proofs attempted"
        ),
        &["source", "outcome"]
    ).expect("metric can be created");

    // Identity Provider Metrics
    pub static ref PROVIDER_CALLS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sessiongate_provider_calls_total", "Total number of identity provider calls"),
        &["operation", "outcome"]
    ).expect("metric can be created");
    pub static ref PROVIDER_CALL_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "sessiongate_provider_call_duration_seconds",
            "Identity provider call duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["operation"]
    ).expect("metric can be created");

    // Session Metrics
    pub static ref SESSIONS_ACTIVE: IntGauge = IntGauge::new(
        "sessiongate_sessions_active",
        "Approximate number of live server-side sessions"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("sessiongate_errors_total", "Total number of error responses"),
        &["error_type"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(AUTH_VERDICTS_TOTAL.clone()))
        .expect("AUTH_VERDICTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(AUTH_TRANSACTIONS_TOTAL.clone()))
        .expect("AUTH_TRANSACTIONS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PROVIDER_COOKIES_CLEARED_TOTAL.clone()))
        .expect("PROVIDER_COOKIES_CLEARED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PROOFS_TOTAL.clone()))
        .expect("PROOFS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PROVIDER_CALLS_TOTAL.clone()))
        .expect("PROVIDER_CALLS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PROVIDER_CALL_DURATION_SECONDS.clone()))
        .expect("PROVIDER_CALL_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(SESSIONS_ACTIVE.clone()))
        .expect("SESSIONS_ACTIVE can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
