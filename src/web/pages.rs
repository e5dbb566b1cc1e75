//! Public and protected pages

use axum::{
    Json,
    extract::{Query, rejection::QueryRejection},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{Html, IntoResponse, Response},
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;

use super::views::{self, Notice};
use crate::auth::{CurrentUser, MaybeUser};
use crate::error::AppError;

/// GET /
pub async fn landing(
    MaybeUser(identity): MaybeUser,
    notice: Result<Query<Notice>, QueryRejection>,
) -> Html<String> {
    Html(views::landing_page(identity.as_ref(), &Notice::from_query(notice)))
}

/// GET /dashboard
///
/// Mounted behind `require_auth`.
pub async fn dashboard(
    CurrentUser(identity): CurrentUser,
    notice: Result<Query<Notice>, QueryRejection>,
) -> Html<String> {
    tracing::debug!(user_id = %identity.id, "Dashboard rendered");
    Html(views::dashboard_page(&identity, &Notice::from_query(notice)))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub timestamp: String,
}

/// GET /api/status
pub async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "success",
        message: "Server is running",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /health
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /metrics
///
/// Prometheus text exposition of [`crate::metrics::REGISTRY`].
pub async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&crate::metrics::REGISTRY.gather()) {
        Ok(body) => ([(CONTENT_TYPE, encoder.format_type().to_string())], body).into_response(),
        Err(error) => {
            tracing::error!(%error, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Fallback for unknown paths
pub async fn not_found() -> AppError {
    AppError::NotFound
}
