//! Application error types for the streaming-catalog adapter.
//!
//! Provides a unified error type that implements `IntoResponse` for Axum.

#![allow(dead_code)]

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or malformed required configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The shared-secret token was missing or did not match.
    #[error("Unauthorized")]
    Unauthorized,

    /// Invalid request data.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Network reset/timeout/5xx/429 from an indexer, aggregator, or mount
    /// service, after retries were exhausted.
    #[error("Upstream transient error from {source_name}: {detail}")]
    UpstreamTransient { source_name: String, detail: String },

    /// 401/403 from an upstream; never retried.
    #[error("Upstream auth failure from {source_name}")]
    UpstreamAuth { source_name: String },

    /// Malformed XML/JSON or missing required fields in an upstream payload.
    #[error("Upstream protocol error from {source_name}: {detail}")]
    UpstreamProtocol { source_name: String, detail: String },

    /// The NZB body could not be downloaded during triage.
    #[error("NZB fetch failure: {0}")]
    NzbFetchFailure(String),

    /// STAT/BODY returned 430 for a required segment.
    #[error("NNTP article missing: {0}")]
    NntpMissingArticle(String),

    /// Connection reset/timeout/broken pipe talking to the NNTP server.
    #[error("NNTP transport error: {0}")]
    NntpTransportError(String),

    /// The triage time budget expired before all candidates were evaluated.
    #[error("Triage timed out after {0}ms")]
    TriageTimeout(u64),

    /// The mount service reported a failure classified as deterministic
    /// (will not succeed on retry within the TTL window).
    #[error("Mount failed: {0}")]
    MountFailureDeterministic(String),

    /// The mount service reported a failure classified as transient.
    #[error("Mount failed transiently: {0}")]
    MountFailureTransient(String),

    /// The streaming client disconnected mid-transfer. Logged, never surfaced.
    #[error("Stream proxy disconnect")]
    StreamProxyDisconnect,

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

/// JSON error response body. Unhandled errors use the `{error, details}`
/// shape; client-caused errors (400/401/404) use the simpler `{error,
/// message}` shape.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<ErrorDetails>,
}

#[derive(Serialize)]
struct ErrorDetails {
    #[serde(rename = "type")]
    kind: String,
    id: String,
    #[serde(rename = "indexerManager", skip_serializing_if = "Option::is_none")]
    indexer_manager: Option<String>,
    timestamp: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let now = Utc::now().to_rfc3339();
        let (status, error, message, details) = match &self {
            AppError::Config(e) => {
                tracing::error!("config error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "configuration_error",
                    None,
                    Some(ErrorDetails {
                        kind: "config".into(),
                        id: "startup".into(),
                        indexer_manager: None,
                        timestamp: now,
                    }),
                )
            }
            AppError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, "not_found", Some(resource.clone()), None)
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None, None),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()), None)
            }
            AppError::UpstreamTransient { source_name, detail } => {
                tracing::warn!(indexer = %source_name, %detail, "upstream transient error");
                (StatusCode::BAD_GATEWAY, "upstream_transient", None, None)
            }
            AppError::UpstreamAuth { source_name } => {
                tracing::warn!(indexer = %source_name, "upstream auth failure");
                (StatusCode::BAD_GATEWAY, "upstream_auth", None, None)
            }
            AppError::UpstreamProtocol { source_name, detail } => {
                tracing::warn!(indexer = %source_name, %detail, "upstream protocol error");
                (StatusCode::BAD_GATEWAY, "upstream_protocol", None, None)
            }
            AppError::NzbFetchFailure(detail) => {
                tracing::warn!(%detail, "nzb fetch failure");
                (StatusCode::BAD_GATEWAY, "nzb_fetch_failure", None, None)
            }
            AppError::NntpMissingArticle(msg_id) => {
                tracing::debug!(message_id = %msg_id, "nntp article missing");
                (StatusCode::BAD_GATEWAY, "nntp_missing_article", None, None)
            }
            AppError::NntpTransportError(detail) => {
                tracing::warn!(%detail, "nntp transport error, dropping client");
                (StatusCode::BAD_GATEWAY, "nntp_transport_error", None, None)
            }
            AppError::TriageTimeout(ms) => {
                tracing::info!(budget_ms = ms, "triage timed out");
                (StatusCode::OK, "triage_timeout", None, None)
            }
            AppError::MountFailureDeterministic(msg) => {
                tracing::warn!(%msg, "mount failed deterministically");
                (StatusCode::BAD_GATEWAY, "mount_failure", Some(msg.clone()), None)
            }
            AppError::MountFailureTransient(msg) => {
                tracing::warn!(%msg, "mount failed transiently");
                (StatusCode::BAD_GATEWAY, "mount_failure", Some(msg.clone()), None)
            }
            AppError::StreamProxyDisconnect => {
                tracing::debug!("client disconnected mid-stream");
                (StatusCode::OK, "stream_disconnect", None, None)
            }
            AppError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    None,
                    Some(ErrorDetails {
                        kind: "internal".into(),
                        id: "unknown".into(),
                        indexer_manager: None,
                        timestamp: now,
                    }),
                )
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_status() {
        let error = AppError::NotFound("test".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_unauthorized_status() {
        let error = AppError::Unauthorized;
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_bad_request_status() {
        let error = AppError::BadRequest("invalid".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_upstream_transient_status() {
        let error = AppError::UpstreamTransient {
            source_name: "aggregator".into(),
            detail: "timeout".into(),
        };
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
