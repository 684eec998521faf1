//! Error types for tierroute
//!
//! `AppError` is the process/HTTP level error and implements `IntoResponse`
//! for Axum handlers. `BackendError` describes why a single backend attempt
//! failed; it is recovered locally by falling through to the next tier and
//! only reaches clients inside an aggregated `AppError::Exhausted`.

use crate::router::RoutingOutcome;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Maximum number of characters of an upstream error body kept in errors
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file '{path}': {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("All tiers exhausted: {0}")]
    Exhausted(RoutingOutcome),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request_error"),
            Self::Exhausted(_) => (StatusCode::BAD_GATEWAY, "api_error"),
            Self::Config(_)
            | Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. }
            | Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "api_error"),
        };

        let mut body = serde_json::json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": self.to_string(),
            },
        });

        if let Self::Exhausted(outcome) = &self {
            body["attempts"] = serde_json::to_value(outcome.report()).unwrap_or_default();
        }

        (status, Json(body)).into_response()
    }
}

/// Why one backend attempt failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("no usable credential for {backend}: {reason}")]
    Auth { backend: String, reason: String },

    #[error("{backend} is marked down by health checks")]
    Unavailable { backend: String },

    #[error("{backend} did not respond within {seconds}s")]
    Timeout { backend: String, seconds: u64 },

    #[error("network error talking to {backend}: {reason}")]
    Network { backend: String, reason: String },

    #[error("{backend} returned HTTP {status}: {body}")]
    Status {
        backend: String,
        status: u16,
        body: String,
    },

    #[error("malformed response from {backend}: {reason}")]
    Malformed { backend: String, reason: String },

    #[error("stream from {backend} was idle for more than {seconds}s")]
    StreamIdle { backend: String, seconds: u64 },

    #[error("stream from {backend} interrupted after {bytes_received} bytes: {reason}")]
    StreamInterrupted {
        backend: String,
        bytes_received: usize,
        reason: String,
    },
}

impl BackendError {
    /// Short machine-readable kind used in metrics labels and error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::Unavailable { .. } => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Network { .. } => "network",
            Self::Status { .. } => "status",
            Self::Malformed { .. } => "malformed",
            Self::StreamIdle { .. } => "stream_idle",
            Self::StreamInterrupted { .. } => "stream_interrupted",
        }
    }

    /// Build a `Status` error, truncating the upstream body on a char boundary
    pub fn status(backend: &str, status: u16, body: &str) -> Self {
        let body = match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
            Some((cut, _)) => format!("{}...", &body[..cut]),
            None => body.to_string(),
        };
        Self::Status {
            backend: backend.to_string(),
            status,
            body,
        }
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
