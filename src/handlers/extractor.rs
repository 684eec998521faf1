//! JSON extractor with Anthropic-style error responses
//!
//! Wraps Axum's `Json` extractor so that malformed or invalid request bodies
//! are rejected with the error envelope Anthropic SDKs understand, instead
//! of Axum's plain-text rejection.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Anthropic error envelope
///
/// ```json
/// {
///   "type": "error",
///   "error": { "type": "invalid_request_error", "message": "..." }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub error: ApiErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(error_type: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: "error",
            error: ApiErrorBody {
                error_type,
                message: message.into(),
            },
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new("invalid_request_error", message)
    }
}

/// Rejection produced by [`AnthropicJson`]
///
/// - JSON syntax errors and schema violations → 400 Bad Request
/// - Missing content type → 415 Unsupported Media Type
/// - Body over `server.max_body_bytes` → 413 `request_too_large`
pub struct AnthropicJsonRejection(JsonRejection);

impl IntoResponse for AnthropicJsonRejection {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self.0 {
            JsonRejection::JsonSyntaxError(_) | JsonRejection::JsonDataError(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                self.0.body_text(),
            ),
            JsonRejection::MissingJsonContentType(_) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "invalid_request_error",
                "Content-Type must be application/json".to_string(),
            ),
            rejection if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "request_too_large",
                "Request exceeds the maximum allowed body size".to_string(),
            ),
            // other BytesRejection cases or future rejection types
            _ => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                self.0.body_text(),
            ),
        };

        tracing::debug!(status = %status, message = %message, "Rejected request body");
        (status, Json(ApiError::new(error_type, message))).into_response()
    }
}

/// `Json<T>` replacement for Anthropic-compatible handlers
pub struct AnthropicJson<T>(pub T);

impl<S, T> FromRequest<S> for AnthropicJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AnthropicJsonRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AnthropicJson(value)),
            Err(rejection) => Err(AnthropicJsonRejection(rejection)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::header::CONTENT_TYPE;

    #[test]
    fn test_invalid_request_envelope() {
        let json = serde_json::to_value(ApiError::invalid_request("messages: must not be empty")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"]["type"], "invalid_request_error");
        assert_eq!(json["error"]["message"], "messages: must not be empty");
    }

    async fn extract(content_type: Option<&str>, body: &'static str) -> Response {
        let mut builder = Request::builder().method("POST").uri("/");
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        let request = builder.body(Body::from(body)).unwrap();
        match AnthropicJson::<serde_json::Value>::from_request(request, &()).await {
            Ok(_) => StatusCode::OK.into_response(),
            Err(rejection) => rejection.into_response(),
        }
    }

    #[tokio::test]
    async fn test_syntax_error_is_bad_request() {
        let response = extract(Some("application/json"), "{not json").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_content_type_is_unsupported_media_type() {
        let response = extract(None, "{}").await;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_valid_body_is_accepted() {
        let response = extract(Some("application/json"), r#"{"model":"x"}"#).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
