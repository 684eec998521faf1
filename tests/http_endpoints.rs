//! Front door endpoints other than /v1/messages
//!
//! Uses `oneshot` against the assembled router; no backend is contacted.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tierroute::{config::Config, handlers::AppState, server::build_app};
use tower::ServiceExt;

fn create_test_app() -> Router {
    create_test_app_with("")
}

fn create_test_app_with(server_extra: &str) -> Router {
    let config = Config::from_str(&format!(
        r#"
[server]
port = 4000
{}

[[backends]]
tier = 1
name = "ollama"
kind = "native"
base_url = "http://127.0.0.1:9"
models = ["qwen3-coder-480b"]
primary = true

[[backends]]
tier = 2
name = "gemini-bridge"
kind = "bridge"
base_url = "http://127.0.0.1:9"
models = ["gemini-2.5-flash", "gemini-2.5-pro"]
"#,
        server_extra
    ))
    .expect("should parse TOML config");
    let state = AppState::new(Arc::new(config)).expect("AppState::new should succeed");
    build_app(state)
}

async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_health_reports_every_backend() {
    let (status, body) = get(create_test_app(), "/health").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    let backends = json["backends"].as_array().unwrap();
    assert_eq!(backends.len(), 2);
    assert_eq!(backends[0]["tier"], 1);
    assert_eq!(backends[0]["reachable"], true);
    assert!(backends[0]["last_checked_at"].is_null());
    assert_eq!(backends[1]["kind"], "bridge");
}

#[tokio::test]
async fn test_models_lists_declared_models() {
    let (status, body) = get(create_test_app(), "/v1/models").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    let ids: Vec<_> = json["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["qwen3-coder-480b", "gemini-2.5-flash", "gemini-2.5-pro"]);
    assert_eq!(json["data"][0]["type"], "model");
    assert_eq!(json["has_more"], false);
    assert_eq!(json["first_id"], "qwen3-coder-480b");
    assert_eq!(json["last_id"], "gemini-2.5-pro");
}

#[tokio::test]
async fn test_metrics_exposes_prometheus_text() {
    let (status, body) = get(create_test_app(), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("tierroute_backend_up{backend=\"gemini-bridge\"} 1"));
}

#[tokio::test]
async fn test_messages_rejects_get() {
    let (status, _) = get(create_test_app(), "/v1/messages").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (status, _) = get(create_test_app(), "/v1/chat/completions").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_messages_requires_json_content_type() {
    let response = create_test_app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .body(Body::from(r#"{"model":"m","messages":[]}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

fn messages_request(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn conversation_of(bytes: usize) -> String {
    serde_json::json!({
        "model": "claude-sonnet-4",
        "max_tokens": 16,
        "messages": [{"role": "user", "content": "x".repeat(bytes)}]
    })
    .to_string()
}

#[tokio::test]
async fn test_large_conversation_is_accepted_by_default() {
    // Above axum's 2 MB default; both backends are unreachable so it ends in 502
    let response = create_test_app()
        .oneshot(messages_request(conversation_of(3 * 1024 * 1024)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_body_over_limit_is_request_too_large() {
    let response = create_test_app_with("max_body_bytes = 1024")
        .oneshot(messages_request(conversation_of(4096)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["type"], "error");
    assert_eq!(json["error"]["type"], "request_too_large");
}
