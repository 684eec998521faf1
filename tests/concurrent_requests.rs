//! Concurrency on a real listener
//!
//! A slow generation on one connection must not hold up `/health` or other
//! generations on other connections.

use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tierroute::{config::Config, handlers::AppState, server::serve};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GENERATION_DELAY: Duration = Duration::from_secs(2);

const UPSTREAM_SSE: &str = "event: message_start\n\
data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"type\":\"message\",\"role\":\"assistant\",\"model\":\"qwen3\",\"content\":[],\"stop_reason\":null,\"usage\":{\"input_tokens\":1,\"output_tokens\":0}}}\n\n\
event: message_stop\n\
data: {\"type\":\"message_stop\"}\n\n";

struct RunningServer {
    base: String,
    stop: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<tierroute::error::AppResult<()>>,
}

impl RunningServer {
    async fn start(native: &MockServer) -> Self {
        let config = Config::from_str(&format!(
            r#"
[server]
port = 4000
shutdown_grace_seconds = 1

[[backends]]
tier = 1
name = "ollama"
kind = "native"
base_url = "{}"
primary = true
"#,
            native.uri()
        ))
        .unwrap();
        let state = AppState::new(Arc::new(config)).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let (stop, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(state, listener, async move {
            let _ = rx.await;
        }));
        Self {
            base,
            stop: Some(stop),
            task,
        }
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(10), self.task).await;
    }
}

async fn slow_native() -> MockServer {
    let native = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&native)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(UPSTREAM_SSE, "text/event-stream")
                .set_delay(GENERATION_DELAY),
        )
        .mount(&native)
        .await;
    native
}

async fn generate(client: reqwest::Client, base: String) -> String {
    let response = client
        .post(format!("{}/v1/messages", base))
        .json(&json!({
            "model": "claude-sonnet-4",
            "max_tokens": 64,
            "stream": true,
            "messages": [{"role": "user", "content": "write a long essay"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.text().await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_health_answers_while_generation_in_flight() {
    let native = slow_native().await;
    let server = RunningServer::start(&native).await;
    let client = reqwest::Client::new();

    let generation = tokio::spawn(generate(client.clone(), server.base.clone()));
    // let the generation reach the backend first
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!generation.is_finished());

    let started = Instant::now();
    let health = tokio::time::timeout(
        Duration::from_millis(1000),
        client.get(format!("{}/health", server.base)).send(),
    )
    .await
    .expect("/health should not wait for the generation")
    .unwrap();
    assert_eq!(health.status(), 200);
    assert!(started.elapsed() < GENERATION_DELAY);
    assert!(!generation.is_finished(), "generation should still be running");

    let body = generation.await.unwrap();
    assert!(body.contains("event: message_stop"));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_generations_proceed_in_parallel() {
    let native = slow_native().await;
    let server = RunningServer::start(&native).await;
    let client = reqwest::Client::new();

    let started = Instant::now();
    let generations: Vec<_> = (0..4)
        .map(|_| tokio::spawn(generate(client.clone(), server.base.clone())))
        .collect();
    for generation in futures::future::join_all(generations).await {
        assert!(generation.unwrap().contains("event: message_stop"));
    }

    // serialized handling would take 4 x GENERATION_DELAY
    assert!(
        started.elapsed() < GENERATION_DELAY * 2,
        "took {:?}",
        started.elapsed()
    );
    server.shutdown().await;
}
