//! OAuth-bridge adapter
//!
//! The bridge is a small local service that wraps an OAuth-authenticated CLI
//! and exposes OpenAI-style chat completions. Requests are translated from the
//! Messages shape (content blocks flattened to text, system prompt as a
//! leading system message) and responses are translated back, including a
//! chunk-by-chunk translation of the OpenAI stream into Anthropic SSE.

use super::{
    BackendAdapter, BackendKind, BackendResponse, ChunkStream, Tier, probe_status, status_error,
    transport_error,
};
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::protocol::{
    MessagesResponse, RoutedRequest, SseDecoder, SseFrame, Usage, new_message_id, sse,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenAI chat message sent to the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

/// OpenAI chat completions request
#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

impl ChatCompletionRequest {
    fn from_routed(request: &RoutedRequest, model: &str) -> Self {
        let mut messages = Vec::with_capacity(request.messages().len() + 1);

        let system = request.system_text();
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.extend(request.messages().iter().map(|m| ChatMessage {
            role: m.role().as_str(),
            content: m.flattened(),
        }));

        Self {
            model: model.to_string(),
            messages,
            stream: request.stream(),
            max_tokens: request.max_tokens(),
            temperature: request.temperature(),
            top_p: request.top_p(),
            stop: request.stop_sequences().map(<[String]>::to_vec),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<OpenAiUsage> for Usage {
    fn from(usage: OpenAiUsage) -> Self {
        Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

/// OpenAI finish reason -> Anthropic stop reason
fn stop_reason(finish_reason: Option<&str>) -> &'static str {
    match finish_reason {
        Some("length") => "max_tokens",
        Some("tool_calls") | Some("function_call") => "tool_use",
        _ => "end_turn",
    }
}

pub struct BridgeAdapter {
    tier: Tier,
    name: String,
    base_url: String,
    upstream_model: Option<String>,
    session_token: Option<String>,
    client: reqwest::Client,
}

impl BridgeAdapter {
    pub fn new(config: &BackendConfig, client: reqwest::Client) -> Self {
        let session_token = config
            .session_env()
            .and_then(|var| std::env::var(var).ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        if let Some(var) = config.session_env()
            && session_token.is_none()
        {
            tracing::debug!(
                backend = %config.name(),
                session_env = %var,
                "Bridge session variable not set; relying on the bridge's own OAuth session"
            );
        }

        Self {
            tier: config.tier(),
            name: config.name().to_string(),
            base_url: config.base_url().to_string(),
            upstream_model: config.upstream_model().map(str::to_string),
            session_token,
            client,
        }
    }

    fn translate_complete(&self, body: &[u8], model: &str) -> Result<Bytes, BackendError> {
        let completion: ChatCompletion =
            serde_json::from_slice(body).map_err(|e| BackendError::Malformed {
                backend: self.name.clone(),
                reason: format!("response is not a chat completion: {}", e),
            })?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Malformed {
                backend: self.name.clone(),
                reason: "chat completion has no choices".to_string(),
            })?;

        let text = choice.message.content.unwrap_or_default();
        let usage = completion
            .usage
            .map(Usage::from)
            .unwrap_or_else(|| Usage::estimate(0, text.chars().count()));

        let message = MessagesResponse::text(
            model,
            &text,
            stop_reason(choice.finish_reason.as_deref()),
            usage,
        );
        serde_json::to_vec(&message)
            .map(Bytes::from)
            .map_err(|e| BackendError::Malformed {
                backend: self.name.clone(),
                reason: format!("failed to encode translated response: {}", e),
            })
    }
}

/// Decode one upstream frame; `None` is the `[DONE]` sentinel
fn parse_frame(backend: &str, frame: &SseFrame) -> Result<Option<ChatCompletionChunk>, BackendError> {
    if frame.data.trim() == "[DONE]" {
        return Ok(None);
    }
    serde_json::from_str(&frame.data)
        .map(Some)
        .map_err(|e| BackendError::Malformed {
            backend: backend.to_string(),
            reason: format!("invalid stream chunk: {}", e),
        })
}

/// Running state of one translated stream
struct ChunkTranslator {
    model: String,
    started: bool,
    finish_reason: Option<String>,
    output_chars: usize,
    usage: Option<Usage>,
}

impl ChunkTranslator {
    fn new(model: String) -> Self {
        Self {
            model,
            started: false,
            finish_reason: None,
            output_chars: 0,
            usage: None,
        }
    }

    fn start_events(&mut self) -> Vec<Bytes> {
        if self.started {
            return Vec::new();
        }
        self.started = true;
        vec![
            sse::message_start(&new_message_id(), &self.model, 0),
            sse::content_block_start(0),
        ]
    }

    /// Anthropic events for one upstream chunk
    fn push(&mut self, chunk: ChatCompletionChunk) -> Vec<Bytes> {
        let mut events = self.start_events();
        if let Some(u) = chunk.usage {
            self.usage = Some(u.into());
        }
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content
                && !text.is_empty()
            {
                self.output_chars += text.chars().count();
                events.push(sse::text_delta(0, &text));
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }
        events
    }

    /// Closing events once the upstream completed
    fn finish(mut self) -> Vec<Bytes> {
        let mut events = self.start_events();
        let output_tokens = self
            .usage
            .map(|u| u.output_tokens)
            .unwrap_or_else(|| Usage::estimate(0, self.output_chars).output_tokens);
        events.push(sse::content_block_stop(0));
        events.push(sse::message_delta(
            stop_reason(self.finish_reason.as_deref()),
            output_tokens,
        ));
        events.push(sse::message_stop());
        events
    }
}

/// Translate an OpenAI chunk stream into Anthropic SSE
///
/// `message_start` is emitted only once the first upstream frame arrives, so
/// a bridge that accepts the connection but never produces output does not
/// count as a committed stream.
fn translate_stream(
    backend: String,
    model: String,
    upstream: impl futures::Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> ChunkStream {
    async_stream::stream! {
        let mut upstream = Box::pin(upstream);
        let mut decoder = SseDecoder::new();
        let mut translator = ChunkTranslator::new(model);
        let mut finished = false;
        let mut received = 0usize;

        'read: while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(BackendError::StreamInterrupted {
                        backend: backend.clone(),
                        bytes_received: received,
                        reason: e.to_string(),
                    });
                    return;
                }
            };
            received += chunk.len();

            for frame in decoder.feed(&chunk) {
                match parse_frame(&backend, &frame) {
                    Ok(None) => {
                        finished = true;
                        break 'read;
                    }
                    Ok(Some(parsed)) => {
                        for event in translator.push(parsed) {
                            yield Ok(event);
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        }

        // last frame may lack its terminating blank line
        let tail = if finished { None } else { decoder.finish() };
        if let Some(frame) = tail {
            match parse_frame(&backend, &frame) {
                Ok(None) => finished = true,
                Ok(Some(parsed)) => {
                    for event in translator.push(parsed) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        if !finished && translator.finish_reason.is_none() {
            yield Err(BackendError::StreamInterrupted {
                backend: backend.clone(),
                bytes_received: received,
                reason: "bridge closed the stream before completion".to_string(),
            });
            return;
        }

        for event in translator.finish() {
            yield Ok(event);
        }
    }
    .boxed()
}

#[async_trait]
impl BackendAdapter for BridgeAdapter {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Bridge
    }

    async fn send(&self, request: &RoutedRequest) -> Result<BackendResponse, BackendError> {
        let upstream_model = self.upstream_model.as_deref().unwrap_or(request.model());
        let body = ChatCompletionRequest::from_routed(request, upstream_model);

        tracing::debug!(
            backend = %self.name,
            tier = %self.tier,
            model = %upstream_model,
            messages = body.messages.len(),
            stream = body.stream,
            "Forwarding request to bridge"
        );

        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(&body);
        if let Some(token) = &self.session_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e, None))?;

        if !response.status().is_success() {
            return Err(status_error(&self.name, response).await);
        }

        // Clients see the model name they asked for, not the bridge's
        let model = request.model().to_string();

        if request.stream() {
            let stream = translate_stream(self.name.clone(), model, response.bytes_stream());
            return Ok(BackendResponse::Stream(stream));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(&self.name, e, None))?;
        self.translate_complete(&bytes, &model)
            .map(BackendResponse::Complete)
    }

    async fn probe(&self, timeout: Duration) -> Result<(), BackendError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e, Some(timeout)))?;

        probe_status(&self.name, response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::str::FromStr;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(base_url: &str) -> BridgeAdapter {
        let config = crate::config::Config::from_str(&format!(
            r#"
[server]
port = 4000

[[backends]]
tier = 2
name = "gemini-bridge"
kind = "bridge"
base_url = "{}"
upstream_model = "gemini-2.5-flash"
primary = true
"#,
            base_url
        ))
        .unwrap();
        BridgeAdapter::new(&config.backends[0], reqwest::Client::new())
    }

    fn request(stream: bool) -> RoutedRequest {
        serde_json::from_value(json!({
            "model": "gemini-pro-latest",
            "system": "Be brief.",
            "stream": stream,
            "max_tokens": 64,
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "hi"}]},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "name": "ls", "input": {}}
                ]},
                {"role": "user", "content": "go on"}
            ]
        }))
        .unwrap()
    }

    async fn collect(mut stream: ChunkStream) -> (String, Option<BackendError>) {
        let mut text = String::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(bytes) => text.push_str(std::str::from_utf8(&bytes).unwrap()),
                Err(e) => return (text, Some(e)),
            }
        }
        (text, None)
    }

    #[test]
    fn test_request_translation_flattens_and_prepends_system() {
        let body = ChatCompletionRequest::from_routed(&request(false), "gemini-2.5-flash");
        assert_eq!(body.model, "gemini-2.5-flash");
        assert_eq!(
            body.messages,
            vec![
                ChatMessage { role: "system", content: "Be brief.".to_string() },
                ChatMessage { role: "user", content: "hi".to_string() },
                ChatMessage { role: "assistant", content: "[tool_use: ls({})]".to_string() },
                ChatMessage { role: "user", content: "go on".to_string() },
            ]
        );
        assert_eq!(body.max_tokens, Some(64));
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(stop_reason(Some("stop")), "end_turn");
        assert_eq!(stop_reason(Some("length")), "max_tokens");
        assert_eq!(stop_reason(None), "end_turn");
    }

    #[tokio::test]
    async fn test_complete_response_translated_to_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"model": "gemini-2.5-flash", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Hello from Gemini"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 9, "completion_tokens": 4, "total_tokens": 13}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = adapter(&server.uri()).send(&request(false)).await.unwrap();
        let BackendResponse::Complete(body) = response else {
            panic!("expected complete body");
        };
        let message: MessagesResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(message.model, "gemini-pro-latest");
        assert_eq!(message.text_content(), "Hello from Gemini");
        assert_eq!(message.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(message.usage, Usage { input_tokens: 9, output_tokens: 4 });
    }

    #[tokio::test]
    async fn test_empty_choices_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = adapter(&server.uri()).send(&request(false)).await.unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[tokio::test]
    async fn test_stream_translated_to_anthropic_events() {
        let server = MockServer::start().await;
        let upstream = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(upstream),
            )
            .mount(&server)
            .await;

        let response = adapter(&server.uri()).send(&request(true)).await.unwrap();
        let BackendResponse::Stream(stream) = response else {
            panic!("expected stream");
        };
        let (text, error) = collect(stream).await;
        assert!(error.is_none(), "unexpected error: {:?}", error);

        let events: Vec<&str> = text
            .lines()
            .filter_map(|l| l.strip_prefix("event: "))
            .collect();
        assert_eq!(
            events,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert!(text.contains("\"text\":\"Hel\""));
        assert!(text.contains("\"model\":\"gemini-pro-latest\""));
    }

    #[tokio::test]
    async fn test_truncated_stream_ends_with_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n"),
            )
            .mount(&server)
            .await;

        let response = adapter(&server.uri()).send(&request(true)).await.unwrap();
        let BackendResponse::Stream(stream) = response else {
            panic!("expected stream");
        };
        let (text, error) = collect(stream).await;
        assert!(text.contains("partial"));
        assert_eq!(error.map(|e| e.kind()), Some("stream_interrupted"));
    }

    #[tokio::test]
    async fn test_done_without_trailing_blank_line_completes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
                "data: [DONE]",
            )))
            .mount(&server)
            .await;

        let response = adapter(&server.uri()).send(&request(true)).await.unwrap();
        let BackendResponse::Stream(stream) = response else {
            panic!("expected stream");
        };
        let (text, error) = collect(stream).await;
        assert!(error.is_none(), "unexpected error: {:?}", error);
        assert!(text.contains("\"text\":\"ok\""));
        assert!(text.contains("event: message_stop"));
    }

    #[tokio::test]
    async fn test_probe_hits_health_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        adapter(&server.uri()).probe(Duration::from_secs(2)).await.unwrap();
    }
}
