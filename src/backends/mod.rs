//! Backend adapters
//!
//! One adapter per wire protocol, all behind [`BackendAdapter`]:
//!
//! - [`native`]: local model server speaking the Messages API (passthrough)
//! - [`bridge`]: OAuth-bridged CLI service speaking OpenAI chat completions
//! - [`hosted`]: hosted account API, authenticated with an account credential
//!
//! Adapters never retry and never consult health state; the router owns
//! fallback and the health monitor owns liveness.

pub mod bridge;
pub mod hosted;
pub mod native;
pub mod tier;

pub use tier::Tier;

use crate::config::{BackendConfig, Config};
use crate::error::{AppError, AppResult, BackendError};
use crate::protocol::{MessagesResponse, RoutedRequest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Connect timeout for the shared HTTP client
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire protocol spoken by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Native,
    Bridge,
    Hosted,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Bridge => "bridge",
            Self::Hosted => "hosted",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anthropic SSE bytes, already framed
pub type ChunkStream = BoxStream<'static, Result<Bytes, BackendError>>;

/// What a backend returned
pub enum BackendResponse {
    /// Complete Messages JSON body
    Complete(Bytes),
    /// Streaming body; nothing has been read from it yet
    Stream(ChunkStream),
}

impl fmt::Debug for BackendResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete(body) => f.debug_tuple("Complete").field(&body.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Common contract of every backend
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn tier(&self) -> Tier;

    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    /// Send a request and return the (possibly still streaming) response
    ///
    /// A non-success status, a malformed body or a transport error is a
    /// `BackendError`. Timeouts are applied by the caller.
    async fn send(&self, request: &RoutedRequest) -> Result<BackendResponse, BackendError>;

    /// Lightweight liveness check bounded by `timeout`
    async fn probe(&self, timeout: Duration) -> Result<(), BackendError>;
}

/// Build the adapter for one configured backend
pub fn build_adapter(config: &BackendConfig, client: reqwest::Client) -> Arc<dyn BackendAdapter> {
    match config.kind() {
        BackendKind::Native => Arc::new(native::NativeAdapter::new(config, client)),
        BackendKind::Bridge => Arc::new(bridge::BridgeAdapter::new(config, client)),
        BackendKind::Hosted => Arc::new(hosted::HostedAdapter::new(config, client)),
    }
}

/// All configured adapters, ordered by tier
#[derive(Clone)]
pub struct BackendSet {
    adapters: Vec<Arc<dyn BackendAdapter>>,
}

impl BackendSet {
    /// Build one adapter per configured backend sharing a pooled HTTP client
    ///
    /// # Errors
    /// Returns `AppError::Internal` if the HTTP client cannot be constructed.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {}", e)))?;

        let adapters = config
            .backends
            .iter()
            .map(|backend| build_adapter(backend, client.clone()))
            .collect();

        Ok(Self::from_adapters(adapters))
    }

    /// Wrap pre-built adapters (sorted by tier)
    pub fn from_adapters(mut adapters: Vec<Arc<dyn BackendAdapter>>) -> Self {
        adapters.sort_by_key(|a| a.tier());
        Self { adapters }
    }

    pub fn get(&self, tier: Tier) -> Option<&Arc<dyn BackendAdapter>> {
        self.adapters.iter().find(|a| a.tier() == tier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn BackendAdapter>> {
        self.adapters.iter()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

/// Classify a transport error
pub(crate) fn transport_error(backend: &str, err: reqwest::Error, timeout: Option<Duration>) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout {
            backend: backend.to_string(),
            seconds: timeout.map(|t| t.as_secs()).unwrap_or_default(),
        }
    } else {
        BackendError::Network {
            backend: backend.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Turn a non-success response into a `Status` error, keeping the body
pub(crate) async fn status_error(backend: &str, response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    BackendError::status(backend, status, &body)
}

/// Read a Messages API response from a passthrough backend
///
/// Streams are handed over unread. Complete bodies must parse as a Messages
/// response; the original bytes are returned so unknown fields survive.
pub(crate) async fn read_messages_response(
    backend: &str,
    response: reqwest::Response,
    stream: bool,
) -> Result<BackendResponse, BackendError> {
    if !response.status().is_success() {
        return Err(status_error(backend, response).await);
    }

    if stream {
        let name = backend.to_string();
        let chunks = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| transport_error(&name, e, None)))
            .boxed();
        return Ok(BackendResponse::Stream(chunks));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| transport_error(backend, e, None))?;

    serde_json::from_slice::<MessagesResponse>(&body).map_err(|e| BackendError::Malformed {
        backend: backend.to_string(),
        reason: format!("response is not a Messages object: {}", e),
    })?;

    Ok(BackendResponse::Complete(body))
}

/// Map a probe response status to a probe result
pub(crate) async fn probe_status(backend: &str, response: reqwest::Response) -> Result<(), BackendError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(status_error(backend, response).await)
    }
}
