//! Local model server adapter
//!
//! Targets servers that speak the Messages API natively (Ollama 0.14+ at
//! `/v1/messages`). Requests and responses pass through unchanged apart from
//! the optional model rewrite; streaming bytes are piped as received.

use super::{
    BackendAdapter, BackendKind, BackendResponse, Tier, probe_status, read_messages_response,
    transport_error,
};
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::protocol::{ANTHROPIC_VERSION, RoutedRequest};
use async_trait::async_trait;
use std::time::Duration;

/// Local servers accept any bearer token; Ollama documents this placeholder
const LOCAL_BEARER: &str = "Bearer ollama";

pub struct NativeAdapter {
    tier: Tier,
    name: String,
    base_url: String,
    upstream_model: Option<String>,
    client: reqwest::Client,
}

impl NativeAdapter {
    pub fn new(config: &BackendConfig, client: reqwest::Client) -> Self {
        Self {
            tier: config.tier(),
            name: config.name().to_string(),
            base_url: config.base_url().to_string(),
            upstream_model: config.upstream_model().map(str::to_string),
            client,
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

#[async_trait]
impl BackendAdapter for NativeAdapter {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    async fn send(&self, request: &RoutedRequest) -> Result<BackendResponse, BackendError> {
        let model = self.upstream_model.as_deref().unwrap_or(request.model());
        let body = request.to_messages_body(model, request.stream());

        tracing::debug!(
            backend = %self.name,
            tier = %self.tier,
            model = %model,
            stream = request.stream(),
            "Forwarding request to local model server"
        );

        let response = self
            .client
            .post(self.messages_url())
            .header(reqwest::header::AUTHORIZATION, LOCAL_BEARER)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e, None))?;

        read_messages_response(&self.name, response, request.stream()).await
    }

    async fn probe(&self, timeout: Duration) -> Result<(), BackendError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e, Some(timeout)))?;

        probe_status(&self.name, response).await
    }
}
