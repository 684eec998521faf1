//! Hosted account API adapter
//!
//! Messages API passthrough authenticated with an account credential read
//! from the environment variable named by `credential_env`. The variable is
//! resolved once at construction. When it is absent or empty the adapter
//! never falls back to an unauthenticated call: every send and probe fails
//! with `BackendError::Auth`, so the router skips this tier.

use super::{
    BackendAdapter, BackendKind, BackendResponse, Tier, read_messages_response, status_error,
    transport_error,
};
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::protocol::{ANTHROPIC_VERSION, RoutedRequest};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

pub struct HostedAdapter {
    tier: Tier,
    name: String,
    base_url: String,
    upstream_model: Option<String>,
    credential_env: String,
    credential: Option<String>,
    client: reqwest::Client,
}

impl HostedAdapter {
    pub fn new(config: &BackendConfig, client: reqwest::Client) -> Self {
        let credential_env = config.credential_env().unwrap_or_default().to_string();
        let credential = std::env::var(&credential_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        if credential.is_none() {
            tracing::warn!(
                backend = %config.name(),
                tier = %config.tier(),
                credential_env = %credential_env,
                "No credential found for hosted backend; it will be skipped until restarted with the variable set"
            );
        }

        Self {
            tier: config.tier(),
            name: config.name().to_string(),
            base_url: config.base_url().to_string(),
            upstream_model: config.upstream_model().map(str::to_string),
            credential_env,
            credential,
            client,
        }
    }

    fn credential(&self) -> Result<&str, BackendError> {
        self.credential.as_deref().ok_or_else(|| BackendError::Auth {
            backend: self.name.clone(),
            reason: format!("environment variable {} is not set", self.credential_env),
        })
    }

    fn check_auth(&self, response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        match response.status() {
            status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                Err(BackendError::Auth {
                    backend: self.name.clone(),
                    reason: format!("credential from {} was rejected ({})", self.credential_env, status),
                })
            }
            _ => Ok(response),
        }
    }
}

#[async_trait]
impl BackendAdapter for HostedAdapter {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Hosted
    }

    async fn send(&self, request: &RoutedRequest) -> Result<BackendResponse, BackendError> {
        let credential = self.credential()?;
        let model = self.upstream_model.as_deref().unwrap_or(request.model());
        let body = request.to_messages_body(model, request.stream());

        tracing::debug!(
            backend = %self.name,
            tier = %self.tier,
            model = %model,
            stream = request.stream(),
            "Forwarding request to hosted API"
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", credential)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e, None))?;

        let response = self.check_auth(response)?;
        read_messages_response(&self.name, response, request.stream()).await
    }

    async fn probe(&self, timeout: Duration) -> Result<(), BackendError> {
        let credential = self.credential()?;
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", credential)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(&self.name, e, Some(timeout)))?;

        let response = self.check_auth(response)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(&self.name, response).await)
        }
    }
}
