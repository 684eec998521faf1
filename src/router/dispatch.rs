//! Router core: ordered tier fallback
//!
//! For each request the router walks the tiers produced by [`TierPolicy`]:
//!
//! ```text
//! for tier in resolve_tiers(model):
//!     unavailable?          -> Skipped, next tier (no network call)
//!     send within timeout   -> Failed on error/timeout, next tier
//!     ok                    -> Succeeded, return
//! all tiers done            -> Exhausted
//! ```
//!
//! A streaming attempt only counts as a success once its first chunk has
//! arrived within the attempt timeout. From that point the stream is
//! committed: a later failure ends the stream with an error and never
//! triggers another tier, because the client has already seen output.

use super::{AttemptOutcome, RoutingOutcome, TierPolicy};
use crate::backends::{BackendAdapter, BackendResponse, BackendSet, ChunkStream, Tier};
use crate::config::Config;
use crate::error::{AppError, AppResult, BackendError};
use crate::health::{FailureSource, HealthMonitor};
use crate::metrics::{Metrics, RequestOutcome, log_recording_error};
use crate::protocol::RoutedRequest;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How the tier list for a request is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Policy order with health skipping and fallback
    Auto,
    /// Exactly one tier, no health skip and no fallback
    Forced(Tier),
}

/// A successful dispatch
#[derive(Debug)]
pub struct Routed {
    pub tier: Tier,
    pub backend: String,
    pub response: BackendResponse,
    pub outcome: RoutingOutcome,
}

/// Tiered router with health-aware fallback
pub struct TierRouter {
    config: Arc<Config>,
    policy: TierPolicy,
    backends: BackendSet,
    health: Arc<HealthMonitor>,
    metrics: Arc<Metrics>,
}

impl TierRouter {
    /// Create a router over the given backends
    ///
    /// # Errors
    /// Returns `AppError::Config` if the routing rules reference tiers that
    /// are not declared.
    pub fn new(
        config: Arc<Config>,
        backends: BackendSet,
        health: Arc<HealthMonitor>,
        metrics: Arc<Metrics>,
    ) -> AppResult<Self> {
        let policy = TierPolicy::from_config(&config)?;
        Ok(Self {
            config,
            policy,
            backends,
            health,
            metrics,
        })
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    /// Dispatch a request and return the first successful response
    ///
    /// # Errors
    /// - `AppError::Validation` if a forced tier is not declared
    /// - `AppError::Exhausted` if every candidate tier was skipped or failed
    pub async fn route(&self, request: &RoutedRequest, route: Route) -> AppResult<Routed> {
        let (tiers, use_health) = match route {
            Route::Auto => (self.policy.resolve_tiers(request.model()), true),
            Route::Forced(tier) => {
                if !self.policy.is_declared(tier) {
                    return Err(AppError::Validation(format!(
                        "forced tier {} is not configured",
                        tier
                    )));
                }
                (vec![tier], false)
            }
        };

        tracing::debug!(
            model = %request.model(),
            route = ?route,
            tiers = ?tiers,
            stream = request.stream(),
            "Resolved tier order"
        );

        let mut outcome = RoutingOutcome::default();

        for tier in tiers {
            let Some(adapter) = self.backends.get(tier) else {
                continue;
            };

            if use_health {
                if self.health.needs_probe(tier) {
                    tracing::debug!(backend = %adapter.name(), tier = %tier, "Probing cold backend before first attempt");
                    self.health.probe(tier).await;
                }

                if !self.health.is_available(tier) {
                    tracing::debug!(backend = %adapter.name(), tier = %tier, "Skipping backend marked down");
                    log_recording_error(
                        "record_attempt",
                        self.metrics.record_attempt(adapter.name(), "skipped", None),
                    );
                    outcome.record(
                        tier,
                        adapter.name(),
                        AttemptOutcome::Skipped(BackendError::Unavailable {
                            backend: adapter.name().to_string(),
                        }),
                        Duration::ZERO,
                    );
                    continue;
                }
            }

            let started = Instant::now();
            let result = self.attempt(adapter, request).await;
            let latency = started.elapsed();
            let latency_ms = latency.as_secs_f64() * 1000.0;

            match result {
                Ok(response) => {
                    self.health.record_success(tier);
                    log_recording_error(
                        "record_attempt",
                        self.metrics
                            .record_attempt(adapter.name(), "succeeded", Some(latency_ms)),
                    );
                    log_recording_error(
                        "record_request",
                        self.metrics.record_request(RequestOutcome::Succeeded),
                    );
                    outcome.record(tier, adapter.name(), AttemptOutcome::Succeeded, latency);

                    tracing::info!(
                        model = %request.model(),
                        tier = %tier,
                        backend = %adapter.name(),
                        latency_ms = latency.as_millis() as u64,
                        attempts = %outcome,
                        "Request routed"
                    );

                    return Ok(Routed {
                        tier,
                        backend: adapter.name().to_string(),
                        response,
                        outcome,
                    });
                }
                Err(e) => {
                    tracing::debug!(
                        backend = %adapter.name(),
                        tier = %tier,
                        error = %e,
                        latency_ms = latency.as_millis() as u64,
                        "Attempt failed, falling through"
                    );
                    self.health.record_failure(tier, FailureSource::Call, &e);
                    log_recording_error(
                        "record_attempt",
                        self.metrics.record_attempt(adapter.name(), "failed", Some(latency_ms)),
                    );
                    outcome.record(tier, adapter.name(), AttemptOutcome::Failed(e), latency);
                }
            }
        }

        tracing::warn!(
            model = %request.model(),
            route = ?route,
            attempts = %outcome,
            "All tiers exhausted"
        );
        log_recording_error(
            "record_request",
            self.metrics.record_request(RequestOutcome::Exhausted),
        );
        Err(AppError::Exhausted(outcome))
    }

    /// One bounded attempt against one backend
    ///
    /// The attempt timeout covers the whole call for complete responses and
    /// everything up to the first chunk for streams.
    async fn attempt(
        &self,
        adapter: &Arc<dyn BackendAdapter>,
        request: &RoutedRequest,
    ) -> Result<BackendResponse, BackendError> {
        let limit = self.config.attempt_timeout(adapter.tier());

        let call = async {
            match adapter.send(request).await? {
                BackendResponse::Complete(body) => Ok(BackendResponse::Complete(body)),
                BackendResponse::Stream(mut chunks) => match chunks.next().await {
                    Some(Ok(first)) => Ok(BackendResponse::Stream(self.commit_stream(
                        adapter.tier(),
                        adapter.name(),
                        first,
                        chunks,
                    ))),
                    Some(Err(e)) => Err(e),
                    None => Err(BackendError::Malformed {
                        backend: adapter.name().to_string(),
                        reason: "stream ended before any event".to_string(),
                    }),
                },
            }
        };

        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                backend: adapter.name().to_string(),
                seconds: limit.as_secs(),
            }),
        }
    }

    /// Wrap a stream whose first chunk has arrived
    ///
    /// Later chunks are bounded by the idle timeout. Any failure is yielded
    /// once as the last item and counted as a mid-stream failure.
    fn commit_stream(&self, tier: Tier, backend: &str, first: bytes::Bytes, mut rest: ChunkStream) -> ChunkStream {
        let idle = self.config.stream_idle_timeout();
        let health = Arc::clone(&self.health);
        let metrics = Arc::clone(&self.metrics);
        let backend = backend.to_string();

        async_stream::stream! {
            let mut received = first.len();
            yield Ok(first);

            loop {
                let error = match tokio::time::timeout(idle, rest.next()).await {
                    Ok(Some(Ok(chunk))) => {
                        received += chunk.len();
                        yield Ok(chunk);
                        continue;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e @ BackendError::StreamInterrupted { .. }))) => e,
                    Ok(Some(Err(e))) => BackendError::StreamInterrupted {
                        backend: backend.clone(),
                        bytes_received: received,
                        reason: e.to_string(),
                    },
                    Err(_) => BackendError::StreamIdle {
                        backend: backend.clone(),
                        seconds: idle.as_secs(),
                    },
                };

                tracing::warn!(
                    backend = %backend,
                    tier = %tier,
                    bytes_received = received,
                    error = %error,
                    "Committed stream failed"
                );
                health.record_failure(tier, FailureSource::Call, &error);
                log_recording_error("mid_stream_failure", metrics.mid_stream_failure(&backend));
                yield Err(error);
                break;
            }
        }
        .boxed()
    }
}
