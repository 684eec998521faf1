//! Prometheus metrics collection for tierroute
//!
//! Tracks:
//! - Request outcomes (succeeded, exhausted, answered locally)
//! - Per-backend attempt outcomes and latency
//! - Per-backend liveness as seen by the health monitor
//! - Failures of already-committed streams
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.
//! Backend labels are configured backend names, so cardinality is bounded
//! by the configuration (at most three backends).

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Final outcome of one client request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A backend answered
    Succeeded,
    /// Every candidate tier was skipped or failed
    Exhausted,
    /// Answered locally by the loop guard
    LoopGuard,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Exhausted => "exhausted",
            Self::LoopGuard => "loop_guard",
        }
    }
}

/// Metrics collector for tierroute
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,
    requests_total: IntCounterVec,
    attempts_total: IntCounterVec,
    attempt_duration: HistogramVec,
    backend_up: IntGaugeVec,
    mid_stream_failures: IntCounterVec,
}

impl Metrics {
    /// Create a new Metrics instance with its own registry
    ///
    /// # Errors
    ///
    /// Returns an error if metric registration fails (e.g., duplicate names).
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(
                "tierroute_requests_total",
                "Total number of /v1/messages requests by final outcome",
            ),
            &["outcome"],
        )?;

        // Outcome is "succeeded", "skipped" or "failed"
        let attempts_total = IntCounterVec::new(
            Opts::new(
                "tierroute_attempts_total",
                "Total backend attempts by backend and outcome (skipped attempts issue no network call)",
            ),
            &["backend", "outcome"],
        )?;

        let attempt_duration = HistogramVec::new(
            HistogramOpts::new(
                "tierroute_attempt_duration_ms",
                "Latency from dispatch to first byte (or failure) per backend in milliseconds",
            )
            .buckets(vec![
                5.0, 25.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 15000.0, 60000.0,
            ]),
            &["backend"],
        )?;

        let backend_up = IntGaugeVec::new(
            Opts::new(
                "tierroute_backend_up",
                "1 if the health monitor considers the backend available, 0 otherwise",
            ),
            &["backend"],
        )?;

        // A committed stream that fails does not fall through to another tier,
        // so these never show up in attempts_total as failures
        let mid_stream_failures = IntCounterVec::new(
            Opts::new(
                "tierroute_mid_stream_failures_total",
                "Total number of streams that failed after the first chunk was sent to the client",
            ),
            &["backend"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(attempts_total.clone()))?;
        registry.register(Box::new(attempt_duration.clone()))?;
        registry.register(Box::new(backend_up.clone()))?;
        registry.register(Box::new(mid_stream_failures.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            attempts_total,
            attempt_duration,
            backend_up,
            mid_stream_failures,
        })
    }

    /// Record the final outcome of a request
    pub fn record_request(&self, outcome: RequestOutcome) -> Result<(), prometheus::Error> {
        self.requests_total
            .get_metric_with_label_values(&[outcome.as_str()])?
            .inc();
        Ok(())
    }

    /// Record one attempt and, unless it was skipped, its latency
    ///
    /// # Errors
    ///
    /// Returns an error if `duration_ms` is NaN, infinite or negative; such
    /// values would corrupt histogram percentiles.
    pub fn record_attempt(
        &self,
        backend: &str,
        outcome: &str,
        duration_ms: Option<f64>,
    ) -> Result<(), prometheus::Error> {
        if let Some(duration_ms) = duration_ms {
            if !duration_ms.is_finite() || duration_ms < 0.0 {
                return Err(prometheus::Error::Msg(format!(
                    "attempt duration must be finite and non-negative, got: {}",
                    duration_ms
                )));
            }
            self.attempt_duration
                .get_metric_with_label_values(&[backend])?
                .observe(duration_ms);
        }

        self.attempts_total
            .get_metric_with_label_values(&[backend, outcome])?
            .inc();
        Ok(())
    }

    /// Publish the current availability of a backend
    pub fn set_backend_up(&self, backend: &str, up: bool) -> Result<(), prometheus::Error> {
        self.backend_up
            .get_metric_with_label_values(&[backend])?
            .set(i64::from(up));
        Ok(())
    }

    /// Record a failure after a stream was committed to the client
    pub fn mid_stream_failure(&self, backend: &str) -> Result<(), prometheus::Error> {
        self.mid_stream_failures
            .get_metric_with_label_values(&[backend])?
            .inc();
        Ok(())
    }

    /// Current mid-stream failure count for a backend
    pub fn mid_stream_failures_count(&self, backend: &str) -> u64 {
        self.mid_stream_failures
            .get_metric_with_label_values(&[backend])
            .map(|c| c.get())
            .unwrap_or(0)
    }

    /// Current attempt count for a backend and outcome
    pub fn attempts_count(&self, backend: &str, outcome: &str) -> u64 {
        self.attempts_total
            .get_metric_with_label_values(&[backend, outcome])
            .map(|c| c.get())
            .unwrap_or(0)
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!("metrics output is not valid UTF-8: {}", e))
        })
    }
}

/// Log and swallow a metrics recording error
///
/// Metrics are best-effort; a registry problem must never fail a request.
pub fn log_recording_error(operation: &'static str, result: Result<(), prometheus::Error>) {
    if let Err(e) = result {
        tracing::warn!(operation, error = %e, "Failed to record metric");
    }
}
