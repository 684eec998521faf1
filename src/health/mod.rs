//! Health monitoring for backends
//!
//! Each backend owns one state cell (a `tokio::sync::watch` channel). Reads
//! borrow the current value without blocking; writes go through
//! `send_modify`, so concurrent updates to the same backend are serialized
//! while different backends never contend.
//!
//! Transition rules:
//! - a failed call marks a backend down once `consecutive_failures` reaches
//!   `failure_threshold` (default 1)
//! - a missed probe marks it down once the count reaches
//!   `probe_failure_threshold` (default 3)
//! - any success (probe or call) marks it up and resets the count

pub mod supervisor;

pub use supervisor::{CommandSupervisor, NoopSupervisor, ProcessSupervisor, SupervisorError};

use crate::backends::{BackendSet, Tier};
use crate::config::HealthConfig;
use crate::error::BackendError;
use crate::metrics::{Metrics, log_recording_error};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::AbortHandle;

/// Health state of one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    last_checked_at: Option<DateTime<Utc>>,
    is_up: bool,
    consecutive_failures: u32,
}

impl HealthStatus {
    /// Initial state: optimistic, never checked
    fn unchecked() -> Self {
        Self {
            last_checked_at: None,
            is_up: true,
            consecutive_failures: 0,
        }
    }

    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        self.last_checked_at
    }

    pub fn is_up(&self) -> bool {
        self.is_up
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Where a failure observation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSource {
    /// A real request dispatched by the router
    Call,
    /// A liveness probe
    Probe,
}

/// Snapshot entry for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct BackendHealth {
    pub tier: Tier,
    pub name: String,
    pub status: HealthStatus,
    pub available: bool,
}

struct Cell {
    name: String,
    state: watch::Sender<HealthStatus>,
}

/// Per-backend health tracking, probing and background refresh
pub struct HealthMonitor {
    backends: BackendSet,
    cells: BTreeMap<Tier, Cell>,
    config: HealthConfig,
    supervisor: Arc<dyn ProcessSupervisor>,
    metrics: Arc<Metrics>,
}

impl HealthMonitor {
    /// Create a monitor with every backend up and unchecked
    pub fn new(
        backends: BackendSet,
        config: HealthConfig,
        supervisor: Arc<dyn ProcessSupervisor>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let cells = backends
            .iter()
            .map(|adapter| {
                log_recording_error("set_backend_up", metrics.set_backend_up(adapter.name(), true));
                (
                    adapter.tier(),
                    Cell {
                        name: adapter.name().to_string(),
                        state: watch::Sender::new(HealthStatus::unchecked()),
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        tracing::info!(
            backends = cells.len(),
            probe_interval_seconds = config.probe_interval_seconds,
            failure_threshold = config.failure_threshold,
            probe_failure_threshold = config.probe_failure_threshold,
            "HealthMonitor initialized with all backends starting as up"
        );

        Self {
            backends,
            cells,
            config,
            supervisor,
            metrics,
        }
    }

    /// Non-blocking readiness check; unknown tiers are unavailable
    pub fn is_available(&self, tier: Tier) -> bool {
        self.cells.get(&tier).is_some_and(|cell| {
            let status = cell.state.borrow();
            status.is_up && status.consecutive_failures < self.config.probe_failure_threshold
        })
    }

    /// Current status of one backend
    pub fn status(&self, tier: Tier) -> Option<HealthStatus> {
        self.cells.get(&tier).map(|cell| cell.state.borrow().clone())
    }

    /// Whether a backend has never been checked
    pub fn needs_probe(&self, tier: Tier) -> bool {
        self.cells
            .get(&tier)
            .is_some_and(|cell| cell.state.borrow().last_checked_at.is_none())
    }

    /// Every backend's status, ordered by tier
    pub fn snapshot(&self) -> Vec<BackendHealth> {
        self.cells
            .iter()
            .map(|(tier, cell)| BackendHealth {
                tier: *tier,
                name: cell.name.clone(),
                status: cell.state.borrow().clone(),
                available: self.is_available(*tier),
            })
            .collect()
    }

    /// Record a successful call or probe
    pub fn record_success(&self, tier: Tier) {
        let Some(cell) = self.cells.get(&tier) else {
            tracing::warn!(tier = %tier, "Attempted to mark success for unknown backend");
            return;
        };

        let mut recovered = false;
        cell.state.send_modify(|status| {
            recovered = !status.is_up;
            status.is_up = true;
            status.consecutive_failures = 0;
            status.last_checked_at = Some(Utc::now());
        });

        if recovered {
            tracing::info!(backend = %cell.name, tier = %tier, "Backend recovered to up state");
            log_recording_error("set_backend_up", self.metrics.set_backend_up(&cell.name, true));
        } else {
            tracing::debug!(backend = %cell.name, tier = %tier, "Backend success recorded");
        }
    }

    /// Record a failed call or probe
    pub fn record_failure(&self, tier: Tier, source: FailureSource, error: &BackendError) {
        self.apply_failure(tier, source, error);
    }

    /// Returns `true` when this failure took the backend from up to down
    fn apply_failure(&self, tier: Tier, source: FailureSource, error: &BackendError) -> bool {
        let Some(cell) = self.cells.get(&tier) else {
            tracing::warn!(tier = %tier, "Attempted to mark failure for unknown backend");
            return false;
        };

        let threshold = match source {
            FailureSource::Call => self.config.failure_threshold,
            FailureSource::Probe => self.config.probe_failure_threshold,
        };

        let mut went_down = false;
        let mut failures = 0;
        cell.state.send_modify(|status| {
            status.consecutive_failures = status.consecutive_failures.saturating_add(1);
            status.last_checked_at = Some(Utc::now());
            failures = status.consecutive_failures;
            if status.is_up && status.consecutive_failures >= threshold {
                status.is_up = false;
                went_down = true;
            }
        });

        if went_down {
            tracing::warn!(
                backend = %cell.name,
                tier = %tier,
                source = ?source,
                consecutive_failures = failures,
                error = %error,
                "Backend marked down"
            );
            log_recording_error("set_backend_up", self.metrics.set_backend_up(&cell.name, false));
            self.request_restart(tier, &cell.name);
        } else {
            tracing::debug!(
                backend = %cell.name,
                tier = %tier,
                source = ?source,
                consecutive_failures = failures,
                error = %error,
                "Backend failure recorded"
            );
        }
        went_down
    }

    /// Ask the supervisor to bring a downed backend back, without waiting
    fn request_restart(&self, tier: Tier, name: &str) {
        let supervisor = Arc::clone(&self.supervisor);
        let name = name.to_string();
        tokio::spawn(async move {
            if let Err(e) = supervisor.ensure_running(tier, &name).await {
                tracing::error!(backend = %name, tier = %tier, error = %e, "Supervisor failed to restart backend");
            }
        });
    }

    /// Probe one backend now and record the result
    ///
    /// Returns the updated status, or `None` for an unknown tier.
    pub async fn probe(&self, tier: Tier) -> Option<HealthStatus> {
        let adapter = self.backends.get(tier)?;
        let timeout = Duration::from_secs(self.config.probe_timeout_seconds);

        // adapters apply their own request timeout; this bounds DNS/connect too
        let result = match tokio::time::timeout(timeout, adapter.probe(timeout)).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                backend: adapter.name().to_string(),
                seconds: timeout.as_secs(),
            }),
        };

        match result {
            Ok(()) => {
                tracing::debug!(backend = %adapter.name(), tier = %tier, "Health probe succeeded");
                self.record_success(tier);
            }
            Err(e) => {
                tracing::debug!(backend = %adapter.name(), tier = %tier, error = %e, "Health probe failed");
                let went_down = self.apply_failure(tier, FailureSource::Probe, &e);
                // A down backend whose process is known dead gets another start
                // on every miss, not just on the up->down edge
                if !went_down && !self.supervisor.healthy(tier) {
                    self.request_restart(tier, adapter.name());
                }
            }
        }

        self.status(tier)
    }

    /// Start one independent refresh loop per backend
    ///
    /// A slow probe only delays its own backend's next probe. Each loop is
    /// paired with a monitor task that logs if the loop ever stops. Abort
    /// the returned handles to stop probing.
    pub fn start_background_checks(self: Arc<Self>) -> Vec<AbortHandle> {
        let interval = Duration::from_secs(self.config.probe_interval_seconds);
        let mut handles = Vec::with_capacity(self.cells.len());

        for (tier, cell) in &self.cells {
            let tier = *tier;
            let name = cell.name.clone();
            let monitor = Arc::clone(&self);

            let handle = tokio::spawn(async move {
                tracing::info!(
                    backend = %name,
                    tier = %tier,
                    interval_seconds = interval.as_secs(),
                    "Starting background health checks"
                );
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    monitor.probe(tier).await;
                }
            });

            let abort = handle.abort_handle();
            let name = cell.name.clone();
            tokio::spawn(async move {
                match handle.await {
                    Ok(()) => tracing::error!(
                        backend = %name,
                        tier = %tier,
                        "Background health check loop terminated unexpectedly"
                    ),
                    Err(e) if e.is_cancelled() => tracing::debug!(
                        backend = %name,
                        tier = %tier,
                        "Background health check loop stopped"
                    ),
                    Err(e) => tracing::error!(
                        backend = %name,
                        tier = %tier,
                        error = %e,
                        "Background health check loop panicked. This backend's state \
                        will not be refreshed until restart."
                    ),
                }
            });

            handles.push(abort);
        }

        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{BackendAdapter, BackendKind, BackendResponse};
    use crate::protocol::RoutedRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeAdapter {
        tier: Tier,
        name: String,
        probe_ok: AtomicBool,
        probes: AtomicUsize,
    }

    impl FakeAdapter {
        fn new(tier: u8, name: &str, probe_ok: bool) -> Arc<Self> {
            Arc::new(Self {
                tier: Tier::new(tier).unwrap(),
                name: name.to_string(),
                probe_ok: AtomicBool::new(probe_ok),
                probes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl BackendAdapter for FakeAdapter {
        fn tier(&self) -> Tier {
            self.tier
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> BackendKind {
            BackendKind::Native
        }

        async fn send(&self, _request: &RoutedRequest) -> Result<BackendResponse, BackendError> {
            unreachable!("health tests never send")
        }

        async fn probe(&self, _timeout: Duration) -> Result<(), BackendError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.probe_ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(BackendError::Network {
                    backend: self.name.clone(),
                    reason: "connection refused".to_string(),
                })
            }
        }
    }

    fn tier(n: u8) -> Tier {
        Tier::new(n).unwrap()
    }

    fn network_error() -> BackendError {
        BackendError::Network {
            backend: "x".to_string(),
            reason: "reset".to_string(),
        }
    }

    fn monitor(adapters: Vec<Arc<FakeAdapter>>) -> HealthMonitor {
        monitor_with(adapters, Arc::new(NoopSupervisor))
    }

    fn monitor_with(
        adapters: Vec<Arc<FakeAdapter>>,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> HealthMonitor {
        let adapters = adapters
            .into_iter()
            .map(|a| a as Arc<dyn BackendAdapter>)
            .collect();
        HealthMonitor::new(
            BackendSet::from_adapters(adapters),
            HealthConfig::default(),
            supervisor,
            Arc::new(Metrics::new().unwrap()),
        )
    }

    /// Supervisor whose process always exits right after starting
    #[derive(Default)]
    struct ExitingSupervisor {
        starts: AtomicUsize,
    }

    #[async_trait]
    impl ProcessSupervisor for ExitingSupervisor {
        async fn ensure_running(&self, _tier: Tier, _backend: &str) -> Result<(), SupervisorError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn healthy(&self, _tier: Tier) -> bool {
            false
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_new_monitor_starts_up_and_unchecked() {
        let monitor = monitor(vec![FakeAdapter::new(1, "a", true), FakeAdapter::new(2, "b", true)]);
        assert!(monitor.is_available(tier(1)));
        assert!(monitor.needs_probe(tier(1)));
        assert_eq!(monitor.status(tier(2)).unwrap().consecutive_failures(), 0);
    }

    #[test]
    fn test_unknown_tier_is_unavailable() {
        let monitor = monitor(vec![FakeAdapter::new(1, "a", true)]);
        assert!(!monitor.is_available(tier(3)));
        assert!(monitor.status(tier(3)).is_none());
    }

    #[tokio::test]
    async fn test_single_call_failure_marks_down() {
        let monitor = monitor(vec![FakeAdapter::new(1, "a", true)]);
        monitor.record_failure(tier(1), FailureSource::Call, &network_error());
        let status = monitor.status(tier(1)).unwrap();
        assert!(!status.is_up());
        assert!(!monitor.is_available(tier(1)));
        assert!(status.last_checked_at().is_some());
    }

    #[tokio::test]
    async fn test_probe_misses_need_threshold_before_down() {
        let monitor = monitor(vec![FakeAdapter::new(1, "a", false)]);

        monitor.probe(tier(1)).await;
        monitor.probe(tier(1)).await;
        assert!(monitor.is_available(tier(1)), "two misses should not flap the backend");

        let status = monitor.probe(tier(1)).await.unwrap();
        assert!(!status.is_up());
        assert_eq!(status.consecutive_failures(), 3);
        assert!(!monitor.is_available(tier(1)));
    }

    #[tokio::test]
    async fn test_single_success_recovers() {
        let adapter = FakeAdapter::new(1, "a", true);
        let monitor = monitor(vec![Arc::clone(&adapter)]);
        monitor.record_failure(tier(1), FailureSource::Call, &network_error());
        assert!(!monitor.is_available(tier(1)));

        let status = monitor.probe(tier(1)).await.unwrap();
        assert!(status.is_up());
        assert_eq!(status.consecutive_failures(), 0);
        assert!(monitor.is_available(tier(1)));
        assert_eq!(adapter.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exited_process_does_not_block_recovery() {
        let adapter = FakeAdapter::new(1, "a", false);
        let supervisor = Arc::new(ExitingSupervisor::default());
        let monitor = monitor_with(vec![Arc::clone(&adapter)], Arc::clone(&supervisor) as _);

        monitor.record_failure(tier(1), FailureSource::Call, &network_error());
        settle().await;
        assert_eq!(supervisor.starts.load(Ordering::SeqCst), 1);

        // still down and the process is gone: each miss asks for another start
        monitor.probe(tier(1)).await;
        monitor.probe(tier(1)).await;
        settle().await;
        assert_eq!(supervisor.starts.load(Ordering::SeqCst), 3);
        assert_eq!(adapter.probes.load(Ordering::SeqCst), 2);

        // the backend answers (started outside the supervisor); one probe recovers it
        adapter.probe_ok.store(true, Ordering::SeqCst);
        let status = monitor.probe(tier(1)).await.unwrap();
        assert!(status.is_up());
        assert!(monitor.is_available(tier(1)));
        settle().await;
        assert_eq!(supervisor.starts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_backends_are_isolated() {
        let monitor = monitor(vec![FakeAdapter::new(1, "a", false), FakeAdapter::new(2, "b", true)]);
        let before = monitor.status(tier(2)).unwrap();

        monitor.record_failure(tier(1), FailureSource::Call, &network_error());
        monitor.probe(tier(1)).await;

        assert_eq!(monitor.status(tier(2)).unwrap(), before);
        assert!(monitor.is_available(tier(2)));
    }

    #[tokio::test]
    async fn test_concurrent_failures_are_all_counted() {
        let monitor = Arc::new(monitor(vec![FakeAdapter::new(1, "a", true)]));
        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                tokio::spawn(async move {
                    monitor.record_failure(tier(1), FailureSource::Probe, &network_error());
                })
            })
            .collect();
        futures::future::join_all(tasks).await;
        assert_eq!(monitor.status(tier(1)).unwrap().consecutive_failures(), 50);
    }

    #[tokio::test]
    async fn test_snapshot_is_ordered_by_tier() {
        let monitor = monitor(vec![FakeAdapter::new(3, "c", true), FakeAdapter::new(1, "a", true)]);
        let names: Vec<String> = monitor.snapshot().into_iter().map(|b| b.name).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_checks_probe_each_backend() {
        let a = FakeAdapter::new(1, "a", true);
        let b = FakeAdapter::new(2, "b", false);
        let monitor = Arc::new(monitor(vec![Arc::clone(&a), Arc::clone(&b)]));

        let handles = Arc::clone(&monitor).start_background_checks();
        assert_eq!(handles.len(), 2);

        // first tick fires immediately, then every probe_interval_seconds (30s)
        tokio::time::sleep(Duration::from_secs(61)).await;
        for handle in &handles {
            handle.abort();
        }

        assert!(a.probes.load(Ordering::SeqCst) >= 3);
        assert!(b.probes.load(Ordering::SeqCst) >= 3);
        assert!(!monitor.needs_probe(tier(1)));
        assert!(!monitor.is_available(tier(2)));
    }
}
