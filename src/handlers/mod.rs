//! HTTP request handlers for tierroute

use crate::backends::BackendSet;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::health::{CommandSupervisor, HealthMonitor, NoopSupervisor, ProcessSupervisor};
use crate::metrics::Metrics;
use crate::router::TierRouter;
use std::sync::Arc;

pub mod extractor;
pub mod health;
pub mod messages;
pub mod metrics;
pub mod models;

/// Header a client sets to force a single tier
pub const FORCE_TIER_HEADER: &str = "x-tierroute-tier";

/// Response header naming the tier that answered
pub const TIER_HEADER: &str = "x-tierroute-tier";

/// Response header naming the backend that answered
pub const BACKEND_HEADER: &str = "x-tierroute-backend";

/// Application state shared across all handlers
///
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    router: Arc<TierRouter>,
    health: Arc<HealthMonitor>,
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Build every component from configuration
    ///
    /// # Errors
    /// Returns an error if metrics registration, HTTP client construction or
    /// tier policy compilation fails.
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let backends = BackendSet::from_config(&config)?;

        let supervisor = CommandSupervisor::from_config(&config);
        let supervisor: Arc<dyn ProcessSupervisor> = if supervisor.has_commands() {
            Arc::new(supervisor)
        } else {
            Arc::new(NoopSupervisor)
        };

        Self::with_components(config, backends, supervisor)
    }

    /// Build state around pre-built backends and supervisor
    pub fn with_components(
        config: Arc<Config>,
        backends: BackendSet,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> AppResult<Self> {
        let metrics = Arc::new(Metrics::new().map_err(|e| {
            AppError::Internal(format!("Failed to initialize metrics: {}", e))
        })?);

        let health = Arc::new(HealthMonitor::new(
            backends.clone(),
            config.health.clone(),
            supervisor,
            Arc::clone(&metrics),
        ));

        let router = Arc::new(TierRouter::new(
            Arc::clone(&config),
            backends,
            Arc::clone(&health),
            Arc::clone(&metrics),
        )?);

        Ok(Self {
            config,
            router,
            health,
            metrics,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &TierRouter {
        &self.router
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
