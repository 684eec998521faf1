//! Configuration management for tierroute
//!
//! Parses TOML configuration files and provides typed access to settings.
//! Configuration is loaded once at startup and is immutable afterwards;
//! changing backends or tier rules requires a restart.

use crate::backends::{BackendKind, Tier};
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// How long in-flight requests may keep running after a shutdown signal
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
    /// Largest accepted request body; long agent conversations run to tens of MB
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    32 * 1024 * 1024
}

/// Individual backend configuration
///
/// All fields are private to enforce invariants. Configuration is loaded via
/// deserialization and validated via Config::validate(). After construction,
/// fields cannot be mutated, ensuring validated data remains valid.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    tier: Tier,
    name: String,
    kind: BackendKind,
    base_url: String,
    /// Model names this backend answers for (reported by /v1/models)
    #[serde(default)]
    models: Vec<String>,
    /// Model name sent upstream instead of the client's model name
    #[serde(default)]
    upstream_model: Option<String>,
    #[serde(default)]
    primary: bool,
    /// Environment variable holding the account credential (hosted backends)
    #[serde(default)]
    credential_env: Option<String>,
    /// Environment variable holding an OAuth session token (bridge backends)
    #[serde(default)]
    session_env: Option<String>,
    /// Per-backend override of `timeouts.attempt_seconds`
    #[serde(default)]
    timeout_seconds: Option<u64>,
    /// Command the process supervisor runs when this backend goes down
    #[serde(default)]
    ensure_command: Option<Vec<String>>,
}

impl BackendConfig {
    /// Get the backend tier
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Get the backend name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the wire protocol kind
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Get the base URL with any trailing slash removed
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Get the declared model names
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Get the upstream model override
    pub fn upstream_model(&self) -> Option<&str> {
        self.upstream_model.as_deref()
    }

    /// Whether this backend is declared primary
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Get the credential environment variable name
    pub fn credential_env(&self) -> Option<&str> {
        self.credential_env.as_deref()
    }

    /// Get the session token environment variable name
    pub fn session_env(&self) -> Option<&str> {
        self.session_env.as_deref()
    }

    /// Get the per-backend attempt timeout override
    pub fn timeout_seconds(&self) -> Option<u64> {
        self.timeout_seconds
    }

    /// Get the supervisor command (program followed by arguments)
    pub fn ensure_command(&self) -> Option<&[String]> {
        self.ensure_command.as_deref()
    }
}

/// One `pattern -> tier` mapping entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TierRule {
    pub pattern: String,
    pub tier: Tier,
}

/// Routing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    /// Evaluated top-to-bottom, first match wins
    #[serde(default)]
    pub rules: Vec<TierRule>,
    /// Answer "assistant-last" follow-up calls locally with an empty turn
    #[serde(default = "default_true")]
    pub loop_guard: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            loop_guard: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Health monitor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_probe_interval")]
    pub probe_interval_seconds: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_seconds: u64,
    /// Consecutive failed calls before a backend is marked down
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Consecutive missed probes before a backend is marked down
    #[serde(default = "default_probe_failure_threshold")]
    pub probe_failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_seconds: default_probe_interval(),
            probe_timeout_seconds: default_probe_timeout(),
            failure_threshold: default_failure_threshold(),
            probe_failure_threshold: default_probe_failure_threshold(),
        }
    }
}

fn default_probe_interval() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    1
}

fn default_probe_failure_threshold() -> u32 {
    3
}

/// Attempt and stream timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutsConfig {
    /// Connect/first-byte timeout for a single backend attempt
    #[serde(default = "default_attempt_timeout")]
    pub attempt_seconds: u64,
    /// Maximum silence between chunks of a committed stream
    #[serde(default = "default_stream_idle_timeout")]
    pub stream_idle_seconds: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            attempt_seconds: default_attempt_timeout(),
            stream_idle_seconds: default_stream_idle_timeout(),
        }
    }
}

fn default_attempt_timeout() -> u64 {
    60
}

fn default_stream_idle_timeout() -> u64 {
    300
}

/// Upper bound for any attempt timeout in seconds
const MAX_ATTEMPT_TIMEOUT: u64 = 600;

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Find the backend serving a tier
    pub fn backend(&self, tier: Tier) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.tier == tier)
    }

    /// Declared tiers in ascending order
    pub fn declared_tiers(&self) -> Vec<Tier> {
        let mut tiers: Vec<Tier> = self.backends.iter().map(|b| b.tier).collect();
        tiers.sort();
        tiers
    }

    /// Lowest-numbered backend declared primary
    pub fn primary_tier(&self) -> Option<Tier> {
        self.backends
            .iter()
            .filter(|b| b.primary)
            .map(|b| b.tier)
            .min()
    }

    /// Attempt timeout for a backend (per-backend override, else global)
    pub fn attempt_timeout(&self, tier: Tier) -> Duration {
        let seconds = self
            .backend(tier)
            .and_then(|b| b.timeout_seconds)
            .unwrap_or(self.timeouts.attempt_seconds);
        Duration::from_secs(seconds)
    }

    /// Idle timeout for committed streams
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.stream_idle_seconds)
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()` and `from_str()`, but can
    /// also be called explicitly when a Config is constructed by other means.
    pub fn validate(&self) -> AppResult<()> {
        if self.backends.is_empty() {
            return Err(AppError::Config(
                "no backends configured. Declare at least one [[backends]] entry \
                with tier, name, kind and base_url"
                    .to_string(),
            ));
        }

        let mut seen_tiers = HashSet::new();
        let mut seen_names = HashSet::new();

        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "backend in {} has an empty name",
                    backend.tier
                )));
            }
            if !seen_tiers.insert(backend.tier) {
                return Err(AppError::Config(format!(
                    "{} is declared by more than one backend (second: '{}'). \
                    Each tier is a distinct provider and must be declared once",
                    backend.tier, backend.name
                )));
            }
            if !seen_names.insert(backend.name.as_str()) {
                return Err(AppError::Config(format!(
                    "backend name '{}' is used more than once",
                    backend.name
                )));
            }

            if !backend.base_url.starts_with("http://") && !backend.base_url.starts_with("https://")
            {
                return Err(AppError::Config(format!(
                    "backend '{}' has invalid base_url '{}'. \
                    base_url must start with 'http://' or 'https://'",
                    backend.name, backend.base_url
                )));
            }

            match backend.kind {
                BackendKind::Hosted => match backend.credential_env.as_deref() {
                    Some(var) if !var.trim().is_empty() => {}
                    _ => {
                        return Err(AppError::Config(format!(
                            "hosted backend '{}' requires credential_env naming the environment \
                            variable that holds its account credential",
                            backend.name
                        )));
                    }
                },
                BackendKind::Native | BackendKind::Bridge => {
                    if backend.credential_env.is_some() {
                        return Err(AppError::Config(format!(
                            "backend '{}' sets credential_env but only hosted backends use it",
                            backend.name
                        )));
                    }
                }
            }

            if let Some(seconds) = backend.timeout_seconds {
                validate_attempt_timeout(&format!("backends.{}.timeout_seconds", backend.name), seconds)?;
                if seconds > self.timeouts.stream_idle_seconds {
                    return Err(AppError::Config(format!(
                        "backends.{}.timeout_seconds ({}) cannot exceed timeouts.stream_idle_seconds ({})",
                        backend.name, seconds, self.timeouts.stream_idle_seconds
                    )));
                }
            }

            if let Some(command) = &backend.ensure_command
                && command.first().is_none_or(|program| program.trim().is_empty())
            {
                return Err(AppError::Config(format!(
                    "backend '{}' has an empty ensure_command",
                    backend.name
                )));
            }
        }

        if self.primary_tier().is_none() {
            return Err(AppError::Config(
                "no backend is declared primary. Set `primary = true` on the backend \
                that unmatched model names should go to first"
                    .to_string(),
            ));
        }

        for (index, rule) in self.routing.rules.iter().enumerate() {
            if rule.pattern.trim().is_empty() {
                return Err(AppError::Config(format!(
                    "routing.rules[{}] has an empty pattern",
                    index
                )));
            }
            if !seen_tiers.contains(&rule.tier) {
                return Err(AppError::Config(format!(
                    "routing.rules[{}] (pattern '{}') references {} but no backend declares it",
                    index, rule.pattern, rule.tier
                )));
            }
        }

        validate_attempt_timeout("timeouts.attempt_seconds", self.timeouts.attempt_seconds)?;
        if self.timeouts.stream_idle_seconds < self.timeouts.attempt_seconds {
            return Err(AppError::Config(format!(
                "timeouts.stream_idle_seconds ({}) must be at least timeouts.attempt_seconds ({})",
                self.timeouts.stream_idle_seconds, self.timeouts.attempt_seconds
            )));
        }

        if self.server.max_body_bytes == 0 {
            return Err(AppError::Config(
                "server.max_body_bytes must be greater than 0".to_string(),
            ));
        }

        if !(1..=9).contains(&self.health.probe_timeout_seconds) {
            return Err(AppError::Config(format!(
                "health.probe_timeout_seconds must be between 1 and 9, got {}",
                self.health.probe_timeout_seconds
            )));
        }
        if self.health.probe_interval_seconds == 0 {
            return Err(AppError::Config(
                "health.probe_interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.health.failure_threshold == 0 || self.health.probe_failure_threshold == 0 {
            return Err(AppError::Config(
                "health.failure_threshold and health.probe_failure_threshold must be at least 1"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_attempt_timeout(field: &str, seconds: u64) -> AppResult<()> {
    if seconds == 0 {
        return Err(AppError::Config(format!("{} must be greater than 0", field)));
    }
    if seconds > MAX_ATTEMPT_TIMEOUT {
        return Err(AppError::Config(format!(
            "{} cannot exceed {} seconds, got {}",
            field, MAX_ATTEMPT_TIMEOUT, seconds
        )));
    }
    Ok(())
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
