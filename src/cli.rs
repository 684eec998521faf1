//! Command-line interface for tierroute
//!
//! Provides argument parsing and subcommand handling for the tierroute binary.

use clap::{Parser, Subcommand};

/// Tiered request-routing proxy for inference backends
#[derive(Parser)]
#[command(name = "tierroute")]
#[command(version)]
#[command(about = "Tiered request-routing proxy for inference backends")]
#[command(
    long_about = "tierroute accepts Anthropic Messages API requests and forwards each one to \
    the first healthy backend in strict tier order: a local model server, an OAuth-bridged \
    CLI service, then a hosted account API."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the proxy (default)
    Serve,
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Validate the configuration file and exit
    Check,
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# tierroute configuration
# =======================
#
# Requests are tried against backends in tier order. A backend that is down
# (per health checks) is skipped without a network call; a backend that fails
# hands the request to the next tier.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (127.0.0.1 keeps the proxy local to this machine)
host = "127.0.0.1"

# Port clients point their Anthropic base URL at
port = 4000

# Seconds in-flight requests may take to finish after SIGINT/SIGTERM
shutdown_grace_seconds = 30

# Largest accepted request body in bytes (32 MiB)
max_body_bytes = 33554432

# ─────────────────────────────────────────────────────────────────────────────
# BACKENDS
# ─────────────────────────────────────────────────────────────────────────────
#
# One backend per tier (1..=3). Fields:
#   - tier: 1, 2 or 3; lower tiers are tried first
#   - name: unique label used in logs, metrics and response headers
#   - kind: "native" (local model server speaking the Messages API),
#           "bridge" (OAuth-bridged CLI service speaking chat completions),
#           "hosted" (hosted account API)
#   - base_url: http:// or https:// address, without a trailing /v1
#   - models: model names this backend is known to answer for
#   - upstream_model: optional model name sent upstream instead of the client's
#   - primary: unmatched model names start at the lowest primary tier
#   - credential_env: (hosted only, required) env var holding the API key
#   - session_env: (bridge only, optional) env var holding a session token
#   - timeout_seconds: optional per-backend attempt timeout
#   - ensure_command: optional command started when the backend goes down

[[backends]]
tier = 1
name = "ollama"
kind = "native"
base_url = "http://127.0.0.1:11434"
models = ["qwen3-coder:480b-cloud"]
upstream_model = "qwen3-coder:480b-cloud"
primary = true
# ensure_command = ["ollama", "serve"]

[[backends]]
tier = 2
name = "gemini-bridge"
kind = "bridge"
base_url = "http://127.0.0.1:8090"
models = ["gemini-2.5-flash"]
# session_env = "GEMINI_SESSION_TOKEN"

[[backends]]
tier = 3
name = "claude-account"
kind = "hosted"
base_url = "https://api.anthropic.com"
models = ["claude-real"]
credential_env = "ANTHROPIC_API_KEY"
timeout_seconds = 120

# ─────────────────────────────────────────────────────────────────────────────
# ROUTING
# ─────────────────────────────────────────────────────────────────────────────

[routing]
# Evaluated top to bottom, first match wins. Matching is case-insensitive;
# "gemini-*" is a prefix match, "*" matches everything, anything else is a
# substring match. The matched tier is tried first, then the remaining tiers
# in ascending order.
rules = [
    { pattern = "gemini-*", tier = 2 },
    { pattern = "claude-real", tier = 3 },
    { pattern = "opus", tier = 3 },
]

# Answer requests whose last message is from the assistant with an empty
# turn instead of forwarding them
loop_guard = true

# ─────────────────────────────────────────────────────────────────────────────
# HEALTH
# ─────────────────────────────────────────────────────────────────────────────

[health]
probe_interval_seconds = 30
# Must be 1..=9
probe_timeout_seconds = 5
# Failed requests before a backend is marked down
failure_threshold = 1
# Missed probes before a backend is marked down
probe_failure_threshold = 3

# ─────────────────────────────────────────────────────────────────────────────
# TIMEOUTS
# ─────────────────────────────────────────────────────────────────────────────

[timeouts]
# Time allowed until a backend's response (or first stream chunk) arrives
attempt_seconds = 60
# Maximum silence between chunks once a stream has started
stream_idle_seconds = 300

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error" (RUST_LOG overrides)
log_level = "info"

# Prometheus metrics are always available at /metrics on the server port
"#
}
