//! Telemetry and observability setup
//!
//! Configures structured logging with tracing and tracing-subscriber.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Build the log filter: `RUST_LOG` when set, otherwise `default_level` for
/// this crate and request spans from tower-http
fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("tierroute={},tower_http=info", default_level))
    })
}

/// Initialize tracing subscriber for structured logging
///
/// This can only be called once per process. Subsequent calls are silently ignored.
///
/// # Examples
///
/// ```no_run
/// tierroute::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        tracing_subscriber::registry()
            .with(filter(default_level))
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_names_crate() {
        // SAFETY: no other test in this binary reads RUST_LOG
        unsafe { std::env::remove_var("RUST_LOG") };
        let rendered = filter("debug").to_string();
        assert!(rendered.contains("tierroute=debug"), "got: {}", rendered);
        assert!(rendered.contains("tower_http=info"), "got: {}", rendered);
    }

    #[test]
    fn test_init_is_idempotent() {
        init("info");
        init("debug");
    }
}
