//! tierroute - tiered request-routing proxy
//!
//! Accepts Anthropic Messages API requests and dispatches each one to the
//! first healthy backend in strict tier order, falling through to the next
//! tier when a backend is down or fails.

pub mod backends;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod protocol;
pub mod router;
pub mod server;
pub mod telemetry;
