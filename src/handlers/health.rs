//! Health check endpoint
//!
//! Always answers 200 while the process is serving, and reports the cached
//! readiness of every backend. It never probes; the numbers are whatever the
//! background checks and recent calls last recorded.

use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::handlers::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backends: Vec<BackendStatus>,
}

/// Cached readiness of one backend
#[derive(Debug, Serialize)]
pub struct BackendStatus {
    pub tier: u8,
    pub name: String,
    pub kind: &'static str,
    pub reachable: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

/// GET /health handler
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let backends = state
        .health()
        .snapshot()
        .into_iter()
        .map(|entry| BackendStatus {
            tier: entry.tier.get(),
            kind: state
                .config()
                .backend(entry.tier)
                .map(|b| b.kind().as_str())
                .unwrap_or("unknown"),
            name: entry.name,
            reachable: entry.available,
            last_checked_at: entry.status.last_checked_at(),
            consecutive_failures: entry.status.consecutive_failures(),
        })
        .collect::<Vec<_>>();

    tracing::debug!(
        backends = backends.len(),
        reachable = backends.iter().filter(|b| b.reachable).count(),
        "Reporting backend health"
    );

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            backends,
        }),
    )
}
