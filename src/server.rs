//! HTTP server assembly and lifecycle
//!
//! Startup order: build state, bind, start background health checks, serve.
//! On SIGINT/SIGTERM the listener stops accepting, in-flight requests get
//! `shutdown_grace_seconds` to finish, then probe loops are stopped.

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::handlers::{self, AppState};
use crate::middleware::request_id_middleware;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

/// Build the application router
pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config().server.max_body_bytes;
    Router::new()
        .route("/v1/messages", post(handlers::messages::handler))
        .route("/v1/models", get(handlers::models::handler))
        .route("/health", get(handlers::health::handler))
        .route("/metrics", get(handlers::metrics::handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve the configured listen address
///
/// # Errors
/// Returns `AppError::Config` if `server.host` is not an IP address.
pub fn listen_addr(config: &Config) -> AppResult<SocketAddr> {
    let host = config.server.host.parse::<IpAddr>().map_err(|e| {
        AppError::Config(format!(
            "server.host '{}' is not an IP address: {}",
            config.server.host, e
        ))
    })?;
    Ok(SocketAddr::new(host, config.server.port))
}

/// Run the proxy until a shutdown signal arrives
pub async fn run(config: Config) -> AppResult<()> {
    let config = Arc::new(config);
    let state = AppState::new(Arc::clone(&config))?;
    let addr = listen_addr(&config)?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind {}: {}", addr, e)))?;

    tracing::info!(
        address = %addr,
        backends = config.backends.len(),
        "tierroute listening"
    );

    serve(state, listener, shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` resolves
///
/// Background health checks run for the lifetime of the server.
pub async fn serve<F>(state: AppState, listener: TcpListener, shutdown: F) -> AppResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let grace = Duration::from_secs(state.config().server.shutdown_grace_seconds);
    let probes = Arc::clone(state.health()).start_background_checks();
    let app = build_app(state);

    let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    let result = tokio::select! {
        joined = &mut server => Some(joined),
        () = shutdown => None,
    };

    let result = match result {
        // Server stopped on its own, before any signal
        Some(joined) => joined,
        None => {
            tracing::info!(grace_seconds = grace.as_secs(), "Draining in-flight requests");
            let _ = stop_tx.send(true);
            match tokio::time::timeout(grace, &mut server).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(
                        grace_seconds = grace.as_secs(),
                        "Grace period elapsed with requests still in flight; closing them"
                    );
                    server.abort();
                    Ok(Ok(()))
                }
            }
        }
    };

    for probe in probes {
        probe.abort();
    }

    match result {
        Ok(Ok(())) => {
            tracing::info!("tierroute shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => Err(AppError::Internal(format!("Server error: {}", e))),
        Err(e) => Err(AppError::Internal(format!("Server task failed: {}", e))),
    }
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::warn!("Received Ctrl+C, initiating shutdown"),
        () = terminate => tracing::warn!("Received SIGTERM, initiating shutdown"),
    }
}
