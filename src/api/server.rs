use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::{
    middleware::{rate_limit, response_cache},
    services::{
        cancel_task, get_task, health, invalidate_cache, list_tasks, models_health, purge_task,
        reset_model, submit_inference, submit_task,
    },
    state::AppState,
};
use crate::clock::SystemClock;
use crate::config::Config;
use crate::dispatch::EchoInvoker;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Assemble the full route table with the shared middleware stack.
///
/// Layer order (outermost first): request decompression, rate limiting,
/// response caching, then the handlers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/inference", post(submit_inference))
        .route("/api/tasks", post(submit_task).get(list_tasks))
        .route("/api/tasks/{task_id}", get(get_task).delete(cancel_task))
        .route("/api/tasks/{task_id}/record", delete(purge_task))
        .route("/api/health", get(health))
        .route("/api/models/health", get(models_health))
        .route("/api/models/{model_id}/reset", post(reset_model))
        .route("/api/admin/cache/invalidate", post(invalidate_cache))
        .layer(middleware::from_fn_with_state(state.clone(), response_cache))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(RequestDecompressionLayer::new())
        .with_state(state)
}

/// Periodically drop terminal tasks past their retention TTL.
fn spawn_retention_sweeper(state: &AppState) {
    let registry = state.registry.clone();
    let ttl = chrono::Duration::seconds(state.config.retention.task_ttl_secs);
    let interval = std::time::Duration::from_secs(state.config.retention.sweep_interval_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            registry.prune_terminal(ttl);
        }
    });
}

pub async fn run(address: Option<SocketAddr>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = Config::load().map_err(|e| format!("Failed to load config: {}", e))?;
    let address = address.unwrap_or(config.server.bind_addr);

    let state = AppState::new(
        config,
        Arc::new(SystemClock),
        Arc::new(EchoInvoker::default()),
    );
    spawn_retention_sweeper(&state);

    let app = build_router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "modelgate API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate())
            .expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
