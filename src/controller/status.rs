//! Health and status HTTP surface.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::controller::{Controller, ControllerStatus};
use crate::lifecycle::StopSignal;
use crate::process::WorkerState;

pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .with_state(controller)
        .layer(TraceLayer::new_for_http())
}

/// 200 while serving; 503 once shutdown began or the worker is down.
async fn healthz(State(controller): State<Arc<Controller>>) -> (StatusCode, &'static str) {
    if controller.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down");
    }
    match controller.supervisor().state() {
        WorkerState::Running => (StatusCode::OK, "ok"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "worker not running"),
    }
}

async fn status(State(controller): State<Arc<Controller>>) -> Json<ControllerStatus> {
    Json(controller.status())
}

/// Serve until `stop` fires.
pub async fn serve(listener: TcpListener, controller: Arc<Controller>, mut stop: StopSignal) {
    let addr = listener.local_addr().ok();
    tracing::info!(address = ?addr, "Status server starting");

    let result = axum::serve(listener, router(controller))
        .with_graceful_shutdown(async move { stop.wait().await })
        .await;

    match result {
        Ok(()) => tracing::info!("Status server stopped"),
        Err(e) => tracing::error!(error = %e, "Status server failed"),
    }
}
