// ABOUTME: HTTP server exposing health status and Prometheus metrics
// ABOUTME: GET /health reports sync clients and pollers; GET /metrics renders the recorder

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use relaybot_core::{PollingScheduler, SyncClient};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct ServerState {
    pub clients: Vec<Arc<SyncClient>>,
    pub scheduler: PollingScheduler,
}

#[derive(Debug, Serialize)]
pub struct ClientHealth {
    pub user_id: String,
    pub running: bool,
    pub generation: u64,
    pub rooms: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub clients: Vec<ClientHealth>,
    pub active_pollers: usize,
}

pub fn router(state: ServerState, metrics_handle: PrometheusHandle) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health_handler))
        .with_state(Arc::new(state));

    // Metrics endpoint - renders Prometheus text format
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(metrics_handle));

    Router::new()
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
}

pub async fn serve(addr: &str, state: ServerState, metrics_handle: PrometheusHandle) -> Result<()> {
    let app = router(state, metrics_handle);
    tracing::info!(addr = %addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    let clients: Vec<ClientHealth> = state
        .clients
        .iter()
        .map(|client| ClientHealth {
            user_id: client.user_id().to_string(),
            running: client.is_running(),
            generation: client.generation(),
            rooms: client.room_ids().len(),
        })
        .collect();

    // Degraded when any configured client has no live sync loop.
    let status = if clients.iter().all(|c| c.running) {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        clients,
        active_pollers: state.scheduler.active_count(),
    })
}

async fn metrics_handler(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
