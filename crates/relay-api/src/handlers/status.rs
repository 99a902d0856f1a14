//! /status, /errors and /daemon/shutdown handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use relay_core::ErrorEntry;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub peers: usize,
    pub peers_connected: usize,
    pub discovery_enabled: bool,
    pub discovery_running: bool,
    pub peers_discovered: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let peers = state.registry.list_peers();
    let peers_connected = peers.iter().filter(|p| p.is_connected()).count();

    let (discovery_running, peers_discovered) = match &state.discovery {
        Some(d) => (d.is_running(), d.discovered_peers().len()),
        None => (false, 0),
    };

    Json(StatusResponse {
        node_id: state.node_id.clone(),
        peers: peers.len(),
        peers_connected,
        discovery_enabled: state.discovery.is_some(),
        discovery_running,
        peers_discovered,
    })
}

// ── /errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorsResponse {
    pub errors: Vec<ErrorEntry>,
}

pub async fn handle_errors(State(state): State<ApiState>) -> Json<ErrorsResponse> {
    Json(ErrorsResponse {
        errors: state.recent_errors.snapshot(),
    })
}

// ── /daemon/shutdown ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");
    let _ = state.shutdown_tx.send(());

    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}
