//! /peers and /discovered handlers: registry inspection and management.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use relay_net::Peer;

use super::{error_response, ApiState};

// ── /peers (GET) ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Serialize)]
pub struct PeerInfo {
    pub id: String,
    pub addr: String,
    pub mode: Option<String>,
    pub connected: bool,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub latency_ms: Option<u64>,
    pub idle_secs: u64,
    pub clients: usize,
    pub metadata: Option<String>,
}

impl From<&Peer> for PeerInfo {
    fn from(p: &Peer) -> Self {
        let stats = p.stats();
        Self {
            id: p.id().to_string(),
            addr: format!("{}:{}", p.ip(), p.port()),
            mode: p.mode().map(|m| m.to_string()),
            connected: p.is_connected(),
            messages_sent: stats.messages_sent,
            messages_received: stats.messages_received,
            bytes_sent: stats.bytes_sent,
            bytes_received: stats.bytes_received,
            latency_ms: p.latency().map(|d| d.as_millis() as u64),
            idle_secs: p.idle_for().as_secs(),
            clients: p.client_count(),
            metadata: p.metadata(),
        }
    }
}

pub async fn handle_peers(State(state): State<ApiState>) -> Json<PeersResponse> {
    let mut peers: Vec<PeerInfo> = state
        .registry
        .list_peers()
        .iter()
        .map(|p| PeerInfo::from(p.as_ref()))
        .collect();
    peers.sort_by(|a, b| a.id.cmp(&b.id));

    Json(PeersResponse { peers })
}

// ── /peers (POST) ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PeerAddRequest {
    pub id: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub metadata: Option<String>,
}

/// Dial `ip:port` as a TCP client and register the connection under `id`.
pub async fn handle_peer_add(
    State(state): State<ApiState>,
    Json(req): Json<PeerAddRequest>,
) -> Result<(StatusCode, Json<PeerInfo>), (StatusCode, String)> {
    if state.registry.contains(&req.id) {
        return Err((
            StatusCode::CONFLICT,
            format!("peer with id {} already exists", req.id),
        ));
    }

    let peer = Peer::connect(req.id.as_str(), &req.ip, req.port, Some(state.dial_timeout))
        .await
        .map_err(error_response)?;
    if let Some(metadata) = req.metadata {
        peer.set_metadata(metadata);
    }

    let peer = Arc::new(peer);
    state
        .registry
        .add_peer(peer.clone())
        .map_err(error_response)?;
    tracing::info!(peer = %req.id, ip = %req.ip, port = req.port, "peer added via API");

    Ok((StatusCode::CREATED, Json(PeerInfo::from(peer.as_ref()))))
}

// ── /peers/{id} (DELETE) ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct PeerRemoveResponse {
    pub id: String,
    pub removed: bool,
}

pub async fn handle_peer_remove(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<PeerRemoveResponse>, (StatusCode, String)> {
    if id == state.node_id {
        return Err((
            StatusCode::BAD_REQUEST,
            "cannot remove the local node".to_string(),
        ));
    }

    let peer = state.registry.get_peer(&id);
    let removed = state.registry.remove_peer(&id);
    if let Some(peer) = peer {
        peer.close_connection().await;
    }

    Ok(Json(PeerRemoveResponse { id, removed }))
}

// ── /discovered ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct DiscoveredResponse {
    pub running: bool,
    pub peers: Vec<String>,
}

pub async fn handle_discovered(State(state): State<ApiState>) -> Json<DiscoveredResponse> {
    let (running, peers) = match &state.discovery {
        Some(d) => (d.is_running(), d.discovered_peers()),
        None => (false, Vec::new()),
    };
    Json(DiscoveredResponse { running, peers })
}
