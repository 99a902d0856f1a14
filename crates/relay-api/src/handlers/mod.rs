//! HTTP API handlers: exposes the node's peers, discovery and relay as JSON.

pub mod peers;
pub mod relay;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;

use relay_core::{RecentErrors, RelayError};
use relay_net::{PeerDiscovery, PeerManager};

#[derive(Clone)]
pub struct ApiState {
    /// Id the local server peer is registered under.
    pub node_id: String,
    pub registry: PeerManager,
    /// `None` when discovery is disabled in config.
    pub discovery: Option<Arc<PeerDiscovery>>,
    pub recent_errors: RecentErrors,
    /// Connect and receive timeout for peers dialed through the API.
    pub dial_timeout: Duration,
    /// Shutdown broadcast sender: signals graceful daemon shutdown.
    pub shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Map a relay error onto an HTTP status and message.
fn error_response(err: RelayError) -> (StatusCode, String) {
    let status = match &err {
        RelayError::PeerNotFound(_) => StatusCode::NOT_FOUND,
        RelayError::DuplicatePeer(_) => StatusCode::CONFLICT,
        RelayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        RelayError::DeliveryFailed(_) | RelayError::Io { .. } => StatusCode::BAD_GATEWAY,
        e if e.is_configuration() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

// Re-export handler functions for use in router setup.
pub use peers::{handle_discovered, handle_peer_add, handle_peer_remove, handle_peers};
pub use relay::{handle_broadcast, handle_relay};
pub use status::{handle_errors, handle_shutdown, handle_status};
