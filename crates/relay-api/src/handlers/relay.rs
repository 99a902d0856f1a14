//! /relay and /broadcast handlers: push messages through the registry.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{error_response, ApiState};

// ── /relay ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RelayRequest {
    pub source: String,
    pub target: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct RelayResponse {
    pub relayed: bool,
}

pub async fn handle_relay(
    State(state): State<ApiState>,
    Json(req): Json<RelayRequest>,
) -> Result<Json<RelayResponse>, (StatusCode, String)> {
    state
        .registry
        .relay_message(&req.source, &req.target, &req.message)
        .await
        .map_err(error_response)?;

    Ok(Json(RelayResponse { relayed: true }))
}

// ── /broadcast ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub delivered: usize,
    pub failed: usize,
}

pub async fn handle_broadcast(
    State(state): State<ApiState>,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>, (StatusCode, String)> {
    if req.message.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is empty".to_string()));
    }

    let report = state.registry.broadcast(&req.message).await;
    Ok(Json(BroadcastResponse {
        delivered: report.delivered,
        failed: report.failed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use relay_net::Peer;

    use crate::handlers::test_support;

    #[tokio::test]
    async fn relay_unknown_target_is_not_found() {
        let state = test_support::state();
        state
            .registry
            .add_peer(Arc::new(Peer::new("a", "10.0.0.1", 1)))
            .unwrap();

        let req = RelayRequest {
            source: "a".into(),
            target: "ghost".into(),
            message: "hi".into(),
        };
        let (status, body) = handle_relay(State(state), Json(req)).await.unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("ghost"));
    }

    #[tokio::test]
    async fn relay_delivers_tagged_message() {
        let server = Peer::listen("b", "127.0.0.1", 0, 5).await.unwrap();
        let port = server.local_addr().unwrap().port();
        server
            .set_transport_timeout(Some(Duration::from_secs(2)))
            .await;

        let state = test_support::state();
        let client = Peer::connect("b", "127.0.0.1", port, Some(Duration::from_secs(2)))
            .await
            .unwrap();
        state.registry.add_peer(Arc::new(client)).unwrap();
        state
            .registry
            .add_peer(Arc::new(Peer::new("a", "10.0.0.1", 1)))
            .unwrap();
        assert_eq!(server.accept_clients(1).await.unwrap(), 1);

        let req = RelayRequest {
            source: "a".into(),
            target: "b".into(),
            message: "hello".into(),
        };
        let Json(resp) = handle_relay(State(state), Json(req)).await.unwrap();
        assert!(resp.relayed);
        assert_eq!(
            server.receive_message().await.as_deref(),
            Some("[Relayed] hello")
        );
    }

    #[tokio::test]
    async fn empty_broadcast_is_rejected() {
        let req = BroadcastRequest {
            message: String::new(),
        };
        let (status, _) = handle_broadcast(State(test_support::state()), Json(req))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
