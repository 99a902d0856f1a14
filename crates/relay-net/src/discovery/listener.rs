//! Discovery listener.
//!
//! Receives datagrams on the discovery socket. A request is answered with a
//! unicast DISCOVERY_RESPONSE to its source; a response records its source
//! as a discovered peer. Anything else is ignored.
//!
//! The socket carries a receive timeout, so the loop wakes regularly even
//! on a silent network.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;

use relay_core::wire::RECEIVE_BUFFER_SIZE;
use relay_core::DiscoveryMessage;

use super::DiscoveredPeers;
use crate::transport::Transport;

pub(crate) async fn listener_loop(
    transport: Arc<Transport>,
    peers: DiscoveredPeers,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!(local = ?transport.local_addr(), "discovery listener starting");

    loop {
        let received = tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("discovery listener shutting down");
                return;
            }
            r = transport.receive_from(RECEIVE_BUFFER_SIZE) => r,
        };

        match received {
            Some((payload, from)) => handle_datagram(&transport, &peers, &payload, from).await,
            None if !transport.is_open() => {
                tracing::warn!("discovery socket closed, listener exiting");
                return;
            }
            None => {}
        }
    }
}

async fn handle_datagram(
    transport: &Transport,
    peers: &DiscoveredPeers,
    payload: &[u8],
    from: SocketAddr,
) {
    match DiscoveryMessage::parse(payload) {
        Some(DiscoveryMessage::Request) => {
            let reply = DiscoveryMessage::Response.as_bytes();
            if transport.send_to(reply, from).await == 0 {
                tracing::warn!(to = %from, "discovery response not sent");
            } else {
                tracing::debug!(to = %from, "answered discovery request");
            }
        }
        Some(DiscoveryMessage::Response) => {
            record_response(peers, from);
        }
        None => {
            tracing::trace!(from = %from, len = payload.len(), "ignoring unrecognised datagram");
        }
    }
}

/// Record the source of a DISCOVERY_RESPONSE. Returns true if it was new.
pub(crate) fn record_response(peers: &DiscoveredPeers, from: SocketAddr) -> bool {
    let addr = relay_core::wire::peer_addr_string(&from);
    if peers.insert(addr.clone()) {
        tracing::info!(peer = %addr, "discovered new peer");
        true
    } else {
        tracing::trace!(peer = %addr, "peer already discovered");
        false
    }
}
