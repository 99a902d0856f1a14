//! Relay integration test harness.
//!
//! Tests run against real loopback sockets inside one process; nothing
//! needs root. Multicast tests join the discovery group on 127.0.0.1 and
//! print SKIP when the host refuses the join.
//!
//! Each discovery test binds its own fixed port so tests can run in
//! parallel without hearing each other.

mod discovery;
mod relay;
mod transport;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use relay_core::wire::DEFAULT_MULTICAST_ADDR;
use relay_net::{DiscoverySettings, Peer, PeerDiscovery};

// ── Harness ───────────────────────────────────────────────────────────────────

/// Receive and connect timeout used by every test peer.
pub const IO_TIMEOUT: Duration = Duration::from_secs(2);

/// A listening server peer on an ephemeral loopback port.
pub async fn server_peer(id: &str) -> Result<(Arc<Peer>, u16)> {
    let server = Peer::listen(id, "127.0.0.1", 0, 5)
        .await
        .with_context(|| format!("failed to start server peer {id}"))?
        .with_client_timeout(Some(IO_TIMEOUT));
    server.set_transport_timeout(Some(IO_TIMEOUT)).await;
    let port = server
        .local_addr()
        .context("server peer has no local address")?
        .port();
    Ok((Arc::new(server), port))
}

/// A client peer connected to `127.0.0.1:port`.
pub async fn client_peer(id: &str, port: u16) -> Result<Arc<Peer>> {
    let client = Peer::connect(id, "127.0.0.1", port, Some(IO_TIMEOUT))
        .await
        .with_context(|| format!("failed to connect client peer {id} to port {port}"))?;
    Ok(Arc::new(client))
}

/// A server peer with one accepted client, and that client.
pub async fn connected_pair(server_id: &str, client_id: &str) -> Result<(Arc<Peer>, Arc<Peer>)> {
    let (server, port) = server_peer(server_id).await?;
    let client = client_peer(client_id, port).await?;
    let accepted = server.accept_clients(1).await?;
    anyhow::ensure!(accepted == 1, "server accepted {accepted} clients, expected 1");
    Ok((server, client))
}

/// Discovery on `port`, joined through the loopback interface.
/// Returns `None` (and prints SKIP) if multicast is unavailable.
pub async fn discovery_on(port: u16) -> Option<PeerDiscovery> {
    let settings = DiscoverySettings {
        interface: Some(std::net::Ipv4Addr::LOCALHOST),
        interval: Duration::from_millis(200),
        receive_timeout: Duration::from_millis(200),
        ..DiscoverySettings::new(DEFAULT_MULTICAST_ADDR, port, "0.0.0.0")
    };
    match PeerDiscovery::new(settings).await {
        Ok(d) => Some(d),
        Err(e) => {
            eprintln!("SKIP: multicast unavailable on loopback: {e}");
            None
        }
    }
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
