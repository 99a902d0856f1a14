//! Background loops run by the daemon. Each exits on the shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use relay_core::wire::relay_unwrap;
use relay_core::RelayError;
use relay_net::{Peer, PeerDiscovery, PeerManager};

/// How long one accept call waits before yielding the server lock.
pub const ACCEPT_WAIT: Duration = Duration::from_secs(1);

/// Back-off when the server has nothing to read.
const IDLE_POLL: Duration = Duration::from_millis(100);

const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Accept inbound connections on the local server peer, one at a time.
///
/// Exits when the server can no longer accept. Other accept failures
/// (descriptor exhaustion, for one) back off for `ACCEPT_WAIT`.
pub async fn accept_loop(server: Arc<Peer>, mut shutdown: broadcast::Receiver<()>) {
    tracing::info!(local = ?server.local_addr(), "accept loop starting");
    loop {
        let result = tokio::select! {
            _ = shutdown.recv() => return,
            r = server.accept_clients(1) => r,
        };
        match result {
            Ok(_) => {}
            Err(
                e @ (RelayError::Closed
                | RelayError::NotListening
                | RelayError::NotInitialized
                | RelayError::WrongMode { .. }),
            ) => {
                tracing::error!(error = %e, "accept loop stopped");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed, backing off");
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = time::sleep(ACCEPT_WAIT) => {}
                }
            }
        }
        // The local node stays registered while it accepts.
        server.keep_alive();
    }
}

/// Read messages arriving on accepted connections and log them.
pub async fn inbound_loop(server: Arc<Peer>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let received = tokio::select! {
            _ = shutdown.recv() => return,
            m = server.receive_message() => m,
        };

        match received {
            Some(message) => match relay_unwrap(&message) {
                Some(inner) => tracing::info!(message = %inner, "relayed message received"),
                None => tracing::info!(message = %message, "message received"),
            },
            None => {
                let pruned = server.prune_closed_clients().await;
                if pruned > 0 {
                    tracing::debug!(pruned, "dropped closed client connections");
                }
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = time::sleep(IDLE_POLL) => {}
                }
            }
        }
    }
}

/// Periodically drop peers idle for longer than `timeout`. A zero timeout
/// disables the sweep.
pub async fn sweep_loop(
    registry: PeerManager,
    timeout: Duration,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    if timeout.is_zero() {
        tracing::info!("inactivity sweep disabled");
        return;
    }
    let mut ticker = time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = ticker.tick() => {
                let removed = registry.remove_inactive_peers(timeout);
                if removed > 0 {
                    tracing::info!(removed, remaining = registry.len(), "inactive peers swept");
                }
            }
        }
    }
}

/// Dial newly discovered peers and add them to the registry.
pub async fn dial_loop(
    discovery: Arc<PeerDiscovery>,
    registry: PeerManager,
    dial_port: Option<u16>,
    dial_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(discovery.settings().interval);
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = ticker.tick() => {
                let added = discovery
                    .connect_discovered(&registry, dial_port, dial_timeout)
                    .await;
                if added > 0 {
                    tracing::info!(added, total = registry.len(), "connected to discovered peers");
                }
            }
        }
    }
}

/// Log a registry summary on a fixed interval.
pub async fn stats_loop(
    registry: PeerManager,
    discovery: Option<Arc<PeerDiscovery>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(STATS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = ticker.tick() => {
                let discovered = discovery.as_ref().map_or(0, |d| d.discovered_peers().len());
                tracing::info!(peers = registry.len(), discovered, "relay status");
                for peer in registry.list_peers() {
                    let stats = peer.stats();
                    tracing::debug!(
                        peer = %peer.id(),
                        connected = peer.is_connected(),
                        sent = stats.messages_sent,
                        received = stats.messages_received,
                        idle_secs = peer.idle_for().as_secs(),
                        "peer stats"
                    );
                }
            }
        }
    }
}
