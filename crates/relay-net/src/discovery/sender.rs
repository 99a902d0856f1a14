//! Discovery request sender.
//!
//! Multicasts DISCOVERY_REQUEST to the group on a fixed interval until told
//! to stop. The first request goes out immediately.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use relay_core::DiscoveryMessage;

use crate::transport::Transport;

pub(crate) async fn sender_loop(
    transport: Arc<Transport>,
    group: SocketAddr,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    tracing::info!(group = %group, interval_secs = interval.as_secs(), "discovery sender starting");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("discovery sender shutting down");
                return;
            }
            _ = ticker.tick() => {
                let payload = DiscoveryMessage::Request.as_bytes();
                match transport.send_to(payload, group).await {
                    0 => tracing::warn!(group = %group, "discovery request not sent"),
                    n => tracing::trace!(bytes = n, "discovery request sent"),
                }
            }
        }
    }
}
