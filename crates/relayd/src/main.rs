//! relayd: relay node daemon.
//!
//! Runs one TCP server peer registered under the node id, optional LAN
//! discovery that dials the peers it finds, an inactivity sweep and the
//! local control API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use relay_core::config::RelayConfig;
use relay_core::RecentErrors;
use relay_net::{DiscoverySettings, Peer, PeerDiscovery, PeerManager};

mod logging;
mod tasks;

#[tokio::main]
async fn main() -> Result<()> {
    // Config comes first: it decides the log level and file.
    let written = RelayConfig::write_default_if_missing();
    let (config, load_error) = match RelayConfig::load() {
        Ok(config) => (config, None),
        Err(e) => {
            let mut config = RelayConfig::default();
            config.apply_env_overrides(|key| std::env::var(key).ok());
            (config, Some(e))
        }
    };

    let recent_errors = RecentErrors::new(config.logging.recent_errors);
    logging::init(&config.logging, recent_errors.clone())?;

    if let Err(e) = written {
        tracing::warn!(error = %e, "failed to write default config");
    }
    if let Some(e) = load_error {
        tracing::warn!(error = %e, "failed to load config, using defaults");
    }

    let node = &config.node;
    tracing::info!(
        node = %node.id,
        listen = %format!("{}:{}", node.listen_ip, node.listen_port),
        discovery = config.discovery.enabled,
        "relayd starting"
    );

    // ── Local server peer ────────────────────────────────────────────────────

    let client_timeout = (node.client_timeout_secs > 0)
        .then(|| Duration::from_secs(node.client_timeout_secs));
    let server = Peer::listen(
        node.id.as_str(),
        &node.listen_ip,
        node.listen_port,
        node.backlog,
    )
    .await
    .with_context(|| format!("failed to listen on {}:{}", node.listen_ip, node.listen_port))?
    .with_client_timeout(client_timeout);
    server.set_transport_timeout(Some(tasks::ACCEPT_WAIT)).await;
    let server = Arc::new(server);

    let registry = PeerManager::new();
    registry
        .add_peer(server.clone())
        .context("failed to register local node")?;

    // ── Discovery ────────────────────────────────────────────────────────────

    let discovery = if config.discovery.enabled {
        let settings = DiscoverySettings::from_config(&config.discovery)
            .context("invalid discovery config")?;
        match PeerDiscovery::new(settings).await {
            Ok(d) => {
                let d = Arc::new(d);
                d.start().await;
                Some(d)
            }
            Err(e) => {
                tracing::error!(error = %e, "peer discovery unavailable");
                None
            }
        }
    } else {
        None
    };

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let dial_timeout = client_timeout.unwrap_or(tasks::ACCEPT_WAIT);

    let accept_task = tokio::spawn(tasks::accept_loop(server.clone(), shutdown_tx.subscribe()));
    let inbound_task = tokio::spawn(tasks::inbound_loop(server.clone(), shutdown_tx.subscribe()));
    let sweep_task = tokio::spawn(tasks::sweep_loop(
        registry.clone(),
        Duration::from_secs(config.registry.inactivity_timeout_secs),
        Duration::from_secs(config.registry.sweep_interval_secs.max(1)),
        shutdown_tx.subscribe(),
    ));
    let stats_printer = tokio::spawn(tasks::stats_loop(
        registry.clone(),
        discovery.clone(),
        shutdown_tx.subscribe(),
    ));

    if let Some(discovery) = &discovery {
        // Discovered addresses carry the discovery port; dial the TCP port.
        let dial_port = match config.discovery.dial_port {
            0 => node.listen_port,
            port => port,
        };
        tokio::spawn(tasks::dial_loop(
            discovery.clone(),
            registry.clone(),
            Some(dial_port),
            dial_timeout,
            shutdown_tx.subscribe(),
        ));
    }

    {
        let state = relay_api::ApiState {
            node_id: node.id.clone(),
            registry: registry.clone(),
            discovery: discovery.clone(),
            recent_errors: recent_errors.clone(),
            dial_timeout,
            shutdown_tx: shutdown_tx.clone(),
        };
        let api_port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = relay_api::serve(state, api_port).await {
                tracing::error!(error = %e, "API server failed");
            }
        });
    }

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv() => tracing::info!("shutting down"),
        r = accept_task        => tracing::error!("accept loop exited: {:?}", r),
        r = inbound_task       => tracing::error!("inbound loop exited: {:?}", r),
        r = sweep_task         => tracing::error!("sweep loop exited: {:?}", r),
        r = stats_printer      => tracing::error!("stats printer exited: {:?}", r),
    }
    let _ = shutdown_tx.send(());

    if let Some(discovery) = &discovery {
        discovery.stop().await;
    }
    for peer in registry.list_peers() {
        peer.close_connection().await;
    }
    tracing::info!("relayd stopped");
    Ok(())
}
