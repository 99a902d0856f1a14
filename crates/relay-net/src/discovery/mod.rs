//! LAN peer discovery over UDP multicast.
//!
//! Every instance joins one multicast group on one port. A sender task
//! multicasts DISCOVERY_REQUEST on an interval; a listener task answers each
//! request with a unicast DISCOVERY_RESPONSE and records the source of each
//! response it receives. Discovered peers are kept as `"ip:port"` strings,
//! unique and in first-seen order, and never expire.
//!
//! Both tasks share the one socket. `stop` signals them, waits for both to
//! finish and leaves the socket open, so discovery can be started again.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use relay_core::config::DiscoveryConfig;
use relay_core::wire::{
    split_peer_addr, DEFAULT_DISCOVERY_PORT, DEFAULT_MULTICAST_ADDR, DISCOVERY_INTERVAL_SECS,
    DISCOVERY_RECV_TIMEOUT_SECS,
};
use relay_core::RelayError;

use crate::peer::Peer;
use crate::registry::PeerManager;
use crate::transport::{SocketMode, Transport};

mod listener;
mod sender;

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub multicast_ip: String,
    pub port: u16,
    /// Address the discovery socket binds to. The wildcard receives group
    /// traffic on every interface.
    pub local_ip: String,
    /// Interface used to join the group and send requests. `None` lets the
    /// OS choose.
    pub interface: Option<Ipv4Addr>,
    pub interval: Duration,
    pub receive_timeout: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            multicast_ip: DEFAULT_MULTICAST_ADDR.to_string(),
            port: DEFAULT_DISCOVERY_PORT,
            local_ip: "0.0.0.0".to_string(),
            interface: None,
            interval: Duration::from_secs(DISCOVERY_INTERVAL_SECS),
            receive_timeout: Duration::from_secs(DISCOVERY_RECV_TIMEOUT_SECS),
        }
    }
}

impl DiscoverySettings {
    pub fn new(multicast_ip: impl Into<String>, port: u16, local_ip: impl Into<String>) -> Self {
        Self {
            multicast_ip: multicast_ip.into(),
            port,
            local_ip: local_ip.into(),
            ..Self::default()
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, RelayError> {
        let interface = if config.interface.is_empty() {
            None
        } else {
            Some(
                config
                    .interface
                    .parse::<Ipv4Addr>()
                    .map_err(|_| RelayError::InvalidAddress(config.interface.clone()))?,
            )
        };
        Ok(Self {
            multicast_ip: config.multicast_ip.clone(),
            port: config.port,
            local_ip: config.local_ip.clone(),
            interface,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            receive_timeout: Duration::from_secs(config.receive_timeout_secs.max(1)),
        })
    }
}

// ── Discovered set ────────────────────────────────────────────────────────────

/// Discovered peer addresses, shared by the listener task and readers.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredPeers {
    inner: Arc<StdMutex<Vec<String>>>,
}

impl DiscoveredPeers {
    /// Append `addr` unless already present. Returns true if it was new.
    pub fn insert(&self, addr: String) -> bool {
        let mut peers = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if peers.iter().any(|known| *known == addr) {
            return false;
        }
        peers.push(addr);
        true
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|known| known == addr)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the list in first-seen order.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ── Discovery service ─────────────────────────────────────────────────────────

struct Running {
    shutdown: broadcast::Sender<()>,
    sender: JoinHandle<()>,
    listener: JoinHandle<()>,
}

pub struct PeerDiscovery {
    settings: DiscoverySettings,
    group: SocketAddr,
    transport: Arc<Transport>,
    peers: DiscoveredPeers,
    control: Mutex<Option<Running>>,
    running: AtomicBool,
}

impl PeerDiscovery {
    /// Bind the discovery socket and join the multicast group.
    ///
    /// Fails on an invalid group or interface address, or if the socket
    /// cannot be bound or joined.
    pub async fn new(settings: DiscoverySettings) -> Result<Self, RelayError> {
        let group_ip: IpAddr = settings
            .multicast_ip
            .parse()
            .map_err(|_| RelayError::InvalidAddress(settings.multicast_ip.clone()))?;
        if !group_ip.is_multicast() {
            return Err(RelayError::InvalidAddress(format!(
                "{group_ip} is not a multicast address"
            )));
        }

        let transport = Transport::new(SocketMode::Udp);
        transport.set_timeout(Some(settings.receive_timeout)).await;
        transport
            .initialize(&settings.local_ip, settings.port, group_ip.is_ipv6())
            .await?;
        transport
            .enable_multicast_on(&settings.multicast_ip, settings.port, settings.interface)
            .await?;

        Ok(Self {
            group: SocketAddr::new(group_ip, settings.port),
            settings,
            transport: Arc::new(transport),
            peers: DiscoveredPeers::default(),
            control: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &DiscoverySettings {
        &self.settings
    }

    /// Address the discovery socket is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn the sender and listener tasks. A second call while running is
    /// a no-op.
    pub async fn start(&self) {
        let mut control = self.control.lock().await;
        if control.is_some() {
            tracing::warn!("peer discovery is already running");
            return;
        }

        let (shutdown, _) = broadcast::channel(1);
        let sender = tokio::spawn(sender::sender_loop(
            self.transport.clone(),
            self.group,
            self.settings.interval,
            shutdown.subscribe(),
        ));
        let listener = tokio::spawn(listener::listener_loop(
            self.transport.clone(),
            self.peers.clone(),
            shutdown.subscribe(),
        ));

        *control = Some(Running {
            shutdown,
            sender,
            listener,
        });
        self.running.store(true, Ordering::Release);
        tracing::info!(group = %self.group, "peer discovery started");
    }

    /// Signal both tasks and wait for them to exit.
    ///
    /// Returns within roughly one receive timeout. Safe to call when not
    /// running.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        let Some(running) = control.take() else {
            return;
        };

        let _ = running.shutdown.send(());
        for (task, handle) in [("sender", running.sender), ("listener", running.listener)] {
            if let Err(e) = handle.await {
                tracing::error!(task, error = %e, "discovery task failed");
            }
        }

        self.running.store(false, Ordering::Release);
        tracing::info!("peer discovery stopped");
    }

    /// Discovered `"ip:port"` strings in first-seen order.
    pub fn discovered_peers(&self) -> Vec<String> {
        self.peers.snapshot()
    }

    /// Record `from` as a discovered peer, as if a DISCOVERY_RESPONSE had
    /// arrived from it. Returns true if it was new.
    pub fn handle_discovery_response(&self, from: SocketAddr) -> bool {
        listener::record_response(&self.peers, from)
    }

    pub async fn set_error_handler(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.transport.set_error_handler(handler).await;
    }

    /// Dial every discovered peer not yet in `registry` and register the
    /// ones that answer.
    ///
    /// Discovered addresses carry the discovery port; `dial_port` replaces
    /// it with the port peers accept TCP connections on. Peers are
    /// registered under `"ip:port"` of the dialed address. Returns how
    /// many were added.
    pub async fn connect_discovered(
        &self,
        registry: &PeerManager,
        dial_port: Option<u16>,
        timeout: Duration,
    ) -> usize {
        let mut reached = Vec::new();
        for addr in self.discovered_peers() {
            let Some((ip, port)) = split_peer_addr(&addr) else {
                continue;
            };
            let port = dial_port.unwrap_or(port);
            let id = format!("{ip}:{port}");
            if registry.contains(&id) {
                continue;
            }
            match Peer::connect(id.as_str(), ip, port, Some(timeout)).await {
                Ok(peer) => reached.push(Arc::new(peer)),
                Err(e) => tracing::debug!(peer = %id, error = %e, "discovered peer unreachable"),
            }
        }
        registry.add_discovered_peers(reached)
    }
}

impl Drop for PeerDiscovery {
    fn drop(&mut self) {
        if let Some(running) = self.control.get_mut().take() {
            running.sender.abort();
            running.listener.abort();
        }
    }
}

impl std::fmt::Debug for PeerDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerDiscovery")
            .field("group", &self.group)
            .field("local", &self.local_addr())
            .field("running", &self.is_running())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
