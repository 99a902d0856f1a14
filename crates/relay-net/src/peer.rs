//! Peer: a remote node as seen from here, plus the transport that reaches it.
//!
//! A peer owns at most one primary transport. When that transport is a
//! `TcpServer`, the peer also owns every client connection it has accepted;
//! sends fan out to all of them and receives return the first client with
//! data. For any other mode the primary transport carries the traffic.
//!
//! Counters and activity timestamps can be read without waiting on I/O.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use relay_core::wire::RECEIVE_BUFFER_SIZE;
use relay_core::RelayError;

use crate::transport::{SocketMode, Transport};

/// Point-in-time copy of a peer's traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Default)]
struct Counters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

#[derive(Default)]
struct PeerIo {
    transport: Option<Transport>,
    clients: Vec<Transport>,
    last_sent: Option<Instant>,
}

struct Activity {
    last_active: Instant,
    latency: Option<Duration>,
}

pub struct Peer {
    id: String,
    ip: String,
    port: u16,
    io: Mutex<PeerIo>,
    counters: Counters,
    connected: AtomicBool,
    client_count: AtomicUsize,
    activity: StdMutex<Activity>,
    metadata: StdMutex<Option<String>>,
    mode: OnceLock<SocketMode>,
    local: OnceLock<SocketAddr>,
    client_timeout: Option<Duration>,
}

impl Peer {
    /// A peer with no transport attached. Sends and receives fail until one is.
    pub fn new(id: impl Into<String>, ip: impl Into<String>, port: u16) -> Self {
        Self::from_parts(id.into(), ip.into(), port)
    }

    fn from_parts(id: String, ip: String, port: u16) -> Self {
        Self {
            id,
            ip,
            port,
            io: Mutex::new(PeerIo::default()),
            counters: Counters::default(),
            connected: AtomicBool::new(false),
            client_count: AtomicUsize::new(0),
            activity: StdMutex::new(Activity {
                last_active: Instant::now(),
                latency: None,
            }),
            metadata: StdMutex::new(None),
            mode: OnceLock::new(),
            local: OnceLock::new(),
            client_timeout: None,
        }
    }

    /// A peer that takes ownership of an already initialized transport.
    pub fn with_transport(
        id: impl Into<String>,
        ip: impl Into<String>,
        port: u16,
        transport: Transport,
    ) -> Self {
        let peer = Self::from_parts(id.into(), ip.into(), port);
        peer.adopt(&transport);
        Self {
            io: Mutex::new(PeerIo {
                transport: Some(transport),
                ..PeerIo::default()
            }),
            ..peer
        }
    }

    /// Receive timeout applied to each client this peer accepts.
    pub fn with_client_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.client_timeout = timeout;
        self
    }

    /// Bind a `TcpServer` transport on `ip:port` and start listening.
    pub async fn listen(
        id: impl Into<String>,
        ip: &str,
        port: u16,
        backlog: u32,
    ) -> Result<Self, RelayError> {
        let transport = Transport::new(SocketMode::TcpServer);
        transport.initialize(ip, port, is_ipv6(ip)).await?;
        transport.listen(backlog).await?;
        Ok(Self::with_transport(id, ip, port, transport))
    }

    /// Connect a `TcpClient` transport to `ip:port`.
    ///
    /// `timeout` bounds the connect and every later receive.
    pub async fn connect(
        id: impl Into<String>,
        ip: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<Self, RelayError> {
        let transport = Transport::new(SocketMode::TcpClient);
        transport.set_timeout(timeout).await;
        transport.initialize(ip, port, is_ipv6(ip)).await?;
        Ok(Self::with_transport(id, ip, port, transport))
    }

    /// Hand this peer its primary transport. A peer accepts one.
    pub async fn attach_transport(&self, transport: Transport) -> Result<(), RelayError> {
        let mut io = self.io.lock().await;
        if io.transport.is_some() {
            return Err(RelayError::InvalidArgument(format!(
                "peer {} already has a transport",
                self.id
            )));
        }
        self.adopt(&transport);
        io.transport = Some(transport);
        Ok(())
    }

    fn adopt(&self, transport: &Transport) {
        let _ = self.mode.set(transport.mode());
        if let Some(local) = transport.local_addr() {
            let _ = self.local.set(local);
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Mode of the attached transport, if any.
    pub fn mode(&self) -> Option<SocketMode> {
        self.mode.get().copied()
    }

    /// Bound address of the attached transport.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local.get().copied()
    }

    /// True once a send or receive has succeeded, until one observes a
    /// closed transport.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Number of accepted client connections, open or not.
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> PeerStats {
        PeerStats {
            messages_sent: self.counters.messages_sent.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Time between the most recent send and the receive that followed it.
    pub fn latency(&self) -> Option<Duration> {
        self.activity().latency
    }

    /// Instant the most recent successful send started.
    pub async fn last_sent(&self) -> Option<Instant> {
        self.io.lock().await.last_sent
    }

    pub fn last_active(&self) -> Instant {
        self.activity().last_active
    }

    /// How long since the last successful send, receive or keep-alive.
    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_active())
    }

    pub fn metadata(&self) -> Option<String> {
        self.metadata
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_metadata(&self, metadata: impl Into<String>) {
        *self.metadata.lock().unwrap_or_else(PoisonError::into_inner) = Some(metadata.into());
    }

    /// Mark the peer active without any traffic.
    pub fn keep_alive(&self) {
        self.activity().last_active = Instant::now();
    }

    fn activity(&self) -> MutexGuard<'_, Activity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send `message` as raw bytes.
    ///
    /// A server peer writes to every open accepted client and succeeds when
    /// at least one of them took the whole message. Counters record one
    /// message and the total bytes written.
    pub async fn send_message(&self, message: &str) -> bool {
        let mut io = self.io.lock().await;
        let Some(primary) = io.transport.as_ref() else {
            tracing::warn!(peer = %self.id, "send with no transport attached");
            return false;
        };
        if !primary.is_open() {
            self.connected.store(false, Ordering::Release);
            tracing::warn!(peer = %self.id, "send on a closed connection");
            return false;
        }

        let payload = message.as_bytes();
        let started = Instant::now();
        let written = if primary.mode() == SocketMode::TcpServer {
            let mut total = 0usize;
            let mut reached = 0usize;
            for client in io.clients.iter().filter(|c| c.is_open()) {
                let n = client.send(payload).await;
                if n == payload.len() && n > 0 {
                    reached += 1;
                }
                total += n;
            }
            if reached == 0 {
                tracing::warn!(peer = %self.id, clients = io.clients.len(), "no client took the message");
                return false;
            }
            total
        } else {
            let n = primary.send(payload).await;
            if n != payload.len() || n == 0 {
                if !primary.is_open() {
                    self.connected.store(false, Ordering::Release);
                }
                tracing::error!(peer = %self.id, sent = n, len = payload.len(), "send failed");
                return false;
            }
            n
        };

        io.last_sent = Some(started);
        drop(io);

        self.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_sent
            .fetch_add(written as u64, Ordering::Relaxed);
        self.connected.store(true, Ordering::Release);
        self.keep_alive();
        tracing::debug!(peer = %self.id, bytes = written, "message sent");
        true
    }

    /// Receive one message, decoded as UTF-8 (lossily).
    ///
    /// `None` on timeout, closed connection or missing transport. A server
    /// peer polls its open clients in accept order and returns the first
    /// non-empty read.
    pub async fn receive_message(&self) -> Option<String> {
        let io = self.io.lock().await;
        let (payload, still_open) = {
            let Some(primary) = io.transport.as_ref() else {
                tracing::warn!(peer = %self.id, "receive with no transport attached");
                return None;
            };
            if !primary.is_open() {
                self.connected.store(false, Ordering::Release);
                return None;
            }

            let payload = if primary.mode() == SocketMode::TcpServer {
                if io.clients.is_empty() {
                    tracing::trace!(peer = %self.id, "no clients to receive from");
                    return None;
                }
                let mut got = bytes::Bytes::new();
                for client in io.clients.iter().filter(|c| c.is_open()) {
                    got = client.receive(RECEIVE_BUFFER_SIZE).await;
                    if !got.is_empty() {
                        break;
                    }
                }
                got
            } else {
                primary.receive(RECEIVE_BUFFER_SIZE).await
            };
            (payload, primary.is_open())
        };

        if payload.is_empty() {
            if !still_open {
                self.connected.store(false, Ordering::Release);
                tracing::info!(peer = %self.id, "connection closed");
            }
            return None;
        }

        let now = Instant::now();
        let latency = io.last_sent.map(|sent| now.saturating_duration_since(sent));
        drop(io);

        self.counters
            .messages_received
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes_received
            .fetch_add(payload.len() as u64, Ordering::Relaxed);
        self.connected.store(true, Ordering::Release);
        {
            let mut activity = self.activity();
            activity.last_active = now;
            if latency.is_some() {
                activity.latency = latency;
            }
        }

        tracing::debug!(peer = %self.id, bytes = payload.len(), "message received");
        Some(String::from_utf8_lossy(&payload).into_owned())
    }

    /// Accept up to `max_clients` connections on a server peer.
    ///
    /// Stops early on the first timeout or accept failure. Returns how many
    /// were accepted this call; a failure before any accept is returned as
    /// the error.
    pub async fn accept_clients(&self, max_clients: usize) -> Result<usize, RelayError> {
        let mut io = self.io.lock().await;
        let Some(primary) = io.transport.as_ref() else {
            return Err(RelayError::NotInitialized);
        };
        if primary.mode() != SocketMode::TcpServer {
            return Err(RelayError::WrongMode {
                operation: "accept_clients",
                mode: primary.mode().as_str(),
            });
        }

        let mut accepted = Vec::new();
        while accepted.len() < max_clients {
            match primary.accept().await {
                Ok(client) => {
                    if self.client_timeout.is_some() {
                        client.set_timeout(self.client_timeout).await;
                    }
                    accepted.push(client);
                }
                Err(RelayError::Timeout | RelayError::WouldBlock) => break,
                Err(e) if accepted.is_empty() => return Err(e),
                Err(e) => {
                    tracing::error!(peer = %self.id, error = %e, "accept failed");
                    break;
                }
            }
        }

        let n = accepted.len();
        io.clients.extend(accepted);
        self.client_count.store(io.clients.len(), Ordering::Release);
        if n > 0 {
            tracing::info!(peer = %self.id, accepted = n, total = io.clients.len(), "accepted clients");
        }
        Ok(n)
    }

    /// Drop accepted clients whose connection has closed. Returns how many went.
    pub async fn prune_closed_clients(&self) -> usize {
        let mut io = self.io.lock().await;
        let before = io.clients.len();
        io.clients.retain(Transport::is_open);
        self.client_count.store(io.clients.len(), Ordering::Release);
        before - io.clients.len()
    }

    /// Apply a timeout to the primary transport (a server's accept wait).
    pub async fn set_transport_timeout(&self, timeout: Option<Duration>) {
        if let Some(transport) = self.io.lock().await.transport.as_ref() {
            transport.set_timeout(timeout).await;
        }
    }

    /// Close the primary transport. Accepted clients stay in the list but
    /// are no longer reached: sends and receives stop at the closed primary.
    pub async fn close_connection(&self) {
        let io = self.io.lock().await;
        if let Some(transport) = io.transport.as_ref() {
            transport.close().await;
            tracing::info!(peer = %self.id, "connection closed");
        }
        self.connected.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("mode", &self.mode())
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn is_ipv6(ip: &str) -> bool {
    ip.contains(':')
}

// ── Tests ─────────────────────────────────────────────────────────────────────
