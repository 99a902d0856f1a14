//! Transport: one socket, fixed to one of three modes at construction.
//!
//! A `TcpServer` binds and accepts, a `TcpClient` connects and streams,
//! a `Udp` transport sends and receives datagrams and may join a multicast
//! group. Sockets are built with socket2 (address reuse, non-blocking) and
//! then handed to tokio.
//!
//! All state that I/O touches sits behind one async lock, so concurrent
//! callers on the same transport are serialized. `is_open`, `mode`,
//! `local_addr` and `peer_addr` never wait on that lock.
//!
//! Data-path failures are not errors in the `Result` sense: `send` returns
//! 0 and `receive` returns empty bytes, and the failure is logged and handed
//! to the optional error handler. Timeouts and would-block are quiet.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Mutex;

use relay_core::RelayError;

// ── Mode ──────────────────────────────────────────────────────────────────────

/// What a transport was built to do. Never changes after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketMode {
    TcpServer,
    TcpClient,
    Udp,
}

impl SocketMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            SocketMode::TcpServer => "TCP_SERVER",
            SocketMode::TcpClient => "TCP_CLIENT",
            SocketMode::Udp => "UDP",
        }
    }
}

impl fmt::Display for SocketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback invoked with a human-readable description of each I/O failure.
pub type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

// ── State ─────────────────────────────────────────────────────────────────────

enum Handle {
    /// Constructed, nothing bound yet.
    Unbound,
    /// TCP server that is bound but not yet listening.
    Bound(Socket),
    Listener(TcpListener),
    Stream(TcpStream),
    Datagram(UdpSocket),
    Closed,
}

impl Handle {
    fn sock_ref(&self) -> Option<SockRef<'_>> {
        match self {
            Handle::Bound(s) => Some(SockRef::from(s)),
            Handle::Listener(l) => Some(SockRef::from(l)),
            Handle::Stream(s) => Some(SockRef::from(s)),
            Handle::Datagram(u) => Some(SockRef::from(u)),
            Handle::Unbound | Handle::Closed => None,
        }
    }
}

struct State {
    handle: Handle,
    timeout: Option<Duration>,
    nonblocking: bool,
    error_handler: Option<ErrorHandler>,
}

impl State {
    fn new(handle: Handle) -> Self {
        Self {
            handle,
            timeout: None,
            nonblocking: false,
            error_handler: None,
        }
    }

    fn report(&self, mode: SocketMode, message: &str) {
        tracing::error!(mode = %mode, "{message}");
        if let Some(handler) = &self.error_handler {
            handler(message);
        }
    }

    /// True if the handle can carry stream or datagram traffic. Reports
    /// misuse; a closed handle fails quietly.
    fn connected_io(&self, mode: SocketMode, operation: &str) -> bool {
        match self.handle {
            Handle::Stream(_) | Handle::Datagram(_) => true,
            Handle::Closed => false,
            _ => {
                self.report(mode, &format!("{operation}() needs a connected socket"));
                false
            }
        }
    }

    /// Log and forward a setup failure, then hand the error back.
    fn fail(&self, mode: SocketMode, err: RelayError) -> RelayError {
        self.report(mode, &err.to_string());
        err
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

pub struct Transport {
    mode: SocketMode,
    state: Mutex<State>,
    open: AtomicBool,
    local: OnceLock<SocketAddr>,
    remote: OnceLock<SocketAddr>,
}

impl Transport {
    /// A transport in the given mode with no socket yet.
    pub fn new(mode: SocketMode) -> Self {
        Self {
            mode,
            state: Mutex::new(State::new(Handle::Unbound)),
            open: AtomicBool::new(false),
            local: OnceLock::new(),
            remote: OnceLock::new(),
        }
    }

    /// Wrap a stream produced by `accept`.
    fn from_stream(stream: TcpStream, remote: SocketAddr) -> Self {
        let transport = Self {
            mode: SocketMode::TcpClient,
            state: Mutex::new(State::new(Handle::Stream(stream))),
            open: AtomicBool::new(true),
            local: OnceLock::new(),
            remote: OnceLock::new(),
        };
        let _ = transport.remote.set(remote);
        transport
    }

    pub fn mode(&self) -> SocketMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Address the socket is bound to, once initialized.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local.get().copied()
    }

    /// Remote end of a connected stream.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.remote.get().copied()
    }

    pub async fn set_error_handler(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.state.lock().await.error_handler = Some(Arc::new(handler));
    }

    /// Bound every later blocking operation (connect included) by `timeout`.
    /// `None` restores unbounded waits.
    pub async fn set_timeout(&self, timeout: Option<Duration>) {
        self.state.lock().await.timeout = timeout;
    }

    /// In non-blocking mode every I/O call polls once and reports
    /// would-block instead of waiting.
    pub async fn set_nonblocking(&self, nonblocking: bool) {
        self.state.lock().await.nonblocking = nonblocking;
    }

    /// Bind (server, UDP) or connect (client) to `ip:port`.
    ///
    /// `ipv6` selects the address family `ip` is parsed in. A transport can
    /// be initialized once; a closed transport cannot be reused.
    pub async fn initialize(&self, ip: &str, port: u16, ipv6: bool) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        match state.handle {
            Handle::Unbound => {}
            Handle::Closed => return Err(RelayError::Closed),
            _ => return Err(RelayError::AlreadyInitialized),
        }

        let addr = parse_socket_addr(ip, port, ipv6).map_err(|e| state.fail(self.mode, e))?;

        let handle = match self.mode {
            SocketMode::TcpServer => {
                let socket = bind_socket(addr, Type::STREAM, Protocol::TCP)
                    .map_err(|e| state.fail(self.mode, RelayError::io(format!("bind {addr}"), e)))?;
                Handle::Bound(socket)
            }
            SocketMode::Udp => {
                let socket = bind_socket(addr, Type::DGRAM, Protocol::UDP)
                    .and_then(|s| UdpSocket::from_std(s.into()))
                    .map_err(|e| state.fail(self.mode, RelayError::io(format!("bind {addr}"), e)))?;
                Handle::Datagram(socket)
            }
            SocketMode::TcpClient => {
                let stream = wait_io(state.timeout, false, TcpStream::connect(addr))
                    .await
                    .map_err(|e| {
                        state.fail(self.mode, RelayError::io(format!("connect {addr}"), e))
                    })?;
                let _ = stream.set_nodelay(true);
                let _ = self.remote.set(addr);
                Handle::Stream(stream)
            }
        };

        if let Some(local) = handle.sock_ref().and_then(|s| s.local_addr().ok()?.as_socket()) {
            let _ = self.local.set(local);
        }
        state.handle = handle;
        self.open.store(true, Ordering::Release);

        tracing::info!(
            mode = %self.mode,
            addr = %addr,
            local = ?self.local_addr(),
            "transport initialized"
        );
        Ok(())
    }

    /// Join the multicast group `group` on the default interface.
    pub async fn enable_multicast(&self, group: &str, port: u16) -> Result<(), RelayError> {
        self.enable_multicast_on(group, port, None).await
    }

    /// Join `group`, optionally pinning the outgoing and joining interface.
    ///
    /// Loopback stays enabled so instances on one host hear each other.
    /// IPv4 hop limit is 1: discovery never leaves the local segment.
    pub async fn enable_multicast_on(
        &self,
        group: &str,
        port: u16,
        interface: Option<Ipv4Addr>,
    ) -> Result<(), RelayError> {
        if self.mode != SocketMode::Udp {
            return Err(RelayError::WrongMode {
                operation: "enable_multicast",
                mode: self.mode.as_str(),
            });
        }

        let state = self.state.lock().await;
        let socket = match &state.handle {
            Handle::Datagram(s) => s,
            Handle::Closed => return Err(RelayError::Closed),
            _ => return Err(RelayError::NotInitialized),
        };

        let group_ip: IpAddr = group
            .parse()
            .map_err(|_| state.fail(self.mode, RelayError::InvalidAddress(group.to_string())))?;
        if !group_ip.is_multicast() {
            return Err(state.fail(
                self.mode,
                RelayError::InvalidAddress(format!("{group} is not a multicast address")),
            ));
        }

        let joined = match group_ip {
            IpAddr::V4(g) => {
                let iface = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
                socket
                    .join_multicast_v4(g, iface)
                    .and_then(|_| socket.set_multicast_loop_v4(true))
                    .and_then(|_| socket.set_multicast_ttl_v4(1))
                    .and_then(|_| {
                        if iface.is_unspecified() {
                            Ok(())
                        } else {
                            SockRef::from(socket).set_multicast_if_v4(&iface)
                        }
                    })
            }
            IpAddr::V6(g) => socket
                .join_multicast_v6(&g, 0)
                .and_then(|_| socket.set_multicast_loop_v6(true)),
        };
        joined.map_err(|e| {
            state.fail(self.mode, RelayError::io(format!("join multicast group {group}"), e))
        })?;

        tracing::info!(group = %group_ip, port, interface = ?interface, "joined multicast group");
        Ok(())
    }

    /// Start accepting connections. Calling it again while listening is a no-op.
    pub async fn listen(&self, backlog: u32) -> Result<(), RelayError> {
        if self.mode != SocketMode::TcpServer {
            return Err(RelayError::WrongMode {
                operation: "listen",
                mode: self.mode.as_str(),
            });
        }

        let mut state = self.state.lock().await;
        let socket = match std::mem::replace(&mut state.handle, Handle::Unbound) {
            Handle::Bound(socket) => socket,
            other => {
                let err = match &other {
                    Handle::Listener(_) => None,
                    Handle::Closed => Some(RelayError::Closed),
                    _ => Some(RelayError::NotInitialized),
                };
                state.handle = other;
                return err.map_or(Ok(()), Err);
            }
        };

        let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
        if let Err(e) = socket.listen(backlog) {
            state.handle = Handle::Bound(socket);
            return Err(state.fail(self.mode, RelayError::io("listen", e)));
        }
        match TcpListener::from_std(socket.into()) {
            Ok(listener) => state.handle = Handle::Listener(listener),
            Err(e) => {
                state.handle = Handle::Closed;
                self.open.store(false, Ordering::Release);
                return Err(state.fail(self.mode, RelayError::io("listen", e)));
            }
        }

        tracing::info!(local = ?self.local_addr(), backlog, "listening for connections");
        Ok(())
    }

    /// Wait for one inbound connection and return it as a connected transport.
    ///
    /// Bounded by the configured timeout; with none set this waits until a
    /// client arrives.
    pub async fn accept(&self) -> Result<Transport, RelayError> {
        if self.mode != SocketMode::TcpServer {
            return Err(RelayError::WrongMode {
                operation: "accept",
                mode: self.mode.as_str(),
            });
        }

        let state = self.state.lock().await;
        let listener = match &state.handle {
            Handle::Listener(l) => l,
            Handle::Bound(_) => return Err(RelayError::NotListening),
            Handle::Closed => return Err(RelayError::Closed),
            _ => return Err(RelayError::NotInitialized),
        };

        match wait_io(state.timeout, state.nonblocking, listener.accept()).await {
            Ok((stream, remote)) => {
                let _ = stream.set_nodelay(true);
                let local = stream.local_addr().ok();
                let client = Transport::from_stream(stream, remote);
                if let Some(local) = local {
                    let _ = client.local.set(local);
                }
                tracing::info!(remote = %remote, "accepted connection");
                Ok(client)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(RelayError::Timeout),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(RelayError::WouldBlock),
            Err(e) => Err(state.fail(self.mode, RelayError::io("accept", e))),
        }
    }

    /// Write all of `data` to a connected stream, or one datagram to the
    /// connected UDP destination. Returns the bytes written, 0 on failure.
    pub async fn send(&self, data: &[u8]) -> usize {
        if !self.is_open() {
            return 0;
        }

        let mut state = self.state.lock().await;
        if !state.connected_io(self.mode, "send") {
            return 0;
        }
        let (timeout, nonblocking) = (state.timeout, state.nonblocking);
        let result = match &mut state.handle {
            Handle::Stream(s) => {
                wait_io(timeout, nonblocking, async move {
                    s.write_all(data).await.map(|_| data.len())
                })
                .await
            }
            Handle::Datagram(u) => wait_io(timeout, nonblocking, u.send(data)).await,
            _ => return 0,
        };

        match result {
            Ok(n) => {
                tracing::trace!(bytes = n, "sent");
                n
            }
            Err(e) if is_quiet(e.kind()) => {
                tracing::debug!(error = %e, "send did not complete");
                0
            }
            Err(e) => {
                state.report(self.mode, &format!("send failed: {e}"));
                if is_disconnect(e.kind()) {
                    self.close_locked(&mut state);
                }
                0
            }
        }
    }

    /// Send one datagram to `dest`. UDP only.
    pub async fn send_to(&self, data: &[u8], dest: SocketAddr) -> usize {
        if !self.is_open() {
            return 0;
        }

        let state = self.state.lock().await;
        let socket = match &state.handle {
            Handle::Datagram(u) => u,
            Handle::Closed => return 0,
            _ => {
                state.report(self.mode, "send_to() is only supported in UDP mode");
                return 0;
            }
        };

        match wait_io(state.timeout, state.nonblocking, socket.send_to(data, dest)).await {
            Ok(n) => {
                tracing::trace!(bytes = n, dest = %dest, "datagram sent");
                n
            }
            Err(e) if is_quiet(e.kind()) => 0,
            Err(e) => {
                state.report(self.mode, &format!("send_to {dest} failed: {e}"));
                0
            }
        }
    }

    /// Read up to `max` bytes. Empty on timeout, would-block, error or EOF.
    ///
    /// EOF on a stream means the remote closed it; the transport is closed
    /// in turn.
    pub async fn receive(&self, max: usize) -> Bytes {
        if !self.is_open() {
            return Bytes::new();
        }

        let mut state = self.state.lock().await;
        if !state.connected_io(self.mode, "receive") {
            return Bytes::new();
        }
        let (timeout, nonblocking) = (state.timeout, state.nonblocking);
        let is_stream = matches!(state.handle, Handle::Stream(_));
        let mut buf = vec![0u8; max];
        let result = match &mut state.handle {
            Handle::Stream(s) => wait_io(timeout, nonblocking, s.read(&mut buf)).await,
            Handle::Datagram(u) => wait_io(timeout, nonblocking, u.recv(&mut buf)).await,
            _ => return Bytes::new(),
        };

        match result {
            Ok(0) if is_stream && max > 0 => {
                tracing::warn!(remote = ?self.peer_addr(), "connection closed by remote");
                self.close_locked(&mut state);
                Bytes::new()
            }
            Ok(n) => {
                buf.truncate(n);
                tracing::trace!(bytes = n, "received");
                Bytes::from(buf)
            }
            Err(e) if is_quiet(e.kind()) => {
                tracing::trace!(error = %e, "nothing received");
                Bytes::new()
            }
            Err(e) => {
                state.report(self.mode, &format!("receive failed: {e}"));
                if is_stream && is_disconnect(e.kind()) {
                    self.close_locked(&mut state);
                }
                Bytes::new()
            }
        }
    }

    /// Receive one datagram and its source. UDP only.
    pub async fn receive_from(&self, max: usize) -> Option<(Bytes, SocketAddr)> {
        if !self.is_open() {
            return None;
        }

        let state = self.state.lock().await;
        let socket = match &state.handle {
            Handle::Datagram(u) => u,
            Handle::Closed => return None,
            _ => {
                state.report(self.mode, "receive_from() is only supported in UDP mode");
                return None;
            }
        };

        let mut buf = vec![0u8; max];
        match wait_io(state.timeout, state.nonblocking, socket.recv_from(&mut buf)).await {
            Ok((n, from)) => {
                buf.truncate(n);
                Some((Bytes::from(buf), from))
            }
            Err(e) if is_quiet(e.kind()) => {
                tracing::trace!(error = %e, "no datagram received");
                None
            }
            Err(e) => {
                state.report(self.mode, &format!("receive_from failed: {e}"));
                None
            }
        }
    }

    /// Half- or fully shut down the connection without releasing the socket.
    pub async fn shutdown(&self, read: bool, write: bool) {
        let how = match (read, write) {
            (true, true) => Shutdown::Both,
            (true, false) => Shutdown::Read,
            (false, true) => Shutdown::Write,
            (false, false) => return,
        };

        let state = self.state.lock().await;
        if let Some(socket) = state.handle.sock_ref() {
            if let Err(e) = socket.shutdown(how) {
                state.report(self.mode, &format!("shutdown failed: {e}"));
            }
        }
    }

    /// Release the socket. Idempotent.
    ///
    /// `is_open` turns false before the lock is taken, so new I/O is refused
    /// right away even if an in-flight call still holds the lock.
    pub async fn close(&self) {
        self.open.store(false, Ordering::Release);
        let mut state = self.state.lock().await;
        self.close_locked(&mut state);
    }

    fn close_locked(&self, state: &mut State) {
        self.open.store(false, Ordering::Release);
        if matches!(state.handle, Handle::Closed) {
            return;
        }
        state.handle = Handle::Closed;
        tracing::debug!(mode = %self.mode, local = ?self.local_addr(), "transport closed");
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("mode", &self.mode)
            .field("open", &self.is_open())
            .field("local", &self.local_addr())
            .field("remote", &self.peer_addr())
            .finish()
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn parse_socket_addr(ip: &str, port: u16, ipv6: bool) -> Result<SocketAddr, RelayError> {
    let parsed = if ipv6 {
        ip.parse::<Ipv6Addr>().map(IpAddr::V6)
    } else {
        ip.parse::<Ipv4Addr>().map(IpAddr::V4)
    };
    parsed
        .map(|addr| SocketAddr::new(addr, port))
        .map_err(|_| RelayError::InvalidAddress(format!("{ip}:{port}")))
}

/// Create a non-blocking socket with address reuse and bind it.
fn bind_socket(addr: SocketAddr, ty: Type, protocol: Protocol) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), ty, Some(protocol))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket)
}

/// Drive an I/O future under the transport's blocking policy.
///
/// Non-blocking polls once. Otherwise the optional timeout applies and
/// expiry surfaces as `TimedOut`.
async fn wait_io<T>(
    timeout: Option<Duration>,
    nonblocking: bool,
    fut: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    if nonblocking {
        return fut
            .now_or_never()
            .unwrap_or_else(|| Err(io::ErrorKind::WouldBlock.into()));
    }
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| Err(io::ErrorKind::TimedOut.into())),
        None => fut.await,
    }
}

fn is_quiet(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    async fn listening_server() -> (Transport, SocketAddr) {
        let server = Transport::new(SocketMode::TcpServer);
        server.initialize("127.0.0.1", 0, false).await.unwrap();
        server.listen(5).await.unwrap();
        let addr = server.local_addr().unwrap();
        (server, addr)
    }

    async fn client_for(addr: SocketAddr) -> Transport {
        let client = Transport::new(SocketMode::TcpClient);
        client
            .initialize("127.0.0.1", addr.port(), false)
            .await
            .unwrap();
        client
    }

    #[test]
    fn mode_names() {
        assert_eq!(SocketMode::TcpServer.as_str(), "TCP_SERVER");
        assert_eq!(SocketMode::TcpClient.to_string(), "TCP_CLIENT");
        assert_eq!(SocketMode::Udp.as_str(), "UDP");
    }

    #[tokio::test]
    async fn new_transport_is_closed() {
        let t = Transport::new(SocketMode::Udp);
        assert!(!t.is_open());
        assert_eq!(t.mode(), SocketMode::Udp);
        assert_eq!(t.send(b"x").await, 0);
        assert!(t.receive(16).await.is_empty());
        assert!(t.local_addr().is_none());
    }

    #[tokio::test]
    async fn invalid_address_is_rejected() {
        let t = Transport::new(SocketMode::Udp);
        let err = t.initialize("not-an-ip", 0, false).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidAddress(_)));
        assert!(!t.is_open());

        let err = t.initialize("::1", 0, false).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn initialize_twice_fails() {
        let t = Transport::new(SocketMode::Udp);
        t.initialize("127.0.0.1", 0, false).await.unwrap();
        let err = t.initialize("127.0.0.1", 0, false).await.unwrap_err();
        assert!(matches!(err, RelayError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn wrong_mode_operations_are_rejected() {
        let udp = Transport::new(SocketMode::Udp);
        udp.initialize("127.0.0.1", 0, false).await.unwrap();
        assert!(matches!(
            udp.listen(5).await,
            Err(RelayError::WrongMode { operation: "listen", .. })
        ));
        assert!(matches!(
            udp.accept().await,
            Err(RelayError::WrongMode { operation: "accept", .. })
        ));

        let server = Transport::new(SocketMode::TcpServer);
        server.initialize("127.0.0.1", 0, false).await.unwrap();
        assert!(matches!(
            server.enable_multicast("239.255.0.1", 1).await,
            Err(RelayError::WrongMode { .. })
        ));
        assert!(matches!(server.accept().await, Err(RelayError::NotListening)));
    }

    #[tokio::test]
    async fn tcp_round_trip_and_peer_close() {
        let (server, addr) = listening_server().await;
        let client = client_for(addr).await;
        let accepted = server.accept().await.unwrap();

        assert_eq!(accepted.mode(), SocketMode::TcpClient);
        assert_eq!(accepted.peer_addr(), client.local_addr());
        assert_eq!(client.peer_addr(), Some(addr));

        assert_eq!(client.send(b"hello").await, 5);
        assert_eq!(&accepted.receive(1024).await[..], b"hello");

        client.close().await;
        assert!(!client.is_open());
        assert!(accepted.receive(1024).await.is_empty());
        assert!(!accepted.is_open(), "EOF must close the receiving side");
    }

    #[tokio::test]
    async fn receive_times_out_quietly() {
        let (server, addr) = listening_server().await;
        let client = client_for(addr).await;
        let _accepted = server.accept().await.unwrap();

        client.set_timeout(Some(Duration::from_millis(50))).await;
        assert!(client.receive(1024).await.is_empty());
        assert!(client.is_open(), "a timeout is not a disconnect");
    }

    #[tokio::test]
    async fn accept_honors_timeout() {
        let (server, _) = listening_server().await;
        server.set_timeout(Some(Duration::from_millis(50))).await;
        assert!(matches!(server.accept().await, Err(RelayError::Timeout)));
    }

    #[tokio::test]
    async fn nonblocking_accept_reports_would_block() {
        let (server, _) = listening_server().await;
        server.set_nonblocking(true).await;
        assert!(matches!(server.accept().await, Err(RelayError::WouldBlock)));
    }

    #[tokio::test]
    async fn listen_twice_is_a_no_op() {
        let (server, _) = listening_server().await;
        server.listen(5).await.unwrap();
    }

    #[tokio::test]
    async fn udp_send_to_and_receive_from() {
        let a = Transport::new(SocketMode::Udp);
        let b = Transport::new(SocketMode::Udp);
        a.initialize("127.0.0.1", 0, false).await.unwrap();
        b.initialize("127.0.0.1", 0, false).await.unwrap();
        b.set_timeout(Some(Duration::from_secs(2))).await;

        let dest = b.local_addr().unwrap();
        assert_eq!(a.send_to(b"ping", dest).await, 4);
        let (payload, from) = b.receive_from(1024).await.unwrap();
        assert_eq!(&payload[..], b"ping");
        assert_eq!(Some(from), a.local_addr());
    }

    #[tokio::test]
    async fn send_to_on_tcp_reports_through_handler() {
        let (server, _) = listening_server().await;
        let seen = Arc::new(StdMutex::new(Vec::<String>::new()));
        let sink = seen.clone();
        server
            .set_error_handler(move |msg| sink.lock().unwrap().push(msg.to_string()))
            .await;

        let dest: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert_eq!(server.send_to(b"x", dest).await, 0);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("UDP"));
    }

    #[tokio::test]
    async fn multicast_rejects_unicast_group() {
        let t = Transport::new(SocketMode::Udp);
        t.initialize("0.0.0.0", 0, false).await.unwrap();
        let err = t.enable_multicast("10.0.0.1", 1).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let t = Transport::new(SocketMode::Udp);
        t.initialize("127.0.0.1", 0, false).await.unwrap();
        t.close().await;
        t.close().await;
        assert!(!t.is_open());
        assert!(matches!(
            t.initialize("127.0.0.1", 0, false).await,
            Err(RelayError::Closed)
        ));
    }
}
