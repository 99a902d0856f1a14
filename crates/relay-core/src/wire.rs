//! Relay wire format: discovery datagrams and the relay marker.
//!
//! Discovery messages are bare ASCII strings sent as whole UDP payloads.
//! No length prefix, no framing, no version byte. A datagram is either
//! exactly one of the two strings below or it is ignored.
//!
//! Application messages are plain text. A message forwarded through the
//! registry is prefixed with [`RELAY_TAG`] so the receiver can tell relayed
//! traffic from direct traffic.

use std::fmt;
use std::net::SocketAddr;

// ── Discovery ─────────────────────────────────────────────────────────────────

/// The two discovery message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMessage {
    /// Multicast by every running instance on each sender tick.
    Request,
    /// Unicast back to the observed source of a request.
    Response,
}

impl DiscoveryMessage {
    /// Literal payload for this message kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            DiscoveryMessage::Request => "DISCOVERY_REQUEST",
            DiscoveryMessage::Response => "DISCOVERY_RESPONSE",
        }
    }

    pub const fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    /// Payload length in bytes.
    pub const fn size(self) -> usize {
        self.as_str().len()
    }

    /// Interpret a received datagram. Anything other than an exact match is `None`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload == Self::Request.as_bytes() {
            Some(Self::Request)
        } else if payload == Self::Response.as_bytes() {
            Some(Self::Response)
        } else {
            None
        }
    }
}

impl fmt::Display for DiscoveryMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Relay ─────────────────────────────────────────────────────────────────────

/// Prefix applied to every message forwarded by the registry.
pub const RELAY_TAG: &str = "[Relayed] ";

/// Wrap a message for relayed delivery.
pub fn relay_wrap(message: &str) -> String {
    let mut out = String::with_capacity(RELAY_TAG.len() + message.len());
    out.push_str(RELAY_TAG);
    out.push_str(message);
    out
}

/// Strip the relay marker. Returns `None` for direct (unmarked) traffic.
pub fn relay_unwrap(message: &str) -> Option<&str> {
    message.strip_prefix(RELAY_TAG)
}

// ── Addressing ────────────────────────────────────────────────────────────────

/// Canonical external form of a socket address: `"ip:port"`.
///
/// IPv6 addresses are written without brackets to keep the `ip` part
/// identical to what callers pass into `Transport::initialize`.
pub fn peer_addr_string(addr: &SocketAddr) -> String {
    format!("{}:{}", addr.ip(), addr.port())
}

/// Split an `"ip:port"` string at its last colon.
pub fn split_peer_addr(addr: &str) -> Option<(&str, u16)> {
    let (ip, port) = addr.rsplit_once(':')?;
    let port = port.parse().ok()?;
    if ip.is_empty() {
        return None;
    }
    Some((ip, port))
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Default IPv4 multicast group for discovery (administratively scoped).
pub const DEFAULT_MULTICAST_ADDR: &str = "239.255.0.1";

/// Default UDP port shared by every discovery instance on the group.
pub const DEFAULT_DISCOVERY_PORT: u16 = 45_454;

/// Seconds between discovery requests.
pub const DISCOVERY_INTERVAL_SECS: u64 = 5;

/// Receive timeout for the discovery listener, so it notices shutdown.
pub const DISCOVERY_RECV_TIMEOUT_SECS: u64 = 1;

/// Read buffer for a single message or datagram.
pub const RECEIVE_BUFFER_SIZE: usize = 1024;

/// Default listen backlog for server peers.
pub const DEFAULT_BACKLOG: u32 = 5;

// ── Tests ─────────────────────────────────────────────────────────────────────
