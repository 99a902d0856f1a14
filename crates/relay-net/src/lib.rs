//! relay-net: transports, peers, the peer registry and LAN discovery.
//!
//! Everything here runs on tokio. Each long-running activity (discovery
//! sender, discovery listener, a caller's accept or receive loop) is its
//! own task; tasks share state only through the locked types below.

pub mod discovery;
pub mod peer;
pub mod registry;
pub mod transport;

pub use discovery::{DiscoveredPeers, DiscoverySettings, PeerDiscovery};
pub use peer::{Peer, PeerStats};
pub use registry::{BroadcastReport, PeerManager};
pub use transport::{ErrorHandler, SocketMode, Transport};
