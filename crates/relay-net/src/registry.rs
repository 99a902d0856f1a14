//! Peer registry: every known peer by id, and relaying between them.
//!
//! Ids are unique: adding an id that is already present is an error and
//! leaves the existing entry untouched. Map guards are never held across
//! an await; peers are cloned out as `Arc`s before any I/O.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use relay_core::wire::relay_wrap;
use relay_core::RelayError;

use crate::peer::Peer;

/// Outcome of a broadcast across the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Shared, cloneable handle to the peer map.
#[derive(Clone, Default)]
pub struct PeerManager {
    peers: Arc<DashMap<String, Arc<Peer>>>,
}

impl PeerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer` under its id.
    pub fn add_peer(&self, peer: Arc<Peer>) -> Result<(), RelayError> {
        if peer.id().is_empty() {
            return Err(RelayError::InvalidArgument("peer id must not be empty".into()));
        }
        match self.peers.entry(peer.id().to_string()) {
            Entry::Occupied(_) => {
                tracing::error!(peer = %peer.id(), "peer with this id already exists");
                Err(RelayError::DuplicatePeer(peer.id().to_string()))
            }
            Entry::Vacant(slot) => {
                tracing::info!(peer = %peer.id(), ip = %peer.ip(), port = peer.port(), "peer added");
                slot.insert(peer);
                Ok(())
            }
        }
    }

    /// Remove a peer. Returns whether it was present.
    pub fn remove_peer(&self, id: &str) -> bool {
        let removed = self.peers.remove(id).is_some();
        if removed {
            tracing::info!(peer = %id, "peer removed");
        } else {
            tracing::warn!(peer = %id, "remove of unknown peer");
        }
        removed
    }

    pub fn get_peer(&self, id: &str) -> Option<Arc<Peer>> {
        let peer = self.lookup(id);
        if peer.is_none() {
            tracing::warn!(peer = %id, "peer not found");
        }
        peer
    }

    fn lookup(&self, id: &str) -> Option<Arc<Peer>> {
        self.peers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Snapshot of every registered peer.
    pub fn list_peers(&self) -> Vec<Arc<Peer>> {
        self.peers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Forward `message` from `source_id` to `target_id`, tagged as relayed.
    ///
    /// Both peers must be registered. On delivery both are marked active.
    pub async fn relay_message(
        &self,
        source_id: &str,
        target_id: &str,
        message: &str,
    ) -> Result<(), RelayError> {
        let Some(source) = self.lookup(source_id) else {
            tracing::error!(source = %source_id, "relay source not found");
            return Err(RelayError::PeerNotFound(source_id.to_string()));
        };
        let Some(target) = self.lookup(target_id) else {
            tracing::error!(target = %target_id, "relay target not found");
            return Err(RelayError::PeerNotFound(target_id.to_string()));
        };

        if !target.send_message(&relay_wrap(message)).await {
            tracing::error!(source = %source_id, target = %target_id, "relay delivery failed");
            return Err(RelayError::DeliveryFailed(target_id.to_string()));
        }

        source.keep_alive();
        target.keep_alive();
        tracing::info!(source = %source_id, target = %target_id, "message relayed");
        Ok(())
    }

    /// Register discovered peers, skipping ids already present.
    /// Returns how many were added.
    pub fn add_discovered_peers(&self, peers: impl IntoIterator<Item = Arc<Peer>>) -> usize {
        let mut added = 0;
        for peer in peers {
            match self.peers.entry(peer.id().to_string()) {
                Entry::Occupied(_) => {
                    tracing::debug!(peer = %peer.id(), "discovered peer already registered");
                }
                Entry::Vacant(slot) => {
                    tracing::info!(peer = %peer.id(), "added discovered peer");
                    slot.insert(peer);
                    added += 1;
                }
            }
        }
        added
    }

    /// Drop every peer idle for longer than `timeout`. Returns how many went.
    pub fn remove_inactive_peers(&self, timeout: Duration) -> usize {
        let mut removed = 0;
        self.peers.retain(|id, peer| {
            let keep = peer.idle_for() <= timeout;
            if !keep {
                tracing::info!(peer = %id, idle_secs = peer.idle_for().as_secs(), "removing inactive peer");
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Send `message` to every registered peer, one after another.
    pub async fn broadcast(&self, message: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for peer in self.list_peers() {
            if peer.send_message(message).await {
                report.delivered += 1;
            } else {
                tracing::warn!(peer = %peer.id(), "broadcast delivery failed");
                report.failed += 1;
            }
        }
        tracing::info!(delivered = report.delivered, failed = report.failed, "broadcast complete");
        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
