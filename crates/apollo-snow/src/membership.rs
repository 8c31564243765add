//! Peer membership and sampling.
//!
//! The consensus core only needs `sample(k)` from the membership layer. The
//! view is read per call: changes made to a [`PeerSet`] are seen by the next
//! sample, never by a poll that is already in flight.

use std::collections::HashMap;

use apollo_ids::NodeId;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::{ConsensusError, Result};

/// A peer that can be polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Node ID
    pub node_id: NodeId,
    /// Sampling weight
    pub weight: u64,
}

impl Peer {
    pub fn new(node_id: NodeId, weight: u64) -> Self {
        Self { node_id, weight }
    }
}

/// Source of peers to poll.
pub trait Membership: Send + Sync {
    /// Samples `k` distinct peers.
    ///
    /// Fails with [`ConsensusError::NoPeers`] if fewer than `k` are available.
    fn sample(&self, k: usize) -> Result<Vec<NodeId>>;

    /// Returns the number of peers that can be sampled.
    fn len(&self) -> usize;

    /// Returns true if no peer can be sampled.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A set of peers with weights.
#[derive(Debug, Default)]
pub struct PeerSet {
    peers: RwLock<HashMap<NodeId, Peer>>,
}

impl PeerSet {
    /// Creates a new empty peer set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a peer set where every node has weight 1.
    pub fn uniform(node_ids: impl IntoIterator<Item = NodeId>) -> Self {
        let set = Self::new();
        for node_id in node_ids {
            set.add(Peer::new(node_id, 1));
        }
        set
    }

    /// Adds or replaces a peer. Returns true if the peer is new.
    pub fn add(&self, peer: Peer) -> bool {
        self.peers.write().insert(peer.node_id, peer).is_none()
    }

    /// Removes a peer.
    pub fn remove(&self, node_id: &NodeId) -> Option<Peer> {
        self.peers.write().remove(node_id)
    }

    pub fn get(&self, node_id: &NodeId) -> Option<Peer> {
        self.peers.read().get(node_id).cloned()
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.peers.read().contains_key(node_id)
    }

    /// Returns the total weight.
    pub fn total_weight(&self) -> u64 {
        self.peers.read().values().map(|peer| peer.weight).sum()
    }

    /// Returns all node IDs.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.peers.read().keys().copied().collect()
    }

    /// Samples `k` distinct peers weighted by their weight, using `rng`.
    ///
    /// Peers with zero weight are never sampled.
    pub fn sample_with<R: Rng + ?Sized>(&self, rng: &mut R, k: usize) -> Result<Vec<NodeId>> {
        let mut eligible: Vec<Peer> = self
            .peers
            .read()
            .values()
            .filter(|peer| peer.weight > 0)
            .cloned()
            .collect();
        if eligible.len() < k {
            return Err(ConsensusError::NoPeers {
                needed: k,
                have: eligible.len(),
            });
        }
        // Map iteration order is random per process; sort so a seeded rng
        // yields the same sample.
        eligible.sort_by_key(|peer| peer.node_id);

        let chosen = eligible
            .choose_multiple_weighted(rng, k, |peer| peer.weight as f64)
            .map_err(|_| ConsensusError::NoPeers {
                needed: k,
                have: eligible.len(),
            })?;
        Ok(chosen.map(|peer| peer.node_id).collect())
    }
}

impl Membership for PeerSet {
    fn sample(&self, k: usize) -> Result<Vec<NodeId>> {
        self.sample_with(&mut rand::thread_rng(), k)
    }

    fn len(&self) -> usize {
        self.peers
            .read()
            .values()
            .filter(|peer| peer.weight > 0)
            .count()
    }
}
