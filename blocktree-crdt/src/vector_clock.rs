//! Vector counters.
//!
//! A [`VectorClock`] maps each peer to the number of updates from that peer a
//! replica has integrated. It serves both as a document's *state vector* (what
//! have I seen?) and as the causal dependency set attached to an update (what
//! must the receiver have seen before applying this?).

use blocktree_types::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Causality relationship between two vector counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    Before,
    After,
    Concurrent,
    Equal,
}

/// Per-peer update counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    counters: BTreeMap<PeerId, u64>,
}

impl VectorClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for a peer, `0` if never seen.
    #[must_use]
    pub fn get(&self, peer: &PeerId) -> u64 {
        self.counters.get(peer).copied().unwrap_or(0)
    }

    pub fn peers(&self) -> impl Iterator<Item = (&PeerId, &u64)> {
        self.counters.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Bumps a peer's counter and returns the new value.
    pub fn increment(&mut self, peer: PeerId) -> u64 {
        let counter = self.counters.entry(peer).or_default();
        *counter += 1;
        *counter
    }

    /// Raises a peer's counter to `count` if it is behind.
    pub fn update(&mut self, peer: PeerId, count: u64) {
        if count > self.get(&peer) {
            self.counters.insert(peer, count);
        }
    }

    /// Pointwise maximum.
    pub fn merge(&mut self, other: &Self) {
        for (peer, &count) in &other.counters {
            self.update(*peer, count);
        }
    }

    /// Whether the update numbered `clock` from `peer` is already covered.
    #[must_use]
    pub fn has_seen(&self, peer: &PeerId, clock: u64) -> bool {
        self.get(peer) >= clock
    }

    #[must_use]
    pub fn compare(&self, other: &Self) -> CausalOrder {
        let peers: HashSet<&PeerId> = self.counters.keys().chain(other.counters.keys()).collect();
        let mut ahead = false;
        let mut behind = false;
        for peer in peers {
            let (mine, theirs) = (self.get(peer), other.get(peer));
            ahead |= mine > theirs;
            behind |= mine < theirs;
        }
        match (ahead, behind) {
            (false, false) => CausalOrder::Equal,
            (true, false) => CausalOrder::After,
            (false, true) => CausalOrder::Before,
            (true, true) => CausalOrder::Concurrent,
        }
    }

    #[must_use]
    pub fn is_concurrent(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Concurrent
    }

    /// True if this clock is `>=` the other for every peer.
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        matches!(self.compare(other), CausalOrder::After | CausalOrder::Equal)
    }
}
