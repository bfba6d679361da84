//! Last-writer-wins register.
//!
//! Holds one value. Of two concurrent writes the one with the larger hybrid
//! timestamp wins; equal timestamps are broken by peer id so every replica
//! picks the same winner.

use blocktree_types::{HybridTimestamp, PeerId};
use serde::{Deserialize, Serialize};

/// A single value with the stamp of the write that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LWWRegister<T> {
    value: T,
    stamp: (HybridTimestamp, PeerId),
}

impl<T> LWWRegister<T> {
    #[must_use]
    pub fn new(value: T, at: HybridTimestamp, peer: PeerId) -> Self {
        Self {
            value,
            stamp: (at, peer),
        }
    }

    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    #[must_use]
    pub fn timestamp(&self) -> HybridTimestamp {
        self.stamp.0
    }

    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.stamp.1
    }

    /// Applies a write stamped `(at, peer)`. Returns whether it replaced
    /// the current value.
    pub fn write(&mut self, value: T, at: HybridTimestamp, peer: PeerId) -> bool {
        if (at, peer) <= self.stamp {
            return false;
        }
        self.value = value;
        self.stamp = (at, peer);
        true
    }
}

impl<T: Clone> LWWRegister<T> {
    /// Commutative, associative and idempotent.
    pub fn merge(&mut self, other: &Self) {
        self.write(other.value.clone(), other.stamp.0, other.stamp.1);
    }
}
