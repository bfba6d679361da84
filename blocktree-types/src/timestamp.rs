//! Hybrid logical clock stamped on every CRDT write.
//!
//! Readings never go backwards on one replica, and a replica that has seen a
//! remote stamp always produces larger ones afterwards. Between replicas,
//! equal stamps are broken by peer id in the CRDT layer.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Milliseconds since the Unix epoch plus a counter for writes within the
/// same millisecond. Ordered by wall time, then counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HybridTimestamp {
    wall_time: u64,
    logical: u32,
}

impl HybridTimestamp {
    #[must_use]
    pub fn now() -> Self {
        Self {
            wall_time: now_millis(),
            logical: 0,
        }
    }

    /// The zero timestamp, smaller than any clock reading.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            wall_time: 0,
            logical: 0,
        }
    }

    #[must_use]
    pub const fn new(wall_time: u64, logical: u32) -> Self {
        Self { wall_time, logical }
    }

    #[must_use]
    pub const fn wall_time(&self) -> u64 {
        self.wall_time
    }

    #[must_use]
    pub const fn logical(&self) -> u32 {
        self.logical
    }

    /// The stamp for the next local write: strictly greater than `self`.
    #[must_use]
    pub fn tick(&self) -> Self {
        match now_millis() {
            now if now > self.wall_time => Self::new(now, 0),
            _ => Self::new(self.wall_time, self.logical.saturating_add(1)),
        }
    }

    /// Advances past a stamp observed on a remote update. The result is
    /// greater than both `self` and `remote`.
    #[must_use]
    pub fn receive(&self, remote: &Self) -> Self {
        let wall = now_millis().max(self.wall_time).max(remote.wall_time);
        let logical = match (wall == self.wall_time, wall == remote.wall_time) {
            (true, true) => self.logical.max(remote.logical).saturating_add(1),
            (true, false) => self.logical.saturating_add(1),
            (false, true) => remote.logical.saturating_add(1),
            (false, false) => 0,
        };
        Self::new(wall, logical)
    }
}

impl Default for HybridTimestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl PartialOrd for HybridTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HybridTimestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.wall_time, self.logical).cmp(&(other.wall_time, other.logical))
    }
}
