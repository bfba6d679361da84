//! Replication records.
//!
//! Every committed local transaction becomes one [`Update`]: the list of
//! primitive [`Op`]s it performed, stamped with the author's peer id, the
//! author's update counter, and the state vector the author had when it
//! committed. Receivers integrate updates in causal order.

use crate::{CrdtError, CrdtResult, ElementId, VectorClock};
use blocktree_types::{BlockId, HybridTimestamp, PeerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A primitive mutation of a block space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    CreateBlock {
        id: BlockId,
        flavour: String,
        with_text: bool,
        at: HybridTimestamp,
    },
    SetAlive {
        id: BlockId,
        alive: bool,
        at: HybridTimestamp,
    },
    SetProp {
        id: BlockId,
        key: String,
        value: Option<Value>,
        at: HybridTimestamp,
    },
    InsertChild {
        parent: BlockId,
        element: ElementId,
        origin: ElementId,
        child: BlockId,
    },
    RemoveChild {
        parent: BlockId,
        element: ElementId,
    },
    InsertText {
        id: BlockId,
        element: ElementId,
        origin: ElementId,
        value: char,
    },
    DeleteText {
        id: BlockId,
        element: ElementId,
    },
}

impl Op {
    /// The block this operation mutates.
    #[must_use]
    pub fn target(&self) -> &BlockId {
        match self {
            Op::CreateBlock { id, .. }
            | Op::SetAlive { id, .. }
            | Op::SetProp { id, .. }
            | Op::InsertText { id, .. }
            | Op::DeleteText { id, .. } => id,
            Op::InsertChild { parent, .. } | Op::RemoveChild { parent, .. } => parent,
        }
    }
}

/// One committed transaction of one peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub peer: PeerId,
    /// Position of this update in the author's sequence, starting at 1.
    pub clock: u64,
    /// State vector of the author at commit time, excluding this update.
    pub deps: VectorClock,
    pub ops: Vec<Op>,
}

impl Update {
    /// `(peer, clock)` uniquely identifies an update.
    #[must_use]
    pub fn key(&self) -> (PeerId, u64) {
        (self.peer, self.clock)
    }

    /// Serializes the update for transport.
    pub fn encode(&self) -> CrdtResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(CrdtError::from)
    }

    pub fn decode(bytes: &[u8]) -> CrdtResult<Self> {
        serde_json::from_slice(bytes).map_err(CrdtError::from)
    }
}
