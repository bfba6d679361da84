//! CRDT building blocks for blocktree documents.
//!
//! - [`LWWRegister<T>`]: last-writer-wins register for single values
//! - [`LwwMap`]: per-key LWW map, used for block props
//! - [`RGA<T>`]: replicated growable array, used for child arrays and text
//! - [`VectorClock`]: state vectors and causal dependencies
//! - [`BlockSpace`]: the block tree of one document, built from the above
//!
//! Primitive merges are commutative, associative and idempotent. A
//! [`BlockSpace`] additionally delivers [`Update`]s in causal order, so every
//! replica that integrated the same set of updates holds the same tree.

mod error;
mod lww_map;
mod lww_register;
mod rga;
mod space;
mod update;
mod vector_clock;

pub use error::{CrdtError, CrdtResult};
pub use lww_map::LwwMap;
pub use lww_register::LWWRegister;
pub use rga::{ElementId, RGA};
pub use space::{BlockSpace, Change, Committed, Placement, SpaceEvent, Transaction, YBlock};
pub use update::{Op, Update};
pub use vector_clock::{CausalOrder, VectorClock};
