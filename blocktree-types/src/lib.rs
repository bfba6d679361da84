//! Core type definitions for blocktree.
//!
//! This crate defines the fundamental, flavour-agnostic types used by every
//! other crate in the workspace:
//! - Block, document and peer identifiers
//! - Hybrid Logical Clock timestamps
//! - Pluggable id generators
//! - [`Slot`] / [`Disposable`], the explicit observer primitive that replaces
//!   implicit signal tracking
//! - [`ErrorChannel`], the overridable sink for side-effect failures
//!
//! Block flavours, schemas and the document tree itself live in their own
//! crates, not here.

mod id_gen;
mod ids;
mod slot;
mod timestamp;

pub use id_gen::{
    AutoIncrementIdGenerator, IdGenerator, NanoIdGenerator, PeerScopedIdGenerator, UuidGenerator,
};
pub use ids::{BlockId, DocId, PeerId};
pub use slot::{Disposable, ErrorChannel, Slot};
pub use timestamp::HybridTimestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid id: {0:?}")]
    InvalidId(String),
}
