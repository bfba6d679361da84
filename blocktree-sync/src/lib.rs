//! Sync engines for blocktree workspaces.
//!
//! Three independent engines keep a workspace in step with the outside
//! world:
//!
//! - [`DocEngine`] replicates document updates between registered
//!   [`DocReplica`]s and a main [`DocSource`] plus shadow sources.
//! - [`BlobEngine`] stores content-addressed blobs in a main
//!   [`BlobSource`] and mirrors them to shadows.
//! - [`AwarenessEngine`] relays ephemeral presence state held in an
//!   [`AwarenessStore`] through [`AwarenessSource`]s.
//!
//! Network transports are out of scope: sources are traits, and the
//! in-memory implementations here are what tests and single-process setups
//! use.
//!
//! # Sync process
//!
//! 1. **Start**: the engine pulls every registered doc from the main
//!    source, highest priority first.
//! 2. **Ready**: once a doc is marked ready, its queued local updates are
//!    pushed in commit order, followed by anything else the source lacks.
//! 3. **Live**: updates announced by the main source are applied to the
//!    matching replica; failed pushes are retried on an interval.
//! 4. **Stop**: `wait_for_graceful_stop` waits for the queue to drain;
//!    `force_stop` does not.
//!
//! # Example
//!
//! ```
//! use blocktree_sync::{DocEngine, DocEngineConfig, MemoryDocSource};
//! use std::sync::Arc;
//!
//! let main = Arc::new(MemoryDocSource::new("server"));
//! let engine = DocEngine::new(main, Vec::new(), DocEngineConfig::default());
//! assert!(engine.can_graceful_stop());
//! ```

mod awareness;
mod blob;
mod engine;
mod error;
mod replica;
pub mod source;
mod state;

pub use awareness::{
    AwarenessEngine, AwarenessEvent, AwarenessEventKind, AwarenessSource, AwarenessState,
    AwarenessStore, Flags, LocalAwarenessHub, UserInfo,
};
pub use blob::{
    blob_key, BlobEngine, BlobEngineConfig, BlobSource, BlobSyncStats, MemoryBlobSource,
};
pub use engine::{DocEngine, DocEngineConfig, UpdateSink};
pub use error::{SyncError, SyncResult};
pub use replica::DocReplica;
pub use source::memory::MemoryDocSource;
pub use source::{DocSource, NoopDocSource, PullResult, RemoteUpdate};
pub use state::{DocSyncState, DocSyncStatus};
