//! Error types for the sync layer.

use blocktree_crdt::CrdtError;
use blocktree_types::DocId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A source (remote store, transport, ...) failed.
    #[error("source `{source_name}` failed: {message}")]
    Source { source_name: String, message: String },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An update could not be decoded or integrated.
    #[error("crdt error: {0}")]
    Crdt(#[from] CrdtError),

    /// The document is not registered with the engine.
    #[error("document not found: {0}")]
    DocNotFound(DocId),

    /// A blob source rejected a write or read.
    #[error("blob `{key}`: {message}")]
    Blob { key: String, message: String },

    /// The engine is not running.
    #[error("engine is not running")]
    NotRunning,

    /// The caller's cancellation token fired.
    #[error("operation aborted")]
    Aborted,

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl SyncError {
    /// Shorthand for a [`SyncError::Source`] failure.
    pub fn source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}
