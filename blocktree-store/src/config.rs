//! Workspace configuration.

use crate::error::{StoreError, StoreResult};
use blocktree_sync::{BlobEngineConfig, DocEngineConfig, Flags};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of one workspace. Every field has a default, so a partial JSON
/// document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub id: String,
    /// Local changes closer together than this join one undo entry.
    pub capture_timeout_ms: u64,
    pub retry_interval_ms: u64,
    pub blob_sync_interval_ms: u64,
    pub max_blob_size: usize,
    /// Initial feature flags of the local awareness state.
    pub flags: Flags,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        let doc = DocEngineConfig::default();
        let blob = BlobEngineConfig::default();
        Self {
            id: "workspace".into(),
            capture_timeout_ms: 500,
            retry_interval_ms: duration_ms(doc.retry_interval),
            blob_sync_interval_ms: duration_ms(blob.sync_interval),
            max_blob_size: blob.max_blob_size,
            flags: Flags::default(),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl WorkspaceConfig {
    pub fn from_json(json: &str) -> StoreResult<Self> {
        serde_json::from_str(json).map_err(StoreError::Config)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn doc_engine(&self) -> DocEngineConfig {
        DocEngineConfig {
            retry_interval: Duration::from_millis(self.retry_interval_ms),
        }
    }

    pub fn blob_engine(&self) -> BlobEngineConfig {
        BlobEngineConfig {
            sync_interval: Duration::from_millis(self.blob_sync_interval_ms),
            max_blob_size: self.max_blob_size,
        }
    }
}
