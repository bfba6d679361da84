//! Per-document sync state.
//!
//! Tracks, for each registered document, whether it may push local
//! updates yet, whether it completed its first pull, and the local updates
//! still waiting to reach the main source.

use blocktree_crdt::Update;
use serde::Serialize;
use std::collections::VecDeque;

/// Sync state of one document.
#[derive(Debug, Clone, Default)]
pub struct DocSyncState {
    /// Higher priorities are synced first on start.
    pub priority: i32,
    /// Local updates are only pushed once the doc is marked ready.
    pub ready: bool,
    /// Set after the first successful pull from the main source.
    pub pulled: bool,
    /// Local updates not yet accepted by the main source, oldest first.
    pub queued: VecDeque<Update>,
}

impl DocSyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a local update.
    pub fn enqueue(&mut self, update: Update) {
        self.queued.push_back(update);
    }

    /// Drops the head of the queue if it is the update that was pushed.
    /// Returns whether anything was removed.
    pub fn acknowledge(&mut self, update: &Update) -> bool {
        match self.queued.front() {
            Some(head) if head.key() == update.key() => {
                self.queued.pop_front();
                true
            }
            _ => false,
        }
    }

    pub fn status(&self) -> DocSyncStatus {
        DocSyncStatus {
            priority: self.priority,
            ready: self.ready,
            pulled: self.pulled,
            queued: self.queued.len(),
        }
    }
}

/// A snapshot of [`DocSyncState`] for callers outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DocSyncStatus {
    pub priority: i32,
    pub ready: bool,
    pub pulled: bool,
    pub queued: usize,
}
