//! Document sources.
//!
//! A source is anything that stores or relays document updates: a local
//! database, a cloud endpoint, another tab. The engine only talks to the
//! [`DocSource`] trait; network transports are out of scope here and the
//! [`memory`] module provides in-process implementations.

use crate::error::SyncResult;
use async_trait::async_trait;
use blocktree_crdt::{Update, VectorClock};
use blocktree_types::DocId;
use tokio::sync::broadcast;

/// An update announced by a source.
#[derive(Debug, Clone)]
pub struct RemoteUpdate {
    pub doc: DocId,
    pub update: Update,
}

/// Result of pulling a document from a source.
#[derive(Debug, Clone, Default)]
pub struct PullResult {
    /// Updates the caller is missing, in causal order.
    pub updates: Vec<Update>,
    /// State vector of the source after the pull.
    pub state: VectorClock,
}

/// A store of document updates the engine synchronizes with.
#[async_trait]
pub trait DocSource: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Returns every update of `doc` not covered by `state`, or `None` if
    /// the source knows nothing about the document.
    async fn pull(&self, doc: &DocId, state: &VectorClock) -> SyncResult<Option<PullResult>>;

    /// Stores one update. Pushing an update the source already has is a
    /// no-op.
    async fn push(&self, doc: &DocId, update: &Update) -> SyncResult<()>;

    /// Live feed of updates other writers push to this source.
    fn subscribe(&self) -> Option<broadcast::Receiver<RemoteUpdate>> {
        None
    }
}

/// A source that stores nothing. Used when a workspace runs without sync.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDocSource;

#[async_trait]
impl DocSource for NoopDocSource {
    fn name(&self) -> &str {
        "noop"
    }

    async fn pull(&self, _doc: &DocId, _state: &VectorClock) -> SyncResult<Option<PullResult>> {
        Ok(None)
    }

    async fn push(&self, _doc: &DocId, _update: &Update) -> SyncResult<()> {
        Ok(())
    }
}

pub mod memory {
    //! In-memory sources, shareable between engines of one process.

    use super::*;
    use crate::error::SyncError;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const CHANNEL_CAPACITY: usize = 1024;

    #[derive(Debug, Default)]
    struct DocLog {
        updates: Vec<Update>,
        seen: HashSet<(blocktree_types::PeerId, u64)>,
        state: VectorClock,
    }

    /// A [`DocSource`] that keeps every update in memory and broadcasts
    /// pushes to its subscribers.
    ///
    /// Wrap it in an `Arc` and hand clones to several engines to simulate
    /// peers sharing one server.
    #[derive(Debug)]
    pub struct MemoryDocSource {
        name: String,
        docs: Mutex<HashMap<DocId, DocLog>>,
        feed: broadcast::Sender<RemoteUpdate>,
        offline: AtomicBool,
        pushes: AtomicUsize,
    }

    impl MemoryDocSource {
        pub fn new(name: impl Into<String>) -> Self {
            let (feed, _) = broadcast::channel(CHANNEL_CAPACITY);
            Self {
                name: name.into(),
                docs: Mutex::new(HashMap::new()),
                feed,
                offline: AtomicBool::new(false),
                pushes: AtomicUsize::new(0),
            }
        }

        /// While offline every pull and push fails.
        pub fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        pub fn is_offline(&self) -> bool {
            self.offline.load(Ordering::SeqCst)
        }

        /// Number of distinct updates stored for `doc`.
        pub fn update_count(&self, doc: &DocId) -> usize {
            self.docs.lock().get(doc).map_or(0, |log| log.updates.len())
        }

        /// Number of accepted push calls, duplicates included.
        pub fn push_count(&self) -> usize {
            self.pushes.load(Ordering::SeqCst)
        }

        pub fn state_vector(&self, doc: &DocId) -> VectorClock {
            self.docs
                .lock()
                .get(doc)
                .map(|log| log.state.clone())
                .unwrap_or_default()
        }

        fn check_online(&self) -> SyncResult<()> {
            if self.is_offline() {
                return Err(SyncError::source(&self.name, "offline"));
            }
            Ok(())
        }
    }

    impl Default for MemoryDocSource {
        fn default() -> Self {
            Self::new("memory")
        }
    }

    #[async_trait]
    impl DocSource for MemoryDocSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn pull(&self, doc: &DocId, state: &VectorClock) -> SyncResult<Option<PullResult>> {
            self.check_online()?;
            let docs = self.docs.lock();
            let Some(log) = docs.get(doc) else {
                return Ok(None);
            };
            let updates = log
                .updates
                .iter()
                .filter(|u| !state.has_seen(&u.peer, u.clock))
                .cloned()
                .collect();
            Ok(Some(PullResult {
                updates,
                state: log.state.clone(),
            }))
        }

        async fn push(&self, doc: &DocId, update: &Update) -> SyncResult<()> {
            self.check_online()?;
            self.pushes.fetch_add(1, Ordering::SeqCst);
            {
                let mut docs = self.docs.lock();
                let log = docs.entry(doc.clone()).or_default();
                if !log.seen.insert(update.key()) {
                    return Ok(());
                }
                log.updates.push(update.clone());
                log.state.update(update.peer, update.clock);
            }
            // No receivers is fine.
            let _ = self.feed.send(RemoteUpdate {
                doc: doc.clone(),
                update: update.clone(),
            });
            Ok(())
        }

        fn subscribe(&self) -> Option<broadcast::Receiver<RemoteUpdate>> {
            Some(self.feed.subscribe())
        }
    }
}
