//! Document sync engine.
//!
//! The engine owns no document state. Documents register as
//! [`DocReplica`]s; their local updates arrive through an [`UpdateSink`] and
//! wait in a per-doc queue until the main source accepts them. A background
//! task (started with [`DocEngine::start`]) pulls each document once,
//! flushes queues as documents become ready, relays updates announced by the
//! main source, and retries failed work on an interval.
//!
//! `pending` counts local updates not yet accepted by the main source. It is
//! the only input of [`DocEngine::can_graceful_stop`].

use crate::error::{SyncError, SyncResult};
use crate::replica::DocReplica;
use crate::source::{DocSource, NoopDocSource, RemoteUpdate};
use crate::state::{DocSyncState, DocSyncStatus};
use blocktree_crdt::{Update, VectorClock};
use blocktree_types::{DocId, ErrorChannel, PeerId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for the doc engine.
#[derive(Debug, Clone)]
pub struct DocEngineConfig {
    /// How often failed pulls and pushes are retried.
    pub retry_interval: Duration,
}

impl Default for DocEngineConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(2),
        }
    }
}

enum EngineMsg {
    /// Push the queued updates of a doc.
    Flush(DocId),
    /// Pull, then push whatever the main source is missing.
    Sync(DocId),
}

#[derive(Default)]
struct DocEntry {
    replica: Option<Arc<dyn DocReplica>>,
    state: DocSyncState,
}

struct Inner {
    config: DocEngineConfig,
    main: Arc<dyn DocSource>,
    shadows: Vec<Arc<dyn DocSource>>,
    docs: Mutex<HashMap<DocId, DocEntry>>,
    tx: mpsc::UnboundedSender<EngineMsg>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<EngineMsg>>,
    pending: watch::Sender<usize>,
    synced: watch::Sender<bool>,
    errors: ErrorChannel<SyncError>,
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Synchronizes registered documents with a main source and any number of
/// shadow sources.
pub struct DocEngine {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

impl fmt::Debug for DocEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocEngine")
            .field("main", &self.inner.main.name())
            .field("shadows", &self.inner.shadows.len())
            .field("pending", &self.pending_count())
            .field("running", &self.is_running())
            .finish()
    }
}

impl DocEngine {
    pub fn new(
        main: Arc<dyn DocSource>,
        shadows: Vec<Arc<dyn DocSource>>,
        config: DocEngineConfig,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0);
        let (synced, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                main,
                shadows,
                docs: Mutex::new(HashMap::new()),
                tx,
                rx: tokio::sync::Mutex::new(rx),
                pending,
                synced,
                errors: ErrorChannel::new("doc-engine"),
            }),
            running: Mutex::new(None),
        }
    }

    /// An engine whose main source stores nothing.
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopDocSource), Vec::new(), DocEngineConfig::default())
    }

    /// Handle through which documents report their local updates.
    pub fn sink(&self) -> UpdateSink {
        UpdateSink {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Sync failures. With no subscriber they are logged.
    pub fn errors(&self) -> &ErrorChannel<SyncError> {
        &self.inner.errors
    }

    pub fn main_source(&self) -> &str {
        self.inner.main.name()
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Starts the background task. Must be called inside a Tokio runtime.
    /// Starting a running engine does nothing.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(self.inner.clone(), cancel.clone()));
        *running = Some(Running { cancel, task });
    }

    /// Stops immediately. Queued updates stay queued and are pushed after
    /// the next [`start`](Self::start).
    pub fn force_stop(&self) {
        if let Some(running) = self.running.lock().take() {
            running.cancel.cancel();
            running.task.abort();
            info!(source = self.inner.main.name(), "doc engine force-stopped");
        }
        self.inner.set_synced(false);
    }

    /// True when every local update has been accepted by the main source.
    pub fn can_graceful_stop(&self) -> bool {
        self.pending_count() == 0
    }

    /// Local updates not yet accepted by the main source.
    pub fn pending_count(&self) -> usize {
        *self.inner.pending.borrow()
    }

    /// Waits until every local update is flushed, then stops the engine.
    ///
    /// Returns [`SyncError::Aborted`] if `cancel` fires first; the engine
    /// keeps running in that case.
    pub async fn wait_for_graceful_stop(&self, cancel: Option<CancellationToken>) -> SyncResult<()> {
        let cancel = cancel.unwrap_or_default();
        let mut pending = self.inner.pending.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Aborted),
            flushed = async { pending.wait_for(|n| *n == 0).await.map(|_| ()) } => {
                flushed.map_err(|_| SyncError::ChannelClosed)?;
            }
        }
        self.force_stop();
        Ok(())
    }

    pub fn is_synced(&self) -> bool {
        *self.inner.synced.borrow()
    }

    /// Waits until every registered doc was pulled from the main source and
    /// no local update is pending. Only makes progress while running.
    pub async fn wait_for_synced(&self) -> SyncResult<()> {
        let mut synced = self.inner.synced.subscribe();
        synced
            .wait_for(|s| *s)
            .await
            .map(|_| ())
            .map_err(|_| SyncError::ChannelClosed)
    }

    /// Registers a document. Updates queued for it before registration are
    /// kept.
    pub fn add_doc(&self, replica: Arc<dyn DocReplica>) {
        let doc = replica.doc_id();
        {
            let mut docs = self.inner.docs.lock();
            let entry = docs.entry(doc.clone()).or_default();
            entry.replica = Some(replica);
            entry.state.pulled = false;
        }
        debug!(%doc, "doc registered");
        self.inner.set_synced(false);
        self.inner.send(EngineMsg::Sync(doc));
    }

    /// Unregisters a document and drops its queued updates.
    pub fn remove_doc(&self, doc: &DocId) {
        let removed = self.inner.docs.lock().remove(doc);
        if let Some(entry) = removed {
            let dropped = entry.state.queued.len();
            if dropped > 0 {
                warn!(%doc, dropped, "removing doc with unflushed updates");
                self.inner.pending.send_modify(|n| *n = n.saturating_sub(dropped));
            }
        }
        self.inner.refresh_synced();
    }

    /// Higher priorities are synced first when the engine starts.
    pub fn set_priority(&self, doc: &DocId, priority: i32) {
        self.inner
            .docs
            .lock()
            .entry(doc.clone())
            .or_default()
            .state
            .priority = priority;
    }

    /// Allows the doc's local updates to be pushed.
    pub fn mark_as_ready(&self, doc: &DocId) {
        {
            let mut docs = self.inner.docs.lock();
            let entry = docs.entry(doc.clone()).or_default();
            if entry.state.ready {
                return;
            }
            entry.state.ready = true;
        }
        self.inner.send(EngineMsg::Sync(doc.clone()));
    }

    pub fn doc_status(&self, doc: &DocId) -> Option<DocSyncStatus> {
        self.inner.docs.lock().get(doc).map(|e| e.state.status())
    }
}

impl Drop for DocEngine {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
            running.task.abort();
        }
    }
}

/// Cloneable handle documents use to hand local updates to the engine.
///
/// Holds the engine weakly: once the engine is dropped, sends are ignored.
#[derive(Clone)]
pub struct UpdateSink {
    inner: Weak<Inner>,
}

impl fmt::Debug for UpdateSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateSink")
            .field("attached", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl UpdateSink {
    /// A sink attached to nothing.
    pub fn detached() -> Self {
        Self { inner: Weak::new() }
    }

    /// Queues a committed local update for `doc`.
    pub fn send(&self, doc: &DocId, update: Update) {
        if let Some(inner) = self.inner.upgrade() {
            inner.enqueue(doc, update);
        }
    }
}

impl Inner {
    fn send(&self, msg: EngineMsg) {
        // The receiver lives as long as `self`.
        let _ = self.tx.send(msg);
    }

    fn enqueue(&self, doc: &DocId, update: Update) {
        let ready = {
            let mut docs = self.docs.lock();
            let entry = docs.entry(doc.clone()).or_default();
            entry.state.enqueue(update);
            entry.state.ready
        };
        self.pending.send_modify(|n| *n += 1);
        self.set_synced(false);
        if ready {
            self.send(EngineMsg::Flush(doc.clone()));
        }
    }

    fn replica(&self, doc: &DocId) -> Option<Arc<dyn DocReplica>> {
        self.docs.lock().get(doc).and_then(|e| e.replica.clone())
    }

    fn is_ready(&self, doc: &DocId) -> bool {
        self.docs.lock().get(doc).is_some_and(|e| e.state.ready)
    }

    fn set_synced(&self, value: bool) {
        self.synced.send_if_modified(|s| {
            let changed = *s != value;
            *s = value;
            changed
        });
    }

    fn refresh_synced(&self) {
        let all_pulled = self
            .docs
            .lock()
            .values()
            .all(|e| e.replica.is_none() || e.state.pulled);
        self.set_synced(all_pulled && *self.pending.borrow() == 0);
    }

    /// Registered docs, highest priority first.
    fn docs_by_priority(&self) -> Vec<DocId> {
        let docs = self.docs.lock();
        let mut ids: Vec<(i32, DocId)> = docs
            .iter()
            .filter(|(_, e)| e.replica.is_some())
            .map(|(id, e)| (e.state.priority, id.clone()))
            .collect();
        ids.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        ids.into_iter().map(|(_, id)| id).collect()
    }

    fn apply_remote(&self, doc: &DocId, update: Update) {
        match self.replica(doc) {
            Some(replica) => replica.apply_remote(update),
            None => debug!(%doc, "ignoring update for unregistered doc"),
        }
    }

    async fn push_shadows(&self, doc: &DocId, update: &Update) {
        for shadow in &self.shadows {
            if let Err(e) = shadow.push(doc, update).await {
                self.errors.report(e);
            }
        }
    }

    /// Pushes the doc's queue in order, dropping each update once the main
    /// source accepted it. Stops at the first failure.
    async fn flush(&self, doc: &DocId) -> SyncResult<HashSet<(PeerId, u64)>> {
        let mut pushed = HashSet::new();
        loop {
            let next = {
                let docs = self.docs.lock();
                match docs.get(doc) {
                    Some(entry) if entry.state.ready => entry.state.queued.front().cloned(),
                    _ => None,
                }
            };
            let Some(update) = next else {
                break;
            };
            self.main.push(doc, &update).await?;
            self.push_shadows(doc, &update).await;
            let acked = self
                .docs
                .lock()
                .get_mut(doc)
                .is_some_and(|e| e.state.acknowledge(&update));
            if acked {
                self.pending.send_modify(|n| *n = n.saturating_sub(1));
            }
            pushed.insert(update.key());
        }
        self.refresh_synced();
        Ok(pushed)
    }

    /// Pulls from every source, then (if the doc is ready) flushes the
    /// queue and pushes whatever else the main source is missing.
    async fn sync_doc(&self, doc: &DocId) -> SyncResult<()> {
        let Some(replica) = self.replica(doc) else {
            return Ok(());
        };

        let remote_state = match self.main.pull(doc, &replica.state_vector()).await? {
            Some(pulled) => {
                debug!(%doc, updates = pulled.updates.len(), "pulled from main");
                for update in pulled.updates {
                    replica.apply_remote(update);
                }
                pulled.state
            }
            None => VectorClock::new(),
        };
        if let Some(entry) = self.docs.lock().get_mut(doc) {
            entry.state.pulled = true;
        }

        for shadow in &self.shadows {
            match shadow.pull(doc, &replica.state_vector()).await {
                Ok(Some(pulled)) => {
                    for update in pulled.updates {
                        replica.apply_remote(update);
                    }
                }
                Ok(None) => {}
                Err(e) => self.errors.report(e),
            }
        }

        if !self.is_ready(doc) {
            self.refresh_synced();
            return Ok(());
        }

        let pushed = self.flush(doc).await?;
        for update in replica.updates_since(&remote_state) {
            if pushed.contains(&update.key()) {
                continue;
            }
            self.main.push(doc, &update).await?;
            self.push_shadows(doc, &update).await;
        }
        self.refresh_synced();
        Ok(())
    }

    async fn sync_all(&self) {
        for doc in self.docs_by_priority() {
            if let Err(e) = self.sync_doc(&doc).await {
                self.errors.report(e);
            }
        }
        self.refresh_synced();
    }

    /// Re-pulls docs whose first pull failed and flushes non-empty queues.
    async fn retry(&self) {
        let work: Vec<(DocId, bool)> = self
            .docs
            .lock()
            .iter()
            .filter(|(_, e)| e.replica.is_some())
            .filter_map(|(id, e)| {
                if !e.state.pulled {
                    Some((id.clone(), true))
                } else if e.state.ready && !e.state.queued.is_empty() {
                    Some((id.clone(), false))
                } else {
                    None
                }
            })
            .collect();
        for (doc, needs_pull) in work {
            let result = if needs_pull {
                self.sync_doc(&doc).await
            } else {
                self.flush(&doc).await.map(|_| ())
            };
            if let Err(e) = result {
                debug!(%doc, error = %e, "retry failed");
                self.errors.report(e);
            }
        }
    }
}

async fn next_remote(
    feed: &mut Option<broadcast::Receiver<RemoteUpdate>>,
) -> Result<RemoteUpdate, RecvError> {
    match feed {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run(inner: Arc<Inner>, cancel: CancellationToken) {
    info!(
        source = inner.main.name(),
        shadows = inner.shadows.len(),
        "doc engine started"
    );
    // Subscribe before the first pull so nothing pushed in between is lost.
    let mut feed = inner.main.subscribe();
    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = inner.sync_all() => {}
    }

    let mut rx = inner.rx.lock().await;
    let mut retry = tokio::time::interval(inner.config.retry_interval);
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
    retry.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(EngineMsg::Flush(doc)) => {
                    if let Err(e) = inner.flush(&doc).await {
                        inner.errors.report(e);
                    }
                }
                Some(EngineMsg::Sync(doc)) => {
                    if let Err(e) = inner.sync_doc(&doc).await {
                        inner.errors.report(e);
                    }
                }
                None => break,
            },
            received = next_remote(&mut feed) => match received {
                Ok(RemoteUpdate { doc, update }) => inner.apply_remote(&doc, update),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "remote feed lagged, resyncing all docs");
                    inner.sync_all().await;
                }
                Err(RecvError::Closed) => {
                    debug!("remote feed closed");
                    feed = None;
                }
            },
            _ = retry.tick() => inner.retry().await,
        }
    }
    info!(source = inner.main.name(), "doc engine stopped");
}
