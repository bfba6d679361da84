//! One document: its block space, undo history and lifecycle.
//!
//! A [`Doc`] is the single owner of a document's CRDT state. Views onto it
//! are [`Store`]s, obtained with [`Doc::get_store`] and cached per
//! `(readonly, query)` configuration.
//!
//! # Lifecycle
//!
//! `Unloaded -> Loading -> Ready -> Disposed`. Mutations fail with
//! [`StoreError::NotReady`] until [`Doc::load`] ran, and with
//! [`StoreError::Disposed`] once the doc is disposed, which is terminal.
//! Remote updates are integrated in every state but `Disposed`.

use crate::error::{StoreError, StoreResult};
use crate::history::{History, Record};
use crate::store::{Store, StoreInner, StoreOptions};
use crate::transaction::{find_root, StoreTransaction};
use blocktree_crdt::{BlockSpace, Committed, SpaceEvent, Update, VectorClock};
use blocktree_schema::Schema;
use blocktree_sync::{AwarenessStore, DocReplica, UpdateSink};
use blocktree_types::{BlockId, DocId, IdGenerator, NanoIdGenerator, PeerId, Slot};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocState {
    Unloaded,
    Loading,
    Ready,
    Disposed,
}

/// What a doc tells its stores.
#[derive(Debug)]
pub(crate) enum DocSignal {
    Events(Vec<SpaceEvent>),
    Ready,
    Disposed,
}

type StoreKey = (bool, Option<String>);

pub struct Doc {
    id: DocId,
    schema: Arc<Schema>,
    id_gen: Arc<dyn IdGenerator>,
    state: Mutex<DocState>,
    space: Mutex<BlockSpace>,
    history: Mutex<History>,
    sink: UpdateSink,
    awareness: Option<Arc<AwarenessStore>>,
    stores: Mutex<HashMap<StoreKey, Weak<StoreInner>>>,
    signal: Slot<DocSignal>,
    history_updated: Slot<()>,
}

impl fmt::Debug for Doc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Doc")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("blocks", &self.space.lock().len())
            .finish()
    }
}

/// Builds a [`Doc`]. Only the id and the schema are required.
pub struct DocBuilder {
    id: DocId,
    schema: Arc<Schema>,
    peer: PeerId,
    id_gen: Arc<dyn IdGenerator>,
    sink: UpdateSink,
    awareness: Option<Arc<AwarenessStore>>,
    capture_timeout: Duration,
}

impl DocBuilder {
    pub fn peer(mut self, peer: PeerId) -> Self {
        self.peer = peer;
        self
    }

    pub fn id_generator(mut self, id_gen: Arc<dyn IdGenerator>) -> Self {
        self.id_gen = id_gen;
        self
    }

    /// Where committed local updates are sent for replication.
    pub fn sink(mut self, sink: UpdateSink) -> Self {
        self.sink = sink;
        self
    }

    /// Source of the per-doc readonly flag.
    pub fn awareness(mut self, awareness: Arc<AwarenessStore>) -> Self {
        self.awareness = Some(awareness);
        self
    }

    pub fn capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    pub fn build(self) -> Arc<Doc> {
        Arc::new(Doc {
            id: self.id,
            schema: self.schema,
            id_gen: self.id_gen,
            state: Mutex::new(DocState::Unloaded),
            space: Mutex::new(BlockSpace::new(self.peer)),
            history: Mutex::new(History::new(self.capture_timeout)),
            sink: self.sink,
            awareness: self.awareness,
            stores: Mutex::new(HashMap::new()),
            signal: Slot::new(),
            history_updated: Slot::new(),
        })
    }
}

impl Doc {
    pub fn builder(id: impl Into<DocId>, schema: Arc<Schema>) -> DocBuilder {
        DocBuilder {
            id: id.into(),
            schema,
            peer: PeerId::new(),
            id_gen: Arc::new(NanoIdGenerator::default()),
            sink: UpdateSink::detached(),
            awareness: None,
            capture_timeout: Duration::from_millis(500),
        }
    }

    pub fn id(&self) -> &DocId {
        &self.id
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn state(&self) -> DocState {
        *self.state.lock()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == DocState::Ready
    }

    pub fn awareness(&self) -> Option<&Arc<AwarenessStore>> {
        self.awareness.as_ref()
    }

    pub(crate) fn space(&self) -> MutexGuard<'_, BlockSpace> {
        self.space.lock()
    }

    pub(crate) fn signal(&self) -> &Slot<DocSignal> {
        &self.signal
    }

    /// Read access to the underlying block space.
    ///
    /// The closure runs under the doc's lock; it must not call back into
    /// the doc or its stores.
    pub fn with_space<R>(&self, f: impl FnOnce(&BlockSpace) -> R) -> R {
        f(&self.space.lock())
    }

    /// The root block of the whole document, regardless of any query.
    pub fn root_id(&self) -> Option<BlockId> {
        find_root(&self.space.lock(), &self.schema)
    }

    pub fn load(&self) -> StoreResult<()> {
        self.load_with(|_| Ok(()))
    }

    /// Loads the doc, running `init` as its first transaction. `init` is
    /// not recorded in the undo history. Loading a ready doc does nothing.
    pub fn load_with(
        &self,
        init: impl FnOnce(&mut StoreTransaction<'_>) -> StoreResult<()>,
    ) -> StoreResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                DocState::Ready => return Ok(()),
                DocState::Disposed => return Err(StoreError::Disposed(self.id.clone())),
                DocState::Loading => return Err(StoreError::NotReady(self.id.clone())),
                DocState::Unloaded => *state = DocState::Loading,
            }
        }
        match self.commit_with(init) {
            Ok(((), committed)) => {
                self.finish(Record::Skip, committed);
                *self.state.lock() = DocState::Ready;
                debug!(doc = %self.id, "doc loaded");
                self.signal.emit(&DocSignal::Ready);
                Ok(())
            }
            Err(err) => {
                *self.state.lock() = DocState::Unloaded;
                Err(err)
            }
        }
    }

    /// Releases every store and listener. Further mutations fail with
    /// [`StoreError::Disposed`]; disposing twice does nothing.
    pub fn dispose(&self) {
        {
            let mut state = self.state.lock();
            if *state == DocState::Disposed {
                return;
            }
            *state = DocState::Disposed;
        }
        self.history.lock().clear();
        let stores: Vec<Store> = self
            .stores
            .lock()
            .drain()
            .filter_map(|(_, weak)| Store::upgrade(&weak))
            .collect();
        self.signal.emit(&DocSignal::Disposed);
        for store in stores {
            store.dispose();
        }
        self.signal.dispose();
        self.history_updated.dispose();
        debug!(doc = %self.id, "doc disposed");
    }

    /// The store for a `(readonly, query)` configuration, created on first
    /// use and cached for as long as a handle to it is alive.
    pub fn get_store(self: &Arc<Self>, options: StoreOptions) -> StoreResult<Store> {
        if self.state() == DocState::Disposed {
            return Err(StoreError::Disposed(self.id.clone()));
        }
        let key = (options.readonly, options.query.as_ref().map(|q| q.cache_key()));
        let mut stores = self.stores.lock();
        if let Some(store) = stores
            .get(&key)
            .and_then(Store::upgrade)
            .filter(|s| !s.is_disposed())
        {
            return Ok(store);
        }
        let store = Store::open(Arc::clone(self), options);
        stores.insert(key, store.downgrade());
        Ok(store)
    }

    /// Drops the cached store of a configuration and disposes it.
    pub fn clear_query(&self, options: &StoreOptions) {
        let key = (options.readonly, options.query.as_ref().map(|q| q.cache_key()));
        let removed = self.stores.lock().remove(&key);
        if let Some(store) = removed.as_ref().and_then(Store::upgrade) {
            store.dispose();
        }
    }

    /// Only the `init` transaction of [`Doc::load_with`] writes before the
    /// doc is ready, and it does not come through here.
    fn ensure_writable(&self) -> StoreResult<()> {
        match self.state() {
            DocState::Ready => Ok(()),
            DocState::Unloaded | DocState::Loading => Err(StoreError::NotReady(self.id.clone())),
            DocState::Disposed => Err(StoreError::Disposed(self.id.clone())),
        }
    }

    /// Runs `f` as one transaction recorded in the undo history.
    ///
    /// An `Err` from `f` rolls back every mutation it made and nothing is
    /// broadcast. `f` must reach the document only through the transaction
    /// it receives: the doc is locked while it runs.
    pub fn transact<R>(
        &self,
        f: impl FnOnce(&mut StoreTransaction<'_>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        self.run(Record::Normal, f)
    }

    /// Like [`Doc::transact`], without an undo entry.
    pub fn transact_without_history<R>(
        &self,
        f: impl FnOnce(&mut StoreTransaction<'_>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        self.run(Record::Skip, f)
    }

    fn run<R>(
        &self,
        mode: Record,
        f: impl FnOnce(&mut StoreTransaction<'_>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        self.ensure_writable()?;
        let (result, committed) = self.commit_with(f)?;
        self.finish(mode, committed);
        Ok(result)
    }

    fn commit_with<R>(
        &self,
        f: impl FnOnce(&mut StoreTransaction<'_>) -> StoreResult<R>,
    ) -> StoreResult<(R, Committed)> {
        let mut space = self.space.lock();
        let mut tx = StoreTransaction::new(space.transact(), &self.schema, self.id_gen.as_ref());
        let result = f(&mut tx)?;
        Ok((result, tx.commit()))
    }

    /// Records, replicates and announces a commit. Runs with no lock held.
    fn finish(&self, mode: Record, committed: Committed) {
        let Committed {
            update,
            changes,
            events,
        } = committed;
        let history_changed = self.history.lock().record(mode, changes, Instant::now());
        if let Some(update) = update {
            self.sink.send(&self.id, update);
        }
        if !events.is_empty() {
            self.signal.emit(&DocSignal::Events(events));
        }
        if history_changed {
            self.history_updated.emit(&());
        }
    }

    /// Closes the current undo entry.
    pub fn capture_sync(&self) {
        self.history.lock().capture();
    }

    /// Reverts the latest undo entry. Returns `false` when there was none.
    pub fn undo(&self) -> StoreResult<bool> {
        self.step(Record::Undo)
    }

    /// Reapplies the latest undone entry. Returns `false` when there was
    /// none.
    pub fn redo(&self) -> StoreResult<bool> {
        self.step(Record::Redo)
    }

    fn step(&self, mode: Record) -> StoreResult<bool> {
        self.ensure_writable()?;
        let entry = {
            let mut history = self.history.lock();
            match mode {
                Record::Undo => history.pop_undo(),
                Record::Redo => history.pop_redo(),
                Record::Normal | Record::Skip => None,
            }
        };
        let Some(entry) = entry else {
            return Ok(false);
        };
        match self.commit_with(|tx| tx.revert(&entry)) {
            Ok(((), committed)) => {
                self.finish(mode, committed);
                Ok(true)
            }
            Err(err) => {
                self.history.lock().restore(mode, entry);
                Err(err)
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.lock().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.lock().can_redo()
    }

    pub fn reset_history(&self) {
        self.history.lock().clear();
        self.history_updated.emit(&());
    }

    /// Fires whenever the undo or redo stack changes.
    pub fn history_updated(&self) -> &Slot<()> {
        &self.history_updated
    }
}

impl DocReplica for Doc {
    fn doc_id(&self) -> DocId {
        self.id.clone()
    }

    fn state_vector(&self) -> VectorClock {
        self.space.lock().state_vector().clone()
    }

    fn updates_since(&self, state: &VectorClock) -> Vec<Update> {
        self.space.lock().updates_since(state)
    }

    /// Merges a remote update. Remote changes never enter the local undo
    /// history.
    fn apply_remote(&self, update: Update) {
        if self.state() == DocState::Disposed {
            return;
        }
        let events = self.space.lock().apply_update(update);
        if !events.is_empty() {
            self.signal.emit(&DocSignal::Events(events));
        }
    }
}
