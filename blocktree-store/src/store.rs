//! Stores: materialized views of a document.
//!
//! A [`Store`] owns the [`BlockModel`]s of the blocks its query lets
//! through, keyed by id. It never holds tree structure itself: parents,
//! siblings and children are looked up in the document on demand, so the
//! only thing a store keeps in sync is the id -> model map. After every
//! commit or remote update the doc signals its stores, which diff the map
//! against the document and fire their slots with no lock held.

use crate::block::Block;
use crate::doc::{Doc, DocSignal};
use crate::error::{StoreError, StoreResult};
use crate::model::BlockModel;
use crate::query::{Query, ViewType};
use crate::transaction::{DeleteOptions, StoreTransaction};
use blocktree_crdt::SpaceEvent;
use blocktree_schema::Role;
use blocktree_types::{BlockId, DocId, Disposable, Slot};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Configuration of a store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreOptions {
    pub readonly: bool,
    pub query: Option<Query>,
}

impl StoreOptions {
    pub fn readonly() -> Self {
        Self {
            readonly: true,
            query: None,
        }
    }

    pub fn with_query(query: Query) -> Self {
        Self {
            readonly: false,
            query: Some(query),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockUpdateKind {
    Add,
    Delete,
    /// A prop changed; `"text"` for the text payload.
    Update { key: String },
}

/// Payload of [`Store::block_updated`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockUpdate {
    pub id: BlockId,
    pub flavour: String,
    pub kind: BlockUpdateKind,
}

pub(crate) struct StoreInner {
    pub(crate) doc: Arc<Doc>,
    readonly: bool,
    query: Option<Query>,
    blocks: Mutex<BTreeMap<BlockId, Block>>,
    root: Mutex<Option<BlockId>>,
    subscription: Mutex<Option<Disposable>>,
    disposed: AtomicBool,
    root_added: Slot<BlockId>,
    root_deleted: Slot<BlockId>,
    block_updated: Slot<BlockUpdate>,
}

/// A view of one document. Cheap to clone; clones share the same models.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("doc", self.inner.doc.id())
            .field("readonly", &self.inner.readonly)
            .field("query", &self.inner.query)
            .field("blocks", &self.inner.blocks.lock().len())
            .finish()
    }
}

impl Store {
    pub(crate) fn open(doc: Arc<Doc>, options: StoreOptions) -> Self {
        let inner = Arc::new(StoreInner {
            doc,
            readonly: options.readonly,
            query: options.query,
            blocks: Mutex::new(BTreeMap::new()),
            root: Mutex::new(None),
            subscription: Mutex::new(None),
            disposed: AtomicBool::new(false),
            root_added: Slot::new(),
            root_deleted: Slot::new(),
            block_updated: Slot::new(),
        });
        let weak = Arc::downgrade(&inner);
        let subscription = inner.doc.signal().subscribe(move |signal| {
            if let Some(inner) = weak.upgrade() {
                inner.on_signal(signal);
            }
        });
        *inner.subscription.lock() = Some(subscription);
        inner.reconcile(&[]);
        Self { inner }
    }

    pub(crate) fn upgrade(weak: &Weak<StoreInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn downgrade(&self) -> Weak<StoreInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn id(&self) -> &DocId {
        self.inner.doc.id()
    }

    pub fn doc(&self) -> &Arc<Doc> {
        &self.inner.doc
    }

    pub fn query(&self) -> Option<&Query> {
        self.inner.query.as_ref()
    }

    /// Whether the store rejects mutations: opened readonly, or the doc is
    /// flagged readonly in the local awareness state.
    pub fn readonly(&self) -> bool {
        self.inner.readonly
            || self
                .inner
                .doc
                .awareness()
                .is_some_and(|a| a.is_readonly(self.inner.doc.id()))
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    // ── Slots ───────────────────────────────────────────────────────

    pub fn root_added(&self) -> &Slot<BlockId> {
        &self.inner.root_added
    }

    pub fn root_deleted(&self) -> &Slot<BlockId> {
        &self.inner.root_deleted
    }

    pub fn block_updated(&self) -> &Slot<BlockUpdate> {
        &self.inner.block_updated
    }

    pub fn history_updated(&self) -> &Slot<()> {
        self.inner.doc.history_updated()
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// The root model, if the root block is materialized.
    pub fn root(&self) -> Option<Arc<BlockModel>> {
        let id = self.inner.root.lock().clone()?;
        self.get_model(&id)
    }

    pub fn get_block(&self, id: &BlockId) -> Option<Block> {
        self.inner.blocks.lock().get(id).cloned()
    }

    pub fn get_model(&self, id: &BlockId) -> Option<Arc<BlockModel>> {
        self.inner.blocks.lock().get(id).map(|b| Arc::clone(&b.model))
    }

    pub fn has_block(&self, id: &BlockId) -> bool {
        self.inner.blocks.lock().contains_key(id)
    }

    /// Every materialized block, ordered by id.
    pub fn blocks(&self) -> Vec<Block> {
        self.inner.blocks.lock().values().cloned().collect()
    }

    pub fn block_count(&self) -> usize {
        self.inner.blocks.lock().len()
    }

    pub fn get_blocks_by_flavour(&self, flavour: &str) -> Vec<Block> {
        self.inner
            .blocks
            .lock()
            .values()
            .filter(|b| b.flavour() == flavour)
            .cloned()
            .collect()
    }

    pub fn get_parent(&self, id: &BlockId) -> Option<Arc<BlockModel>> {
        self.inner.parent_model(id)
    }

    /// The nearest materialized sibling before `id` in document order.
    pub fn get_prev(&self, id: &BlockId) -> Option<Arc<BlockModel>> {
        let (before, _) = self.inner.siblings(id)?;
        self.inner.resolve_models(&before).pop()
    }

    /// The nearest materialized sibling after `id` in document order.
    pub fn get_next(&self, id: &BlockId) -> Option<Arc<BlockModel>> {
        let (_, after) = self.inner.siblings(id)?;
        self.inner.resolve_models(&after).into_iter().next()
    }

    // ── Writes ──────────────────────────────────────────────────────

    fn ensure_writable(&self) -> StoreResult<()> {
        if self.is_disposed() {
            return Err(StoreError::Disposed(self.id().clone()));
        }
        if self.readonly() {
            return Err(StoreError::Readonly(self.id().clone()));
        }
        Ok(())
    }

    /// Runs `f` as one undoable transaction. See [`Doc::transact`].
    pub fn transact<R>(
        &self,
        f: impl FnOnce(&mut StoreTransaction<'_>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        self.ensure_writable()?;
        self.inner.doc.transact(f)
    }

    pub fn transact_without_history<R>(
        &self,
        f: impl FnOnce(&mut StoreTransaction<'_>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        self.ensure_writable()?;
        self.inner.doc.transact_without_history(f)
    }

    pub fn add_block(
        &self,
        flavour: &str,
        props: Value,
        parent: Option<&BlockId>,
        index: Option<usize>,
    ) -> StoreResult<BlockId> {
        self.transact(|tx| tx.add_block(flavour, props, parent, index))
    }

    pub fn update_block(&self, id: &BlockId, props: Value) -> StoreResult<()> {
        self.transact(|tx| tx.update_block(id, props))
    }

    pub fn delete_block(&self, id: &BlockId) -> StoreResult<()> {
        self.transact(|tx| tx.delete_block(id))
    }

    pub fn delete_block_with(&self, id: &BlockId, options: DeleteOptions) -> StoreResult<()> {
        self.transact(|tx| tx.delete_block_with(id, options))
    }

    pub fn move_blocks(
        &self,
        ids: &[BlockId],
        parent: &BlockId,
        index: Option<usize>,
    ) -> StoreResult<()> {
        self.transact(|tx| tx.move_blocks(ids, parent, index))
    }

    pub fn insert_text(&self, id: &BlockId, index: usize, text: &str) -> StoreResult<()> {
        self.transact(|tx| tx.insert_text(id, index, text))
    }

    pub fn delete_text(&self, id: &BlockId, index: usize, len: usize) -> StoreResult<()> {
        self.transact(|tx| tx.delete_text(id, index, len))
    }

    // ── History ─────────────────────────────────────────────────────

    pub fn capture_sync(&self) {
        self.inner.doc.capture_sync();
    }

    pub fn undo(&self) -> StoreResult<bool> {
        self.ensure_writable()?;
        self.inner.doc.undo()
    }

    pub fn redo(&self) -> StoreResult<bool> {
        self.ensure_writable()?;
        self.inner.doc.redo()
    }

    pub fn can_undo(&self) -> bool {
        self.inner.doc.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.inner.doc.can_redo()
    }

    pub fn reset_history(&self) {
        self.inner.doc.reset_history();
    }

    /// Detaches every model and stops following the document. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl StoreInner {
    fn on_signal(self: &Arc<Self>, signal: &DocSignal) {
        match signal {
            DocSignal::Events(events) => self.reconcile(events),
            DocSignal::Ready => self.reconcile(&[]),
            DocSignal::Disposed => self.dispose(),
        }
    }

    pub(crate) fn resolve_models(&self, ids: &[BlockId]) -> Vec<Arc<BlockModel>> {
        let blocks = self.blocks.lock();
        ids.iter()
            .filter_map(|id| blocks.get(id).map(|b| Arc::clone(&b.model)))
            .collect()
    }

    pub(crate) fn parent_model(&self, id: &BlockId) -> Option<Arc<BlockModel>> {
        let parent = self.doc.space().parent_of(id).cloned()?;
        self.blocks.lock().get(&parent).map(|b| Arc::clone(&b.model))
    }

    /// Siblings of `id` before and after it, in order.
    fn siblings(&self, id: &BlockId) -> Option<(Vec<BlockId>, Vec<BlockId>)> {
        let space = self.doc.space();
        let parent = space.parent_of(id)?;
        let mut children = space.children_of(parent);
        let index = children.iter().position(|c| c == id)?;
        let after = children.split_off(index + 1);
        children.pop();
        Some((children, after))
    }

    /// View type of every block this store materializes.
    fn desired(&self) -> (BTreeMap<BlockId, (String, Role, ViewType)>, Option<BlockId>) {
        let space = self.doc.space();
        let schema = self.doc.schema();
        let root = crate::transaction::find_root(&space, schema);
        let views: BTreeMap<BlockId, ViewType> = match &self.query {
            Some(query) => query.resolve(&space),
            None => space
                .blocks()
                .map(|b| (b.id().clone(), ViewType::Display))
                .collect(),
        };
        let desired = views
            .into_iter()
            .filter(|(_, view)| *view != ViewType::Hidden)
            .filter_map(|(id, view)| {
                let block = space.get(&id)?;
                let role = schema.role(block.flavour()).unwrap_or(Role::Content);
                Some((id, (block.flavour().to_owned(), role, view)))
            })
            .collect();
        (desired, root)
    }

    /// Brings the model map in line with the document, then notifies.
    fn reconcile(self: &Arc<Self>, events: &[SpaceEvent]) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let (desired, root) = self.desired();

        let (added, removed) = {
            let mut blocks = self.blocks.lock();
            let gone: Vec<BlockId> = blocks
                .keys()
                .filter(|id| !desired.contains_key(*id))
                .cloned()
                .collect();
            let removed: Vec<Block> = gone.iter().filter_map(|id| blocks.remove(id)).collect();

            let mut added = Vec::new();
            for (id, (flavour, role, view_type)) in desired {
                match blocks.get_mut(&id) {
                    Some(block) => block.view_type = view_type,
                    None => {
                        let model = Arc::new(BlockModel::new(id.clone(), flavour, role));
                        added.push(Arc::clone(&model));
                        blocks.insert(id, Block { model, view_type });
                    }
                }
            }
            (added, removed)
        };

        let root = root.filter(|id| self.blocks.lock().contains_key(id));
        let previous_root = std::mem::replace(&mut *self.root.lock(), root.clone());

        if previous_root.is_some() && previous_root != root {
            if let Some(old) = &previous_root {
                self.root_deleted.emit(old);
            }
        }
        for block in removed {
            self.block_updated.emit(&BlockUpdate {
                id: block.id().clone(),
                flavour: block.flavour().to_owned(),
                kind: BlockUpdateKind::Delete,
            });
            block.model.detach();
        }
        let fresh: HashSet<BlockId> = added.iter().map(|m| m.id().clone()).collect();
        for model in &added {
            model.attach(Arc::downgrade(self));
            self.block_updated.emit(&BlockUpdate {
                id: model.id().clone(),
                flavour: model.flavour().to_owned(),
                kind: BlockUpdateKind::Add,
            });
        }
        self.notify(events, &fresh);
        if root.is_some() && previous_root != root {
            if let Some(new) = &root {
                self.root_added.emit(new);
            }
        }
    }

    /// Routes per-block events to models that existed before this batch.
    fn notify(&self, events: &[SpaceEvent], fresh: &HashSet<BlockId>) {
        for event in events {
            let id = event.block();
            if fresh.contains(id) {
                continue;
            }
            let Some(model) = self.blocks.lock().get(id).map(|b| Arc::clone(&b.model)) else {
                continue;
            };
            match event {
                SpaceEvent::PropChanged { key, .. } => {
                    model.notify_prop(key);
                    self.emit_update(&model, key);
                }
                SpaceEvent::TextChanged { .. } => {
                    model.notify_text();
                    self.emit_update(&model, crate::transaction::TEXT_PROP);
                }
                SpaceEvent::ChildrenChanged { .. } => model.invalidate_children(),
                SpaceEvent::BlockAdded { .. } | SpaceEvent::BlockRemoved { .. } => {}
            }
        }
    }

    fn emit_update(&self, model: &BlockModel, key: &str) {
        self.block_updated.emit(&BlockUpdate {
            id: model.id().clone(),
            flavour: model.flavour().to_owned(),
            kind: BlockUpdateKind::Update {
                key: key.to_owned(),
            },
        });
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.dispose();
        }
        let blocks = std::mem::take(&mut *self.blocks.lock());
        *self.root.lock() = None;
        for block in blocks.into_values() {
            block.model.detach();
        }
        self.root_added.dispose();
        self.root_deleted.dispose();
        self.block_updated.dispose();
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.get_mut().take() {
            subscription.dispose();
        }
    }
}
