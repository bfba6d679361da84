//! The reactive block model.
//!
//! A [`BlockModel`] is a handle on one materialized block of a store. It
//! holds the block's id and a weak reference to its store; props, text and
//! children are read from the document on demand. Changes are pushed to
//! subscribers through explicit [`Slot`]s instead of tracked signals.

use crate::error::{StoreError, StoreResult};
use crate::store::StoreInner;
use blocktree_schema::Role;
use blocktree_types::{BlockId, Slot};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Payload of [`BlockModel::props_updated`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropsUpdated {
    pub key: String,
}

pub struct BlockModel {
    id: BlockId,
    flavour: String,
    role: Role,
    store: Mutex<Weak<StoreInner>>,
    /// Memoized child ids; `None` until read or after the array changed.
    child_ids: Mutex<Option<Vec<BlockId>>>,
    created: Slot<()>,
    deleted: Slot<()>,
    props_updated: Slot<PropsUpdated>,
    children_updated: Slot<()>,
    text_updated: Slot<()>,
    created_fired: AtomicBool,
    deleted_fired: AtomicBool,
}

impl fmt::Debug for BlockModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockModel")
            .field("id", &self.id)
            .field("flavour", &self.flavour)
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl BlockModel {
    pub(crate) fn new(id: BlockId, flavour: String, role: Role) -> Self {
        Self {
            id,
            flavour,
            role,
            store: Mutex::new(Weak::new()),
            child_ids: Mutex::new(None),
            created: Slot::new(),
            deleted: Slot::new(),
            props_updated: Slot::new(),
            children_updated: Slot::new(),
            text_updated: Slot::new(),
            created_fired: AtomicBool::new(false),
            deleted_fired: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &BlockId {
        &self.id
    }

    pub fn flavour(&self) -> &str {
        &self.flavour
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Fires once, when the store starts routing document events to this
    /// model.
    pub fn created(&self) -> &Slot<()> {
        &self.created
    }

    /// Fires once, when the block is deleted or leaves the store's view.
    /// Every slot of the model is disposed right after.
    pub fn deleted(&self) -> &Slot<()> {
        &self.deleted
    }

    pub fn props_updated(&self) -> &Slot<PropsUpdated> {
        &self.props_updated
    }

    pub fn children_updated(&self) -> &Slot<()> {
        &self.children_updated
    }

    pub fn text_updated(&self) -> &Slot<()> {
        &self.text_updated
    }

    pub fn is_attached(&self) -> bool {
        self.store.lock().strong_count() > 0
    }

    fn store(&self) -> StoreResult<Arc<StoreInner>> {
        self.store
            .lock()
            .upgrade()
            .ok_or_else(|| StoreError::Detached(self.id.clone()))
    }

    /// Current props, defaults included.
    ///
    /// # Errors
    ///
    /// [`StoreError::Detached`] when the model is not attached to a live
    /// store, or its block is gone.
    pub fn props(&self) -> StoreResult<Map<String, Value>> {
        let store = self.store()?;
        let space = store.doc.space();
        space
            .get(&self.id)
            .map(|b| b.props().to_json())
            .ok_or_else(|| StoreError::Detached(self.id.clone()))
    }

    pub fn prop(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.props()?.remove(key))
    }

    /// Props deserialized into a typed struct, e.g. a flavour's props type.
    pub fn props_as<P: DeserializeOwned>(&self) -> StoreResult<P> {
        let props = self.props()?;
        serde_json::from_value(Value::Object(props)).map_err(|source| StoreError::Props {
            id: self.id.clone(),
            source,
        })
    }

    /// The text payload; `None` for flavours without text.
    pub fn text(&self) -> StoreResult<Option<String>> {
        let store = self.store()?;
        let space = store.doc.space();
        space
            .get(&self.id)
            .map(|b| b.text())
            .ok_or_else(|| StoreError::Detached(self.id.clone()))
    }

    /// Ids of the block's children in the document tree, memoized until
    /// they change.
    pub fn child_ids(&self) -> Vec<BlockId> {
        if let Some(ids) = self.child_ids.lock().clone() {
            return ids;
        }
        let Ok(store) = self.store() else {
            return Vec::new();
        };
        let ids = store.doc.space().children_of(&self.id);
        *self.child_ids.lock() = Some(ids.clone());
        ids
    }

    /// Materialized child models, in order.
    pub fn children(&self) -> Vec<Arc<BlockModel>> {
        let ids = self.child_ids();
        let Ok(store) = self.store() else {
            return Vec::new();
        };
        store.resolve_models(&ids)
    }

    /// Position of a child among [`BlockModel::children`].
    pub fn child_index(&self, child: &BlockId) -> Option<usize> {
        self.children().iter().position(|c| c.id() == child)
    }

    pub fn first_child(&self) -> Option<Arc<BlockModel>> {
        self.children().into_iter().next()
    }

    /// The deepest last descendant; the model itself when it has no
    /// children.
    pub fn last_child(self: &Arc<Self>) -> Arc<BlockModel> {
        let mut seen = HashSet::from([self.id.clone()]);
        let mut current = Arc::clone(self);
        while let Some(last) = current.children().pop() {
            if !seen.insert(last.id.clone()) {
                break;
            }
            current = last;
        }
        current
    }

    pub fn is_empty(&self) -> bool {
        self.children().is_empty()
    }

    pub fn parent(&self) -> Option<Arc<BlockModel>> {
        let store = self.store().ok()?;
        store.parent_model(&self.id)
    }

    pub(crate) fn attach(&self, store: Weak<StoreInner>) {
        *self.store.lock() = store;
        if !self.created_fired.swap(true, Ordering::SeqCst) {
            self.created.emit(&());
        }
    }

    pub(crate) fn detach(&self) {
        *self.store.lock() = Weak::new();
        *self.child_ids.lock() = None;
        if !self.deleted_fired.swap(true, Ordering::SeqCst) {
            self.deleted.emit(&());
            self.created.dispose();
            self.deleted.dispose();
            self.props_updated.dispose();
            self.children_updated.dispose();
            self.text_updated.dispose();
        }
    }

    pub(crate) fn invalidate_children(&self) {
        *self.child_ids.lock() = None;
        self.children_updated.emit(&());
    }

    pub(crate) fn notify_prop(&self, key: &str) {
        self.props_updated.emit(&PropsUpdated { key: key.to_owned() });
    }

    pub(crate) fn notify_text(&self) {
        self.text_updated.emit(&());
    }
}
