//! The editor scope commands run against.

use crate::manager::CommandManager;
use crate::selection::SelectionManager;
use blocktree_store::Store;
use std::fmt;
use std::sync::{Arc, Weak};

pub(crate) struct ScopeInner {
    store: Store,
    selection: SelectionManager,
    command: CommandManager,
}

/// A store together with its selection and command manager.
///
/// Every chain started from [`BlockStdScope::command`] carries the scope in
/// its context, reachable through [`Context::std`](crate::Context::std).
#[derive(Clone)]
pub struct BlockStdScope {
    inner: Arc<ScopeInner>,
}

impl fmt::Debug for BlockStdScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockStdScope")
            .field("doc", self.inner.store.id())
            .field("selection", &self.inner.selection.id())
            .finish()
    }
}

impl BlockStdScope {
    /// Selections are mirrored into the awareness store of the store's doc,
    /// when it has one.
    pub fn new(store: Store) -> Self {
        let awareness = store.doc().awareness().cloned();
        let selection = SelectionManager::new(format!("std:{}", store.id()), awareness);
        let inner = Arc::new_cyclic(|weak: &Weak<ScopeInner>| ScopeInner {
            store,
            selection,
            command: CommandManager::scoped(weak.clone()),
        });
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<ScopeInner>) -> Self {
        Self { inner }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn selection(&self) -> &SelectionManager {
        &self.inner.selection
    }

    pub fn command(&self) -> &CommandManager {
        &self.inner.command
    }
}
