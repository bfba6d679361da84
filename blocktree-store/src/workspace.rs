//! The workspace: many docs, their metadata and the sync engines.

use crate::config::WorkspaceConfig;
use crate::doc::Doc;
use crate::error::{StoreError, StoreResult};
use crate::meta::{DocMeta, DocMetaPatch, WorkspaceMeta};
use crate::store::{Store, StoreOptions};
use crate::transaction::StoreTransaction;
use blocktree_schema::Schema;
use blocktree_sync::{
    AwarenessEngine, AwarenessSource, AwarenessStore, BlobEngine, BlobSource, DocEngine,
    DocSource, MemoryBlobSource, NoopDocSource, SyncError,
};
use blocktree_types::{DocId, ErrorChannel, IdGenerator, NanoIdGenerator, PeerId, Slot};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Options of [`Workspace::create_doc`].
#[derive(Debug, Clone, Default)]
pub struct CreateDocOptions {
    /// Generated when `None`.
    pub id: Option<DocId>,
    /// Configuration of the returned store.
    pub store: StoreOptions,
}

impl CreateDocOptions {
    pub fn with_id(id: impl Into<DocId>) -> Self {
        Self {
            id: Some(id.into()),
            store: StoreOptions::default(),
        }
    }
}

/// Docs and metadata live under one lock so that a doc never exists
/// without its metadata or the other way round.
#[derive(Default)]
struct Registry {
    docs: BTreeMap<DocId, Arc<Doc>>,
    meta: WorkspaceMeta,
}

pub struct Workspace {
    config: WorkspaceConfig,
    schema: Arc<Schema>,
    id_gen: Arc<dyn IdGenerator>,
    peer: PeerId,
    registry: Mutex<Registry>,
    doc_engine: DocEngine,
    blob_engine: BlobEngine,
    awareness: AwarenessEngine,
    doc_created: Slot<DocId>,
    doc_removed: Slot<DocId>,
    doc_list_updated: Slot<()>,
}

impl fmt::Debug for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workspace")
            .field("id", &self.config.id)
            .field("peer", &self.peer)
            .field("docs", &self.registry.lock().docs.len())
            .finish()
    }
}

pub struct WorkspaceBuilder {
    config: WorkspaceConfig,
    schema: Arc<Schema>,
    id_gen: Arc<dyn IdGenerator>,
    peer: PeerId,
    doc_source: Arc<dyn DocSource>,
    doc_shadows: Vec<Arc<dyn DocSource>>,
    blob_source: Arc<dyn BlobSource>,
    blob_shadows: Vec<Arc<dyn BlobSource>>,
    awareness_sources: Vec<Arc<dyn AwarenessSource>>,
}

impl WorkspaceBuilder {
    pub fn config(mut self, config: WorkspaceConfig) -> Self {
        self.config = config;
        self
    }

    /// The generator every block and doc id of the workspace is drawn from.
    pub fn id_generator(mut self, id_gen: Arc<dyn IdGenerator>) -> Self {
        self.id_gen = id_gen;
        self
    }

    pub fn peer(mut self, peer: PeerId) -> Self {
        self.peer = peer;
        self
    }

    pub fn doc_source(mut self, source: Arc<dyn DocSource>) -> Self {
        self.doc_source = source;
        self
    }

    pub fn doc_shadow(mut self, source: Arc<dyn DocSource>) -> Self {
        self.doc_shadows.push(source);
        self
    }

    pub fn blob_source(mut self, source: Arc<dyn BlobSource>) -> Self {
        self.blob_source = source;
        self
    }

    pub fn blob_shadow(mut self, source: Arc<dyn BlobSource>) -> Self {
        self.blob_shadows.push(source);
        self
    }

    pub fn awareness_source(mut self, source: Arc<dyn AwarenessSource>) -> Self {
        self.awareness_sources.push(source);
        self
    }

    pub fn build(self) -> Workspace {
        let awareness = Arc::new(AwarenessStore::new(self.peer, self.config.flags.clone()));
        Workspace {
            doc_engine: DocEngine::new(
                self.doc_source,
                self.doc_shadows,
                self.config.doc_engine(),
            ),
            blob_engine: BlobEngine::new(
                self.blob_source,
                self.blob_shadows,
                self.config.blob_engine(),
            ),
            awareness: AwarenessEngine::new(awareness, self.awareness_sources),
            registry: Mutex::new(Registry {
                docs: BTreeMap::new(),
                meta: WorkspaceMeta {
                    name: self.config.id.clone(),
                    ..WorkspaceMeta::default()
                },
            }),
            config: self.config,
            schema: self.schema,
            id_gen: self.id_gen,
            peer: self.peer,
            doc_created: Slot::new(),
            doc_removed: Slot::new(),
            doc_list_updated: Slot::new(),
        }
    }
}

impl Workspace {
    /// A workspace with no remote: docs sync to nothing, blobs stay in
    /// memory.
    pub fn new(schema: Schema) -> Self {
        Self::builder(schema).build()
    }

    pub fn builder(schema: Schema) -> WorkspaceBuilder {
        WorkspaceBuilder {
            config: WorkspaceConfig::default(),
            schema: Arc::new(schema),
            id_gen: Arc::new(NanoIdGenerator::default()),
            peer: PeerId::new(),
            doc_source: Arc::new(NoopDocSource),
            doc_shadows: Vec::new(),
            blob_source: Arc::new(MemoryBlobSource::new("local")),
            blob_shadows: Vec::new(),
            awareness_sources: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn id_generator(&self) -> &Arc<dyn IdGenerator> {
        &self.id_gen
    }

    // ── Docs ────────────────────────────────────────────────────────

    pub fn doc_created(&self) -> &Slot<DocId> {
        &self.doc_created
    }

    pub fn doc_removed(&self) -> &Slot<DocId> {
        &self.doc_removed
    }

    /// Fires after any change to the doc list or to a doc's metadata.
    pub fn doc_list_updated(&self) -> &Slot<()> {
        &self.doc_list_updated
    }

    /// Creates and loads an empty doc, registers it with the doc engine and
    /// returns a store on it.
    pub fn create_doc(&self, options: CreateDocOptions) -> StoreResult<Store> {
        self.create_doc_with(options, |_| Ok(()))
    }

    /// Like [`Workspace::create_doc`], running `init` as the doc's first
    /// transaction. If `init` fails, the doc is not created.
    pub fn create_doc_with(
        &self,
        options: CreateDocOptions,
        init: impl FnOnce(&mut StoreTransaction<'_>) -> StoreResult<()>,
    ) -> StoreResult<Store> {
        let id = options
            .id
            .unwrap_or_else(|| DocId::from(self.id_gen.generate()));
        let doc = Doc::builder(id.clone(), Arc::clone(&self.schema))
            .peer(self.peer)
            .id_generator(Arc::clone(&self.id_gen))
            .sink(self.doc_engine.sink())
            .awareness(Arc::clone(self.awareness.store()))
            .capture_timeout(self.config.capture_timeout())
            .build();
        {
            let mut registry = self.registry.lock();
            if registry.docs.contains_key(&id) || registry.meta.doc(&id).is_some() {
                return Err(StoreError::DuplicateDoc(id));
            }
            registry.docs.insert(id.clone(), Arc::clone(&doc));
            registry.meta.add_doc(DocMeta::new(id.clone()));
        }
        if let Err(err) = doc.load_with(init) {
            let mut registry = self.registry.lock();
            registry.docs.remove(&id);
            registry.meta.remove_doc(&id);
            return Err(err);
        }
        self.doc_engine.add_doc(doc.clone());
        self.doc_engine.mark_as_ready(&id);
        info!(workspace = %self.config.id, doc = %id, "doc created");

        self.doc_created.emit(&id);
        self.doc_list_updated.emit(&());
        doc.get_store(options.store)
    }

    /// A store on an existing doc, configured by `options`. `None` when the
    /// doc does not exist.
    pub fn get_doc(&self, id: &DocId, options: StoreOptions) -> Option<Store> {
        let doc = self.doc(id)?;
        doc.get_store(options).ok()
    }

    /// The canonical doc behind every store of `id`.
    pub fn doc(&self, id: &DocId) -> Option<Arc<Doc>> {
        self.registry.lock().docs.get(id).cloned()
    }

    pub fn doc_ids(&self) -> Vec<DocId> {
        self.registry.lock().meta.doc_ids()
    }

    /// Removes a doc together with its metadata and disposes it.
    pub fn remove_doc(&self, id: &DocId) -> StoreResult<()> {
        let doc = {
            let mut registry = self.registry.lock();
            if registry.meta.remove_doc(id).is_none() {
                return Err(StoreError::DocNotFound(id.clone()));
            }
            registry.docs.remove(id)
        };
        if let Some(doc) = doc {
            doc.dispose();
        }
        self.doc_engine.remove_doc(id);
        info!(workspace = %self.config.id, doc = %id, "doc removed");

        self.doc_removed.emit(id);
        self.doc_list_updated.emit(&());
        Ok(())
    }

    pub fn meta(&self) -> WorkspaceMeta {
        self.registry.lock().meta.clone()
    }

    pub fn set_doc_meta(&self, id: &DocId, patch: DocMetaPatch) -> StoreResult<()> {
        if !self.registry.lock().meta.patch_doc(id, patch) {
            return Err(StoreError::DocNotFound(id.clone()));
        }
        self.doc_list_updated.emit(&());
        Ok(())
    }

    // ── Sync ────────────────────────────────────────────────────────

    pub fn doc_sync(&self) -> &DocEngine {
        &self.doc_engine
    }

    pub fn blob_sync(&self) -> &BlobEngine {
        &self.blob_engine
    }

    pub fn awareness(&self) -> &Arc<AwarenessStore> {
        self.awareness.store()
    }

    /// Failures of background doc sync.
    pub fn errors(&self) -> &ErrorChannel<SyncError> {
        self.doc_engine.errors()
    }

    /// Starts doc and blob sync and connects awareness. Must be called
    /// inside a Tokio runtime.
    pub fn start(&self) {
        self.doc_engine.start();
        self.blob_engine.start();
        self.awareness.connect();
        debug!(workspace = %self.config.id, "sync started");
    }

    /// Whether every local update has reached the main doc source.
    pub fn can_graceful_stop(&self) -> bool {
        self.doc_engine.can_graceful_stop()
    }

    /// Stops all sync at once. Unflushed updates stay queued in memory and
    /// are lost if the workspace is dropped.
    pub fn force_stop(&self) {
        self.doc_engine.force_stop();
        self.blob_engine.stop();
        self.awareness.disconnect();
    }

    /// Waits until every local update is flushed, then stops all sync.
    ///
    /// Returns [`SyncError::Aborted`] (as [`StoreError::Sync`]) when
    /// `cancel` fires first; sync keeps running in that case.
    pub async fn wait_for_graceful_stop(&self, cancel: Option<CancellationToken>) -> StoreResult<()> {
        self.doc_engine.wait_for_graceful_stop(cancel).await?;
        self.blob_engine.stop();
        self.awareness.disconnect();
        Ok(())
    }

    pub async fn wait_for_synced(&self) -> StoreResult<()> {
        self.doc_engine.wait_for_synced().await?;
        Ok(())
    }

    /// Stops sync and disposes every doc.
    pub fn dispose(&self) {
        self.force_stop();
        let docs: Vec<Arc<Doc>> = {
            let mut registry = self.registry.lock();
            registry.meta.docs.clear();
            std::mem::take(&mut registry.docs).into_values().collect()
        };
        for doc in docs {
            self.doc_engine.remove_doc(doc.id());
            doc.dispose();
        }
        self.awareness.store().destroy();
        self.doc_created.dispose();
        self.doc_removed.dispose();
        self.doc_list_updated.dispose();
    }
}
