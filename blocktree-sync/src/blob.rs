//! Blob storage and sync.
//!
//! Blobs are content addressed: the key of a blob is the hex sha-256 of
//! its bytes. Writes go to the main source first; shadows are best effort
//! and their failures only reach the error channel.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use blocktree_types::ErrorChannel;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Key of a blob: lowercase hex sha-256 of its content.
pub fn blob_key(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// A key/value store of blobs.
#[async_trait]
pub trait BlobSource: Send + Sync {
    fn name(&self) -> &str;

    /// Readonly sources are never written by the engine.
    fn readonly(&self) -> bool {
        false
    }

    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, data: Vec<u8>) -> SyncResult<()>;

    async fn delete(&self, key: &str) -> SyncResult<()>;

    async fn list(&self) -> SyncResult<Vec<String>>;
}

/// An in-memory [`BlobSource`].
#[derive(Debug)]
pub struct MemoryBlobSource {
    name: String,
    readonly: bool,
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
    offline: AtomicBool,
}

impl MemoryBlobSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            readonly: false,
            blobs: Mutex::new(BTreeMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// A source the engine reads from but never writes to.
    pub fn readonly_with(name: impl Into<String>, blobs: impl IntoIterator<Item = Vec<u8>>) -> Self {
        let blobs = blobs.into_iter().map(|b| (blob_key(&b), b)).collect();
        Self {
            name: name.into(),
            readonly: true,
            blobs: Mutex::new(blobs),
            offline: AtomicBool::new(false),
        }
    }

    /// While offline every call fails.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::source(&self.name, "offline"));
        }
        Ok(())
    }
}

impl Default for MemoryBlobSource {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl BlobSource for MemoryBlobSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn readonly(&self) -> bool {
        self.readonly
    }

    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        self.check_online()?;
        Ok(self.blobs.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, data: Vec<u8>) -> SyncResult<()> {
        self.check_online()?;
        self.blobs.lock().insert(key.to_owned(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> SyncResult<()> {
        self.check_online()?;
        self.blobs.lock().remove(key);
        Ok(())
    }

    async fn list(&self) -> SyncResult<Vec<String>> {
        self.check_online()?;
        Ok(self.blobs.lock().keys().cloned().collect())
    }
}

/// Configuration for the blob engine.
#[derive(Debug, Clone)]
pub struct BlobEngineConfig {
    /// Period of the background full sync.
    pub sync_interval: Duration,
    /// Larger blobs are rejected by [`BlobEngine::set`].
    pub max_blob_size: usize,
}

impl Default for BlobEngineConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(60),
            max_blob_size: 100 * 1024 * 1024,
        }
    }
}

/// Counts of one [`BlobEngine::sync`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobSyncStats {
    /// Blobs copied from shadows into the main source.
    pub downloaded: usize,
    /// Blobs copied from the main source into shadows.
    pub uploaded: usize,
}

struct BlobInner {
    config: BlobEngineConfig,
    main: Arc<dyn BlobSource>,
    shadows: Vec<Arc<dyn BlobSource>>,
    errors: ErrorChannel<SyncError>,
}

/// Reads and writes blobs across a main source and shadow sources.
pub struct BlobEngine {
    inner: Arc<BlobInner>,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl fmt::Debug for BlobEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobEngine")
            .field("main", &self.inner.main.name())
            .field("shadows", &self.inner.shadows.len())
            .finish()
    }
}

impl BlobEngine {
    pub fn new(
        main: Arc<dyn BlobSource>,
        shadows: Vec<Arc<dyn BlobSource>>,
        config: BlobEngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(BlobInner {
                config,
                main,
                shadows,
                errors: ErrorChannel::new("blob-engine"),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn errors(&self) -> &ErrorChannel<SyncError> {
        &self.inner.errors
    }

    /// Reads a blob from the main source, falling back to the shadows. A
    /// blob found only in a shadow is copied into the main source.
    pub async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        if let Some(data) = self.inner.main.get(key).await? {
            return Ok(Some(data));
        }
        for shadow in &self.inner.shadows {
            match shadow.get(key).await {
                Ok(Some(data)) => {
                    if !self.inner.main.readonly() {
                        self.inner.main.set(key, data.clone()).await?;
                    }
                    return Ok(Some(data));
                }
                Ok(None) => {}
                Err(e) => self.inner.errors.report(e),
            }
        }
        Ok(None)
    }

    /// Stores a blob and returns its key. The main source must accept the
    /// write; writable shadows are then written in turn.
    pub async fn set(&self, data: Vec<u8>) -> SyncResult<String> {
        let key = blob_key(&data);
        if data.len() > self.inner.config.max_blob_size {
            return Err(SyncError::Blob {
                key,
                message: format!(
                    "{} bytes exceeds the {} byte limit",
                    data.len(),
                    self.inner.config.max_blob_size
                ),
            });
        }
        if self.inner.main.readonly() {
            return Err(SyncError::Blob {
                key,
                message: format!("main source `{}` is readonly", self.inner.main.name()),
            });
        }
        self.inner.main.set(&key, data.clone()).await?;
        for shadow in self.inner.shadows.iter().filter(|s| !s.readonly()) {
            if let Err(e) = shadow.set(&key, data.clone()).await {
                self.inner.errors.report(e);
            }
        }
        Ok(key)
    }

    pub async fn delete(&self, key: &str) -> SyncResult<()> {
        self.inner.main.delete(key).await?;
        for shadow in self.inner.shadows.iter().filter(|s| !s.readonly()) {
            if let Err(e) = shadow.delete(key).await {
                self.inner.errors.report(e);
            }
        }
        Ok(())
    }

    /// Keys known to any source, sorted.
    pub async fn list(&self) -> SyncResult<Vec<String>> {
        let mut keys: BTreeSet<String> = self.inner.main.list().await?.into_iter().collect();
        for shadow in &self.inner.shadows {
            match shadow.list().await {
                Ok(found) => keys.extend(found),
                Err(e) => self.inner.errors.report(e),
            }
        }
        Ok(keys.into_iter().collect())
    }

    /// One full pass: copies blobs missing from the main source out of
    /// each shadow, and blobs missing from each writable shadow out of the
    /// main source.
    pub async fn sync(&self) -> SyncResult<BlobSyncStats> {
        self.inner.sync().await
    }

    /// Runs [`sync`](Self::sync) immediately and then every
    /// `sync_interval` until [`stop`](Self::stop).
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|(_, task)| !task.is_finished()) {
            return;
        }
        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(inner.config.sync_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = inner.sync().await {
                            inner.errors.report(e);
                        }
                    }
                }
            }
        });
        info!(source = self.inner.main.name(), "blob engine started");
        *running = Some((cancel, task));
    }

    pub fn stop(&self) {
        if let Some((cancel, task)) = self.running.lock().take() {
            cancel.cancel();
            task.abort();
            info!(source = self.inner.main.name(), "blob engine stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|(_, task)| !task.is_finished())
    }
}

impl Drop for BlobEngine {
    fn drop(&mut self) {
        if let Some((cancel, task)) = self.running.get_mut().take() {
            cancel.cancel();
            task.abort();
        }
    }
}

impl BlobInner {
    async fn copy(
        &self,
        key: &str,
        from: &Arc<dyn BlobSource>,
        to: &Arc<dyn BlobSource>,
    ) -> SyncResult<bool> {
        match from.get(key).await? {
            Some(data) => {
                to.set(key, data).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn sync(&self) -> SyncResult<BlobSyncStats> {
        let mut stats = BlobSyncStats::default();
        let mut main_keys: BTreeSet<String> = self.main.list().await?.into_iter().collect();

        for shadow in &self.shadows {
            let shadow_keys: BTreeSet<String> = match shadow.list().await {
                Ok(keys) => keys.into_iter().collect(),
                Err(e) => {
                    self.errors.report(e);
                    continue;
                }
            };

            if !self.main.readonly() {
                for key in shadow_keys.difference(&main_keys).cloned().collect::<Vec<_>>() {
                    match self.copy(&key, shadow, &self.main).await {
                        Ok(true) => {
                            stats.downloaded += 1;
                            main_keys.insert(key);
                        }
                        Ok(false) => {}
                        Err(e) => self.errors.report(e),
                    }
                }
            }

            if !shadow.readonly() {
                for key in main_keys.difference(&shadow_keys) {
                    match self.copy(key, &self.main, shadow).await {
                        Ok(true) => stats.uploaded += 1,
                        Ok(false) => {}
                        Err(e) => self.errors.report(e),
                    }
                }
            }
        }
        debug!(
            downloaded = stats.downloaded,
            uploaded = stats.uploaded,
            "blob sync pass"
        );
        Ok(stats)
    }
}
