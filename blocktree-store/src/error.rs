use blocktree_crdt::CrdtError;
use blocktree_schema::SchemaValidationError;
use blocktree_sync::SyncError;
use blocktree_types::{BlockId, DocId};

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by documents, stores and workspaces.
///
/// All of them are raised before any mutation reaches the document: a
/// failed call leaves the tree as it was.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    SchemaValidation(#[from] SchemaValidationError),

    #[error("parent block not found: {0}")]
    ParentNotFound(BlockId),

    #[error("block not found: {0}")]
    BlockNotFound(BlockId),

    #[error("block already exists: {0}")]
    DuplicateBlock(BlockId),

    #[error("doc not found: {0}")]
    DocNotFound(DocId),

    #[error("doc already exists: {0}")]
    DuplicateDoc(DocId),

    #[error("moving {block} under {parent} would create a cycle")]
    CyclicMove { block: BlockId, parent: BlockId },

    #[error("doc {0} is not loaded")]
    NotReady(DocId),

    #[error("doc {0} has been disposed")]
    Disposed(DocId),

    #[error("doc {0} is readonly")]
    Readonly(DocId),

    #[error("block {0} is not attached to a store")]
    Detached(BlockId),

    #[error("invalid props for {id}: {source}")]
    Props {
        id: BlockId,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Config(#[source] serde_json::Error),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Crdt(CrdtError),
}

impl From<CrdtError> for StoreError {
    fn from(err: CrdtError) -> Self {
        match err {
            CrdtError::BlockNotFound(id) => StoreError::BlockNotFound(id),
            CrdtError::DuplicateBlock(id) => StoreError::DuplicateBlock(id),
            other => StoreError::Crdt(other),
        }
    }
}
