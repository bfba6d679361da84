use crate::ElementId;
use blocktree_types::BlockId;

pub type CrdtResult<T> = Result<T, CrdtError>;

/// Errors raised by local mutations of a block space.
#[derive(Debug, thiserror::Error)]
pub enum CrdtError {
    #[error("block not found: {0}")]
    BlockNotFound(BlockId),

    #[error("block already exists: {0}")]
    DuplicateBlock(BlockId),

    #[error("block {0} carries no text")]
    NoText(BlockId),

    #[error("{child} is not a child of {parent}")]
    ChildNotFound { parent: BlockId, child: BlockId },

    #[error("element {element} does not belong to {block}")]
    ElementNotFound { block: BlockId, element: ElementId },

    #[error("index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("malformed update: {0}")]
    Decode(#[from] serde_json::Error),
}
