use crate::model::BlockModel;
use crate::query::ViewType;
use blocktree_types::BlockId;
use std::sync::Arc;

/// A materialized block: its model plus how the store's query sees it.
#[derive(Debug, Clone)]
pub struct Block {
    pub model: Arc<BlockModel>,
    pub view_type: ViewType,
}

impl Block {
    pub fn id(&self) -> &BlockId {
        self.model.id()
    }

    pub fn flavour(&self) -> &str {
        self.model.flavour()
    }
}
