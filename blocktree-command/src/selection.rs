//! The local selection of one editor scope, mirrored into awareness so
//! other peers can render it.

use blocktree_sync::AwarenessStore;
use blocktree_types::{BlockId, PeerId, Slot};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// A caret or range inside one block's text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRange {
    pub block_id: BlockId,
    pub index: usize,
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Selection {
    /// A whole block.
    #[serde(rename_all = "camelCase")]
    Block { block_id: BlockId },
    /// A text range, possibly spanning from one block to another.
    Text {
        from: TextRange,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<TextRange>,
    },
}

impl Selection {
    pub fn block(id: impl Into<BlockId>) -> Self {
        Self::Block {
            block_id: id.into(),
        }
    }

    pub fn text(block_id: impl Into<BlockId>, index: usize, length: usize) -> Self {
        Self::Text {
            from: TextRange {
                block_id: block_id.into(),
                index,
                length,
            },
            to: None,
        }
    }

    /// Blocks this selection touches, in order.
    pub fn block_ids(&self) -> Vec<BlockId> {
        match self {
            Self::Block { block_id } => vec![block_id.clone()],
            Self::Text { from, to } => {
                let mut ids = vec![from.block_id.clone()];
                if let Some(to) = to {
                    if to.block_id != from.block_id {
                        ids.push(to.block_id.clone());
                    }
                }
                ids
            }
        }
    }
}

/// Holds the current selections and publishes every change.
pub struct SelectionManager {
    id: String,
    selections: Mutex<Vec<Selection>>,
    changed: Slot<Vec<Selection>>,
    awareness: Option<Arc<AwarenessStore>>,
}

impl SelectionManager {
    /// `id` keys this manager's entry in the awareness selection map.
    pub fn new(id: impl Into<String>, awareness: Option<Arc<AwarenessStore>>) -> Self {
        Self {
            id: id.into(),
            selections: Mutex::new(Vec::new()),
            changed: Slot::new(),
            awareness,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn changed(&self) -> &Slot<Vec<Selection>> {
        &self.changed
    }

    pub fn value(&self) -> Vec<Selection> {
        self.selections.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.lock().is_empty()
    }

    /// Replaces every selection.
    pub fn set(&self, selections: Vec<Selection>) {
        *self.selections.lock() = selections.clone();
        self.publish(&selections);
        self.changed.emit(&selections);
    }

    pub fn clear(&self) {
        self.set(Vec::new());
    }

    /// Block selections only, in selection order.
    pub fn selected_block_ids(&self) -> Vec<BlockId> {
        self.selections
            .lock()
            .iter()
            .filter_map(|s| match s {
                Selection::Block { block_id } => Some(block_id.clone()),
                Selection::Text { .. } => None,
            })
            .collect()
    }

    /// The text selection, if any.
    pub fn text(&self) -> Option<Selection> {
        self.selections
            .lock()
            .iter()
            .find(|s| matches!(s, Selection::Text { .. }))
            .cloned()
    }

    /// Selections other peers published under this manager's id.
    pub fn remote(&self) -> BTreeMap<PeerId, Vec<Selection>> {
        let Some(awareness) = &self.awareness else {
            return BTreeMap::new();
        };
        let local = awareness.client_id();
        awareness
            .states()
            .into_iter()
            .filter(|(peer, _)| *peer != local)
            .filter_map(|(peer, state)| {
                let raw = state.selection.get(&self.id)?;
                let parsed = raw
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect();
                Some((peer, parsed))
            })
            .collect()
    }

    fn publish(&self, selections: &[Selection]) {
        let Some(awareness) = &self.awareness else {
            return;
        };
        let values = selections
            .iter()
            .filter_map(|s| match serde_json::to_value(s) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(manager = %self.id, "dropping unserializable selection: {e}");
                    None
                }
            })
            .collect();
        awareness.set_local_selection(&self.id, values);
    }
}
