//! Block commands every editor scope ships with.
//!
//! Inputs and outputs travel through the context under the names in
//! [`keys`]. A command whose preconditions do not hold (no previous sibling,
//! nothing selected, ...) stops the chain without an error; an invalid
//! mutation is an error.

use crate::command::{Command, Next};
use crate::context::Context;
use anyhow::{Context as _, bail};
use blocktree_store::{BlockModel, DeleteOptions, Store};
use blocktree_types::BlockId;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

/// Context entries read and written by the built-in commands.
pub mod keys {
    use crate::context::CtxKey;
    use blocktree_store::BlockModel;
    use blocktree_types::BlockId;
    use serde_json::Value;
    use std::sync::Arc;

    /// The block a command acts on.
    pub const BLOCK_ID: CtxKey<BlockId> = CtxKey::new("blockId");
    /// The blocks a command acts on, in order.
    pub const BLOCK_IDS: CtxKey<Vec<BlockId>> = CtxKey::new("blockIds");
    pub const PARENT_ID: CtxKey<BlockId> = CtxKey::new("parentId");
    /// Position in `PARENT_ID`'s children.
    pub const INDEX: CtxKey<usize> = CtxKey::new("index");
    pub const FLAVOUR: CtxKey<String> = CtxKey::new("flavour");
    pub const PROPS: CtxKey<Value> = CtxKey::new("props");

    pub const PARENT_BLOCK: CtxKey<Arc<BlockModel>> = CtxKey::new("parentBlock");
    pub const BLOCK_INDEX: CtxKey<usize> = CtxKey::new("blockIndex");
    pub const PREV_BLOCK: CtxKey<Arc<BlockModel>> = CtxKey::new("prevBlock");
    pub const NEXT_BLOCK: CtxKey<Arc<BlockModel>> = CtxKey::new("nextBlock");
    pub const SELECTED_BLOCKS: CtxKey<Vec<Arc<BlockModel>>> = CtxKey::new("selectedBlocks");
    pub const INSERTED_ID: CtxKey<BlockId> = CtxKey::new("insertedId");
    /// The block `BLOCK_ID` would become the last child of when indented.
    pub const INDENT_TARGET: CtxKey<BlockId> = CtxKey::new("indentTarget");
}

use keys::*;

fn target(ctx: &Context) -> anyhow::Result<(&Store, &BlockId)> {
    Ok((ctx.std()?.store(), ctx.require(&BLOCK_ID)?))
}

/// Outputs `PARENT_BLOCK` and `BLOCK_INDEX` for `BLOCK_ID`.
pub struct GetBlockIndex;

impl Command for GetBlockIndex {
    fn name(&self) -> &str {
        "get_block_index"
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()> {
        let (store, id) = target(ctx)?;
        let Some(parent) = store.get_parent(id) else {
            return Ok(());
        };
        let Some(index) = parent.child_index(id) else {
            return Ok(());
        };
        next.with(
            Context::new()
                .with(&PARENT_BLOCK, parent)
                .with(&BLOCK_INDEX, index),
        );
        Ok(())
    }
}

/// Outputs `PREV_BLOCK`, the sibling before `BLOCK_ID`.
pub struct GetPrevBlock;

impl Command for GetPrevBlock {
    fn name(&self) -> &str {
        "get_prev_block"
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()> {
        let (store, id) = target(ctx)?;
        if let Some(prev) = store.get_prev(id) {
            next.with(Context::new().with(&PREV_BLOCK, prev));
        }
        Ok(())
    }
}

/// Outputs `NEXT_BLOCK`, the sibling after `BLOCK_ID`.
pub struct GetNextBlock;

impl Command for GetNextBlock {
    fn name(&self) -> &str {
        "get_next_block"
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()> {
        let (store, id) = target(ctx)?;
        if let Some(after) = store.get_next(id) {
            next.with(Context::new().with(&NEXT_BLOCK, after));
        }
        Ok(())
    }
}

/// Outputs `SELECTED_BLOCKS`: the block selections, or the blocks under the
/// text selection when no block is selected. Stops when nothing is.
pub struct GetSelectedBlocks;

impl Command for GetSelectedBlocks {
    fn name(&self) -> &str {
        "get_selected_blocks"
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()> {
        let std = ctx.std()?;
        let selection = std.selection();
        let mut ids = selection.selected_block_ids();
        if ids.is_empty() {
            ids = selection.text().map(|t| t.block_ids()).unwrap_or_default();
        }
        let models: Vec<Arc<BlockModel>> = ids
            .iter()
            .filter_map(|id| std.store().get_model(id))
            .collect();
        if !models.is_empty() {
            next.with(Context::new().with(&SELECTED_BLOCKS, models));
        }
        Ok(())
    }
}

/// Adds a `FLAVOUR` block with `PROPS`, either under `PARENT_ID` at `INDEX`
/// or right after `BLOCK_ID`. Outputs `INSERTED_ID`.
pub struct InsertBlock;

impl Command for InsertBlock {
    fn name(&self) -> &str {
        "insert_block"
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()> {
        let store = ctx.std()?.store();
        let flavour = ctx.require(&FLAVOUR)?;
        let props = ctx.get(&PROPS).cloned().unwrap_or_else(|| json!({}));

        let (parent, after) = if let Some(parent) = ctx.get(&PARENT_ID) {
            (parent.clone(), None)
        } else if let Some(sibling) = ctx.get(&BLOCK_ID) {
            let parent = store
                .doc()
                .with_space(|space| space.parent_of(sibling).cloned())
                .with_context(|| format!("block {sibling} has no parent to insert into"))?;
            (parent, Some(sibling))
        } else {
            bail!("insert_block needs '{}' or '{}'", PARENT_ID.name(), BLOCK_ID.name());
        };

        // Positions come from the document, not from this store's view,
        // which a query may have thinned out.
        let id = store.transact(|tx| {
            let index = match after {
                Some(sibling) => tx
                    .space()
                    .children_of(&parent)
                    .iter()
                    .position(|c| c == sibling)
                    .map(|i| i + 1),
                None => ctx.get(&INDEX).copied(),
            };
            tx.add_block(flavour, props, Some(&parent), index)
        })?;
        next.with(Context::new().with(&INSERTED_ID, id));
        Ok(())
    }
}

/// Deletes `BLOCK_IDS` (or the `SELECTED_BLOCKS`) with their subtrees in one
/// transaction and drops them from the selection.
pub struct DeleteBlocks;

impl Command for DeleteBlocks {
    fn name(&self) -> &str {
        "delete_blocks"
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()> {
        let std = ctx.std()?;
        let ids: Vec<BlockId> = match ctx.get(&BLOCK_IDS) {
            Some(ids) => ids.clone(),
            None => ctx
                .get(&SELECTED_BLOCKS)
                .map(|models| models.iter().map(|m| m.id().clone()).collect())
                .unwrap_or_default(),
        };
        if ids.is_empty() {
            return Ok(());
        }

        std.store().transact(|tx| {
            for id in &ids {
                // Already gone with an ancestor's subtree.
                if tx.block(id).is_some() {
                    tx.delete_block_with(id, DeleteOptions::subtree())?;
                }
            }
            Ok(())
        })?;

        let gone: HashSet<&BlockId> = ids.iter().collect();
        let current = std.selection().value();
        let kept: Vec<_> = current
            .iter()
            .filter(|s| {
                s.block_ids()
                    .iter()
                    .all(|id| !gone.contains(id) && std.store().has_block(id))
            })
            .cloned()
            .collect();
        if kept.len() != current.len() {
            std.selection().set(kept);
        }
        next.call();
        Ok(())
    }
}

/// Moves `BLOCK_IDS` under `PARENT_ID` at `INDEX` (appending without one).
pub struct MoveBlocks;

impl Command for MoveBlocks {
    fn name(&self) -> &str {
        "move_blocks"
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()> {
        let store = ctx.std()?.store();
        let ids = ctx.require(&BLOCK_IDS)?;
        let parent = ctx.require(&PARENT_ID)?;
        store.move_blocks(ids, parent, ctx.get(&INDEX).copied())?;
        next.call();
        Ok(())
    }
}

/// The previous sibling of `id`, when `id` may become its child.
fn indent_target(store: &Store, id: &BlockId) -> Option<BlockId> {
    let model = store.get_model(id)?;
    let prev = store.get_prev(id)?;
    store
        .doc()
        .schema()
        .is_valid(model.flavour(), prev.flavour())
        .then(|| prev.id().clone())
}

/// Outputs `INDENT_TARGET` when `BLOCK_ID` can be indented; stops otherwise.
pub struct CanIndentBlock;

impl Command for CanIndentBlock {
    fn name(&self) -> &str {
        "can_indent_block"
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()> {
        let (store, id) = target(ctx)?;
        if let Some(target) = indent_target(store, id) {
            next.with(Context::new().with(&INDENT_TARGET, target));
        }
        Ok(())
    }
}

/// Makes `BLOCK_ID` the last child of its previous sibling. Uses
/// `INDENT_TARGET` when an earlier command already resolved it.
pub struct IndentBlock;

impl Command for IndentBlock {
    fn name(&self) -> &str {
        "indent_block"
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()> {
        let (store, id) = target(ctx)?;
        let Some(target) = ctx
            .get(&INDENT_TARGET)
            .cloned()
            .or_else(|| indent_target(store, id))
        else {
            return Ok(());
        };
        store.move_blocks(std::slice::from_ref(id), &target, None)?;
        next.call();
        Ok(())
    }
}

/// Moves `BLOCK_ID` out of its parent to sit right after it. The siblings
/// that followed the block become its last children.
pub struct DedentBlock;

impl Command for DedentBlock {
    fn name(&self) -> &str {
        "dedent_block"
    }

    fn run(&self, ctx: &Context, next: Next<'_>) -> anyhow::Result<()> {
        let (store, id) = target(ctx)?;
        let Some(model) = store.get_model(id) else {
            return Ok(());
        };
        let Some(parent) = model.parent() else {
            return Ok(());
        };
        let Some(grandparent) = parent.parent() else {
            return Ok(());
        };
        if !store
            .doc()
            .schema()
            .is_valid(model.flavour(), grandparent.flavour())
        {
            return Ok(());
        }

        store.transact(|tx| {
            let following: Vec<BlockId> = tx
                .space()
                .children_of(parent.id())
                .into_iter()
                .skip_while(|s| s != id)
                .skip(1)
                .collect();
            let index = tx
                .space()
                .children_of(grandparent.id())
                .iter()
                .position(|c| c == parent.id())
                .map(|i| i + 1);
            if !following.is_empty() {
                tx.move_blocks(&following, id, None)?;
            }
            tx.move_blocks(std::slice::from_ref(id), grandparent.id(), index)
        })?;
        next.call();
        Ok(())
    }
}
