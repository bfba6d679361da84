//! Validated mutations of a document.
//!
//! A [`StoreTransaction`] wraps a CRDT transaction with the schema checks
//! and tree rules of the store. Every check of an operation runs before its
//! first write, and the whole transaction rolls back if the closure that
//! received it returns an error.

use crate::error::{StoreError, StoreResult};
use blocktree_crdt::{BlockSpace, Change, Committed, ElementId, Transaction, YBlock};
use blocktree_schema::{Role, Schema, SchemaValidationError};
use blocktree_types::{BlockId, IdGenerator};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Prop key that carries the initial text of flavours declared with text.
pub const TEXT_PROP: &str = "text";

/// What happens to the children of a deleted block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Cascade {
    /// Children stay in the document, detached from the tree.
    #[default]
    None,
    /// Children and all their descendants are deleted too.
    Subtree,
    /// Children take the deleted block's place in its parent.
    LiftChildren,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub cascade: Cascade,
}

impl DeleteOptions {
    pub fn subtree() -> Self {
        Self {
            cascade: Cascade::Subtree,
        }
    }

    pub fn lift_children() -> Self {
        Self {
            cascade: Cascade::LiftChildren,
        }
    }
}

pub struct StoreTransaction<'a> {
    tx: Transaction<'a>,
    schema: &'a Schema,
    id_gen: &'a dyn IdGenerator,
}

/// The live root-role block without a parent; the smallest id wins if
/// concurrent edits produced several.
pub(crate) fn find_root(space: &BlockSpace, schema: &Schema) -> Option<BlockId> {
    space
        .blocks()
        .filter(|b| schema.role(b.flavour()) == Some(Role::Root))
        .filter(|b| space.parent_of(b.id()).is_none())
        .map(|b| b.id().clone())
        .min()
}

fn into_map(flavour: &str, props: Value) -> StoreResult<Map<String, Value>> {
    match props {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map),
        other => Err(SchemaValidationError::new(
            flavour,
            format!("props must be an object, got {other}"),
        )
        .into()),
    }
}

impl<'a> StoreTransaction<'a> {
    pub(crate) fn new(tx: Transaction<'a>, schema: &'a Schema, id_gen: &'a dyn IdGenerator) -> Self {
        Self { tx, schema, id_gen }
    }

    /// The document as this transaction sees it.
    pub fn space(&self) -> &BlockSpace {
        self.tx.space()
    }

    pub fn block(&self, id: &BlockId) -> Option<&YBlock> {
        self.space().get(id)
    }

    pub fn parent_of(&self, id: &BlockId) -> Option<BlockId> {
        self.space().parent_of(id).cloned()
    }

    pub fn root_id(&self) -> Option<BlockId> {
        find_root(self.space(), self.schema)
    }

    fn require(&self, id: &BlockId) -> StoreResult<&YBlock> {
        self.block(id)
            .ok_or_else(|| StoreError::BlockNotFound(id.clone()))
    }

    /// Removes the `text` entry of a text-carrying flavour's props.
    fn take_text(&self, flavour: &str, props: &mut Map<String, Value>) -> Option<String> {
        let with_text = self.schema.get(flavour).is_some_and(|s| s.with_text);
        if !with_text || !props.get(TEXT_PROP).is_some_and(Value::is_string) {
            return None;
        }
        match props.remove(TEXT_PROP) {
            Some(Value::String(text)) => Some(text),
            _ => None,
        }
    }

    /// Adds a block with a fresh id and returns the id.
    ///
    /// `props` is a JSON object (or `null`) merged over the flavour's
    /// defaults. A string `text` prop becomes the initial text of flavours
    /// that carry text. An `index` past the end appends.
    pub fn add_block(
        &mut self,
        flavour: &str,
        props: Value,
        parent: Option<&BlockId>,
        index: Option<usize>,
    ) -> StoreResult<BlockId> {
        let id = BlockId::from(self.id_gen.generate());
        self.add_block_with_id(id, flavour, props, parent, index)
    }

    pub fn add_block_with_id(
        &mut self,
        id: BlockId,
        flavour: &str,
        props: Value,
        parent: Option<&BlockId>,
        index: Option<usize>,
    ) -> StoreResult<BlockId> {
        let schema = self.schema.require(flavour)?;
        let with_text = schema.with_text;
        let mut props = into_map(flavour, props)?;
        let text = self.take_text(flavour, &mut props);
        let props = self.schema.with_defaults(flavour, &props)?;
        self.schema.validate_props(flavour, &props)?;

        match parent {
            Some(parent) => {
                let parent_flavour = self
                    .block(parent)
                    .ok_or_else(|| StoreError::ParentNotFound(parent.clone()))?
                    .flavour()
                    .to_owned();
                self.schema.validate(flavour, Some(parent_flavour.as_str()), &[])?;
            }
            None => {
                self.schema.validate(flavour, None, &[])?;
                if let Some(root) = self.root_id() {
                    return Err(SchemaValidationError::new(
                        flavour,
                        format!("doc already has a root block: {root}"),
                    )
                    .into());
                }
            }
        }
        if self.space().get_raw(&id).is_some() {
            return Err(StoreError::DuplicateBlock(id));
        }

        self.tx.create_block(id.clone(), flavour, with_text)?;
        for (key, value) in props {
            self.tx.set_prop(&id, &key, Some(value))?;
        }
        if let Some(text) = text {
            self.tx.insert_text(&id, 0, &text)?;
        }
        if let Some(parent) = parent {
            let len = self.children_of(parent).len();
            let index = index.unwrap_or(len).min(len);
            self.tx.insert_child(parent, Some(index), &id)?;
        }
        Ok(id)
    }

    /// Merges `props` into a block's props. Nothing is written unless the
    /// merged props pass validation.
    pub fn update_block(&mut self, id: &BlockId, props: Value) -> StoreResult<()> {
        let block = self.require(id)?;
        let flavour = block.flavour().to_owned();
        let current = block.props().to_json();
        let mut patch = into_map(&flavour, props)?;
        let text = self.take_text(&flavour, &mut patch);

        let mut merged = current;
        merged.extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.schema.validate_props(&flavour, &merged)?;

        for (key, value) in patch {
            self.tx.set_prop(id, &key, Some(value))?;
        }
        if let Some(text) = text {
            self.tx.set_text(id, &text)?;
        }
        Ok(())
    }

    /// Deletes a block and detaches it from its parent. Its children are
    /// left in place, orphaned.
    pub fn delete_block(&mut self, id: &BlockId) -> StoreResult<()> {
        self.delete_block_with(id, DeleteOptions::default())
    }

    pub fn delete_block_with(&mut self, id: &BlockId, options: DeleteOptions) -> StoreResult<()> {
        self.require(id)?;
        match options.cascade {
            Cascade::None => {
                self.detach(id)?;
                self.tx.set_alive(id, false)?;
            }
            Cascade::Subtree => {
                let doomed = self.descendants(id);
                self.detach(id)?;
                self.tx.set_alive(id, false)?;
                for block in doomed {
                    self.tx.set_alive(&block, false)?;
                }
            }
            Cascade::LiftChildren => {
                let parent = self
                    .parent_of(id)
                    .ok_or_else(|| StoreError::ParentNotFound(id.clone()))?;
                let parent_flavour = self.require(&parent)?.flavour().to_owned();
                let children = self.children_of(id);
                for child in &children {
                    let flavour = self.require(child)?.flavour().to_owned();
                    self.schema.validate(&flavour, Some(parent_flavour.as_str()), &[])?;
                }
                for child in &children {
                    self.detach(child)?;
                }
                let position = self
                    .children_of(&parent)
                    .iter()
                    .position(|c| c == id)
                    .unwrap_or(0);
                self.detach(id)?;
                for (offset, child) in children.iter().enumerate() {
                    self.tx.insert_child(&parent, Some(position + offset), child)?;
                }
                self.tx.set_alive(id, false)?;
            }
        }
        Ok(())
    }

    /// Moves `ids` under `parent`, keeping their relative order. `index` is
    /// a position in the parent's children once the moved blocks have been
    /// taken out; `None` or an index past the end appends.
    pub fn move_blocks(
        &mut self,
        ids: &[BlockId],
        parent: &BlockId,
        index: Option<usize>,
    ) -> StoreResult<()> {
        let mut seen = HashSet::new();
        let ids: Vec<BlockId> = ids.iter().filter(|id| seen.insert(*id)).cloned().collect();

        let parent_flavour = self
            .block(parent)
            .ok_or_else(|| StoreError::ParentNotFound(parent.clone()))?
            .flavour()
            .to_owned();
        for id in &ids {
            let flavour = self.require(id)?.flavour().to_owned();
            self.schema.validate(&flavour, Some(parent_flavour.as_str()), &[])?;
        }

        let ancestry = self.ancestry(parent);
        if let Some(block) = ids.iter().find(|id| ancestry.contains(*id)) {
            return Err(StoreError::CyclicMove {
                block: block.clone(),
                parent: parent.clone(),
            });
        }

        for id in &ids {
            self.detach(id)?;
        }
        let len = self.children_of(parent).len();
        let start = index.unwrap_or(len).min(len);
        for (offset, id) in ids.iter().enumerate() {
            self.tx.insert_child(parent, Some(start + offset), id)?;
        }
        Ok(())
    }

    pub fn insert_text(&mut self, id: &BlockId, index: usize, text: &str) -> StoreResult<()> {
        self.require(id)?;
        self.tx.insert_text(id, index, text)?;
        Ok(())
    }

    pub fn delete_text(&mut self, id: &BlockId, index: usize, len: usize) -> StoreResult<()> {
        self.require(id)?;
        self.tx.delete_text(id, index, len)?;
        Ok(())
    }

    pub(crate) fn revert(&mut self, changes: &[Change]) -> StoreResult<()> {
        self.tx.revert(changes)?;
        Ok(())
    }

    pub(crate) fn commit(self) -> Committed {
        self.tx.commit()
    }

    /// Removes every occurrence of `id` from every child array, including
    /// the duplicates concurrent moves leave behind.
    fn detach(&mut self, id: &BlockId) -> StoreResult<()> {
        let occurrences: Vec<(BlockId, ElementId)> = self
            .space()
            .blocks()
            .flat_map(|b| {
                b.child_sequence()
                    .iter()
                    .filter(|(_, child)| *child == id)
                    .map(|(element, _)| (b.id().clone(), element))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (holder, element) in occurrences {
            self.tx.remove_child_element(&holder, element)?;
        }
        Ok(())
    }

    /// Children in the resolved tree; the sequence every index refers to.
    fn children_of(&self, id: &BlockId) -> Vec<BlockId> {
        self.space().children_of(id)
    }

    /// `id` and its ancestors, nearest first.
    fn ancestry(&self, id: &BlockId) -> Vec<BlockId> {
        let mut chain = vec![id.clone()];
        let mut current = id.clone();
        while let Some(parent) = self.parent_of(&current) {
            if chain.contains(&parent) {
                break;
            }
            chain.push(parent.clone());
            current = parent;
        }
        chain
    }

    fn descendants(&self, id: &BlockId) -> Vec<BlockId> {
        let mut seen: HashSet<BlockId> = HashSet::from([id.clone()]);
        let mut out = Vec::new();
        let mut stack = self.children_of(id);
        while let Some(next) = stack.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            stack.extend(self.children_of(&next));
            out.push(next);
        }
        out
    }
}
