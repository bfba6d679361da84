//! The per-document block CRDT.
//!
//! A [`BlockSpace`] holds every block of one document as a [`YBlock`]: an
//! immutable flavour, an LWW liveness flag, an [`LwwMap`] of props, an
//! [`RGA`] of child ids and an optional [`RGA`] of text characters.
//!
//! Local mutations go through a [`Transaction`]. A transaction applies its
//! operations immediately so later reads inside it see them; dropping it
//! without [`Transaction::commit`] restores every touched block. Committing
//! yields the [`Update`] to replicate, the [`Change`] list used for undo, and
//! the [`SpaceEvent`]s observers care about.
//!
//! Remote updates are integrated with [`BlockSpace::apply_update`] in causal
//! order; updates whose dependencies are missing wait in a pending queue.
//!
//! Child arrays are raw CRDT state: concurrent moves can leave a block in
//! several arrays, or close a parent cycle. The tree every reader sees is
//! the resolved one, where each block has at most one [`Placement`]:
//!
//! - among the live arrays holding a block, the parent with the smallest
//!   id wins, and within it the first occurrence;
//! - cycles are broken at their smallest block, which falls back to another
//!   live placement, then to the array it was most recently removed from,
//!   as long as that does not close a cycle again; with no such fallback it
//!   becomes a top-level block.
//!
//! The rules only read the merged state, so every replica resolves the same
//! tree.

use crate::{CrdtError, CrdtResult, ElementId, LWWRegister, LwwMap, Op, RGA, Update, VectorClock};
use blocktree_types::{BlockId, HybridTimestamp, PeerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

/// One block as stored in the CRDT.
#[derive(Debug, Clone, PartialEq)]
pub struct YBlock {
    id: BlockId,
    flavour: String,
    alive: LWWRegister<bool>,
    props: LwwMap,
    children: RGA<BlockId>,
    text: Option<RGA<char>>,
}

impl YBlock {
    fn new(id: BlockId, flavour: String, with_text: bool, at: HybridTimestamp, peer: PeerId) -> Self {
        Self {
            id,
            flavour,
            alive: LWWRegister::new(true, at, peer),
            props: LwwMap::new(),
            children: RGA::new(),
            text: with_text.then(RGA::new),
        }
    }

    #[must_use]
    pub fn id(&self) -> &BlockId {
        &self.id
    }

    #[must_use]
    pub fn flavour(&self) -> &str {
        &self.flavour
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        *self.alive.value()
    }

    #[must_use]
    pub fn prop(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }

    #[must_use]
    pub fn props(&self) -> &LwwMap {
        &self.props
    }

    /// The raw child array. It may name blocks resolved elsewhere; see
    /// [`BlockSpace::children_of`] for the tree view.
    #[must_use]
    pub fn children(&self) -> Vec<BlockId> {
        self.children.to_vec()
    }

    #[must_use]
    pub fn child_sequence(&self) -> &RGA<BlockId> {
        &self.children
    }

    #[must_use]
    pub fn has_child(&self, id: &BlockId) -> bool {
        self.children.find(id).is_some()
    }

    #[must_use]
    pub fn has_text(&self) -> bool {
        self.text.is_some()
    }

    #[must_use]
    pub fn text(&self) -> Option<String> {
        self.text.as_ref().map(RGA::as_string)
    }

    #[must_use]
    pub fn text_sequence(&self) -> Option<&RGA<char>> {
        self.text.as_ref()
    }
}

/// What observers of a space are told after a batch of operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SpaceEvent {
    BlockAdded { id: BlockId },
    BlockRemoved { id: BlockId },
    PropChanged { id: BlockId, key: String },
    ChildrenChanged { parent: BlockId },
    TextChanged { id: BlockId },
}

impl SpaceEvent {
    #[must_use]
    pub fn block(&self) -> &BlockId {
        match self {
            SpaceEvent::BlockAdded { id }
            | SpaceEvent::BlockRemoved { id }
            | SpaceEvent::PropChanged { id, .. }
            | SpaceEvent::TextChanged { id } => id,
            SpaceEvent::ChildrenChanged { parent } => parent,
        }
    }

    /// Whether the event can change the shape of the tree.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            SpaceEvent::BlockAdded { .. }
                | SpaceEvent::BlockRemoved { .. }
                | SpaceEvent::ChildrenChanged { .. }
        )
    }
}

/// A locally performed mutation, recorded with enough context to invert it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    Prop {
        id: BlockId,
        key: String,
        before: Option<Value>,
        after: Option<Value>,
    },
    Alive {
        id: BlockId,
        before: bool,
        after: bool,
    },
    ChildInserted {
        parent: BlockId,
        element: ElementId,
        child: BlockId,
    },
    ChildRemoved {
        parent: BlockId,
        element: ElementId,
        child: BlockId,
    },
    TextInserted {
        id: BlockId,
        element: ElementId,
    },
    TextRemoved {
        id: BlockId,
        element: ElementId,
        value: char,
    },
}

/// The result of committing a transaction.
#[derive(Debug, Clone, Default)]
pub struct Committed {
    /// `None` when the transaction performed no operation.
    pub update: Option<Update>,
    pub changes: Vec<Change>,
    pub events: Vec<SpaceEvent>,
}

/// Where a block sits in the resolved tree: its parent and the element of
/// the parent's child array that puts it there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub parent: BlockId,
    pub element: ElementId,
}

type Tree = HashMap<BlockId, Placement>;

/// All blocks of one document, plus replication state.
#[derive(Debug, Clone)]
pub struct BlockSpace {
    peer: PeerId,
    clock: HybridTimestamp,
    seq: u32,
    blocks: HashMap<BlockId, YBlock>,
    state: VectorClock,
    log: Vec<Update>,
    pending: Vec<Update>,
    tree: OnceLock<Arc<Tree>>,
}

impl BlockSpace {
    /// Creates an empty space for a replica identified by `peer`.
    #[must_use]
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            clock: HybridTimestamp::zero(),
            seq: 0,
            blocks: HashMap::new(),
            state: VectorClock::new(),
            log: Vec::new(),
            pending: Vec::new(),
            tree: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer
    }

    /// A live block.
    #[must_use]
    pub fn get(&self, id: &BlockId) -> Option<&YBlock> {
        self.blocks.get(id).filter(|b| b.is_alive())
    }

    /// A block whether or not it is alive.
    #[must_use]
    pub fn get_raw(&self, id: &BlockId) -> Option<&YBlock> {
        self.blocks.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &BlockId) -> bool {
        self.get(id).is_some()
    }

    /// Live blocks in no particular order.
    pub fn blocks(&self) -> impl Iterator<Item = &YBlock> {
        self.blocks.values().filter(|b| b.is_alive())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tree(&self) -> &Arc<Tree> {
        self.tree.get_or_init(|| Arc::new(resolve_tree(self)))
    }

    /// Maps every live block that has a parent to that parent.
    #[must_use]
    pub fn parent_index(&self) -> HashMap<BlockId, BlockId> {
        self.tree()
            .iter()
            .map(|(child, placement)| (child.clone(), placement.parent.clone()))
            .collect()
    }

    /// The parent of a block in the resolved tree.
    #[must_use]
    pub fn parent_of(&self, id: &BlockId) -> Option<&BlockId> {
        self.tree().get(id).map(|p| &p.parent)
    }

    #[must_use]
    pub fn placement(&self, id: &BlockId) -> Option<&Placement> {
        self.tree().get(id)
    }

    /// Children of `parent` in the resolved tree, in order, each with the
    /// element placing it. Indices given to
    /// [`Transaction::insert_child`] refer to this sequence.
    #[must_use]
    pub fn child_slots(&self, parent: &BlockId) -> Vec<(ElementId, BlockId)> {
        let Some(block) = self.get(parent) else {
            return Vec::new();
        };
        let tree = self.tree();
        block
            .children
            .iter_all()
            .filter(|(element, child, _)| {
                tree.get(*child)
                    .is_some_and(|p| p.parent == *parent && p.element == *element)
            })
            .map(|(element, child, _)| (element, child.clone()))
            .collect()
    }

    /// Children of `parent` in the resolved tree, in order.
    #[must_use]
    pub fn children_of(&self, parent: &BlockId) -> Vec<BlockId> {
        self.child_slots(parent).into_iter().map(|(_, c)| c).collect()
    }

    #[must_use]
    pub fn state_vector(&self) -> &VectorClock {
        &self.state
    }

    /// Updates integrated here that a replica at `state` has not seen.
    #[must_use]
    pub fn updates_since(&self, state: &VectorClock) -> Vec<Update> {
        self.log
            .iter()
            .filter(|u| !state.has_seen(&u.peer, u.clock))
            .cloned()
            .collect()
    }

    /// Remote updates waiting for their dependencies.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Opens a transaction.
    pub fn transact(&mut self) -> Transaction<'_> {
        let tree_before = Arc::clone(self.tree());
        Transaction {
            space: self,
            ops: Vec::new(),
            changes: Vec::new(),
            events: Vec::new(),
            snapshots: HashMap::new(),
            tree_before,
            committed: false,
        }
    }

    /// Integrates a remote update, plus any pending update it unblocks.
    ///
    /// Already-integrated updates are ignored, so delivery may repeat.
    pub fn apply_update(&mut self, update: Update) -> Vec<SpaceEvent> {
        let mut events = Vec::new();
        if self.state.has_seen(&update.peer, update.clock) {
            return events;
        }
        if !self.is_ready(&update) {
            if !self.pending.iter().any(|p| p.key() == update.key()) {
                tracing::debug!(peer = %update.peer, clock = update.clock, "deferring update");
                self.pending.push(update);
            }
            return events;
        }
        let before = Arc::clone(self.tree());
        self.integrate(update, &mut events);

        while let Some(pos) = self.pending.iter().position(|u| self.is_ready(u)) {
            let next = self.pending.swap_remove(pos);
            self.integrate(next, &mut events);
        }
        let state = &self.state;
        self.pending.retain(|u| !state.has_seen(&u.peer, u.clock));
        moved_parents(&before, self.tree(), &mut events);
        events
    }

    fn is_ready(&self, update: &Update) -> bool {
        update.clock == self.state.get(&update.peer) + 1
            && update
                .deps
                .peers()
                .all(|(peer, &clock)| *peer == update.peer || self.state.has_seen(peer, clock))
    }

    fn integrate(&mut self, update: Update, events: &mut Vec<SpaceEvent>) {
        for op in &update.ops {
            if let Err(err) = self.apply_op(op, update.peer, events) {
                tracing::warn!(peer = %update.peer, clock = update.clock, %err, "skipping remote op");
            }
        }
        self.state.update(update.peer, update.clock);
        self.log.push(update);
    }

    fn observe(&mut self, at: HybridTimestamp) {
        self.clock = self.clock.max(at);
    }

    fn tick(&mut self) -> HybridTimestamp {
        self.clock = self.clock.tick();
        self.clock
    }

    fn next_element(&mut self) -> ElementId {
        let at = self.tick();
        self.seq = self.seq.wrapping_add(1);
        ElementId::new(at, self.peer, self.seq)
    }

    fn block_mut(&mut self, id: &BlockId) -> CrdtResult<&mut YBlock> {
        self.blocks
            .get_mut(id)
            .ok_or_else(|| CrdtError::BlockNotFound(id.clone()))
    }

    fn apply_op(&mut self, op: &Op, peer: PeerId, events: &mut Vec<SpaceEvent>) -> CrdtResult<()> {
        if !matches!(op, Op::SetProp { .. } | Op::InsertText { .. } | Op::DeleteText { .. }) {
            self.tree.take();
        }
        match op {
            Op::CreateBlock {
                id,
                flavour,
                with_text,
                at,
            } => {
                self.observe(*at);
                if !self.blocks.contains_key(id) {
                    self.blocks.insert(
                        id.clone(),
                        YBlock::new(id.clone(), flavour.clone(), *with_text, *at, peer),
                    );
                    events.push(SpaceEvent::BlockAdded { id: id.clone() });
                }
            }
            Op::SetAlive { id, alive, at } => {
                self.observe(*at);
                let block = self.block_mut(id)?;
                let before = block.is_alive();
                block.alive.write(*alive, *at, peer);
                match (before, block.is_alive()) {
                    (false, true) => events.push(SpaceEvent::BlockAdded { id: id.clone() }),
                    (true, false) => events.push(SpaceEvent::BlockRemoved { id: id.clone() }),
                    _ => {}
                }
            }
            Op::SetProp { id, key, value, at } => {
                self.observe(*at);
                let block = self.block_mut(id)?;
                if block.props.set(key, value.clone(), *at, peer) {
                    events.push(SpaceEvent::PropChanged {
                        id: id.clone(),
                        key: key.clone(),
                    });
                }
            }
            Op::InsertChild {
                parent,
                element,
                origin,
                child,
            } => {
                self.observe(element.timestamp);
                let block = self.block_mut(parent)?;
                block.children.insert_with_id(*element, *origin, child.clone());
                events.push(SpaceEvent::ChildrenChanged {
                    parent: parent.clone(),
                });
            }
            Op::RemoveChild { parent, element } => {
                let block = self.block_mut(parent)?;
                if block.children.delete_by_id(element).is_some() {
                    events.push(SpaceEvent::ChildrenChanged {
                        parent: parent.clone(),
                    });
                }
            }
            Op::InsertText {
                id,
                element,
                origin,
                value,
            } => {
                self.observe(element.timestamp);
                let block = self.block_mut(id)?;
                let text = block
                    .text
                    .as_mut()
                    .ok_or_else(|| CrdtError::NoText(id.clone()))?;
                text.insert_with_id(*element, *origin, *value);
                events.push(SpaceEvent::TextChanged { id: id.clone() });
            }
            Op::DeleteText { id, element } => {
                let block = self.block_mut(id)?;
                let text = block
                    .text
                    .as_mut()
                    .ok_or_else(|| CrdtError::NoText(id.clone()))?;
                if text.delete_by_id(element).is_some() {
                    events.push(SpaceEvent::TextChanged { id: id.clone() });
                }
            }
        }
        Ok(())
    }
}

/// A batch of local mutations.
///
/// Mutations are visible through [`Transaction::space`] as soon as they are
/// made. Dropping the transaction without committing rolls all of them back.
pub struct Transaction<'a> {
    space: &'a mut BlockSpace,
    ops: Vec<Op>,
    changes: Vec<Change>,
    events: Vec<SpaceEvent>,
    snapshots: HashMap<BlockId, Option<YBlock>>,
    tree_before: Arc<Tree>,
    committed: bool,
}

impl Transaction<'_> {
    /// Read access to the space, including this transaction's effects.
    #[must_use]
    pub fn space(&self) -> &BlockSpace {
        &*self.space
    }

    /// Changes recorded so far.
    #[must_use]
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    fn snapshot(&mut self, id: &BlockId) {
        if !self.snapshots.contains_key(id) {
            let before = self.space.blocks.get(id).cloned();
            self.snapshots.insert(id.clone(), before);
        }
    }

    fn apply(&mut self, op: Op, change: Change) -> CrdtResult<()> {
        self.snapshot(&op.target().clone());
        let peer = self.space.peer;
        self.space.apply_op(&op, peer, &mut self.events)?;
        self.ops.push(op);
        self.changes.push(change);
        Ok(())
    }

    fn existing(&self, id: &BlockId) -> CrdtResult<&YBlock> {
        self.space
            .blocks
            .get(id)
            .ok_or_else(|| CrdtError::BlockNotFound(id.clone()))
    }

    fn text_of(&self, id: &BlockId) -> CrdtResult<&RGA<char>> {
        self.existing(id)?
            .text
            .as_ref()
            .ok_or_else(|| CrdtError::NoText(id.clone()))
    }

    /// Creates a live block. Ids are never reused, even after deletion.
    pub fn create_block(&mut self, id: BlockId, flavour: &str, with_text: bool) -> CrdtResult<()> {
        if self.space.blocks.contains_key(&id) {
            return Err(CrdtError::DuplicateBlock(id));
        }
        let at = self.space.tick();
        let change = Change::Alive {
            id: id.clone(),
            before: false,
            after: true,
        };
        let op = Op::CreateBlock {
            id,
            flavour: flavour.to_owned(),
            with_text,
            at,
        };
        self.apply(op, change)
    }

    pub fn set_alive(&mut self, id: &BlockId, alive: bool) -> CrdtResult<()> {
        let before = self.existing(id)?.is_alive();
        if before == alive {
            return Ok(());
        }
        let at = self.space.tick();
        self.apply(
            Op::SetAlive {
                id: id.clone(),
                alive,
                at,
            },
            Change::Alive {
                id: id.clone(),
                before,
                after: alive,
            },
        )
    }

    /// Writes one prop; `None` removes the key.
    pub fn set_prop(&mut self, id: &BlockId, key: &str, value: Option<Value>) -> CrdtResult<()> {
        let before = self.existing(id)?.prop(key).cloned();
        if before == value {
            return Ok(());
        }
        let at = self.space.tick();
        self.apply(
            Op::SetProp {
                id: id.clone(),
                key: key.to_owned(),
                value: value.clone(),
                at,
            },
            Change::Prop {
                id: id.clone(),
                key: key.to_owned(),
                before,
                after: value,
            },
        )
    }

    /// Inserts `child` at `index` of [`BlockSpace::child_slots`] of
    /// `parent` (append when `None`).
    pub fn insert_child(
        &mut self,
        parent: &BlockId,
        index: Option<usize>,
        child: &BlockId,
    ) -> CrdtResult<ElementId> {
        self.existing(parent)?;
        let slots = self.space.child_slots(parent);
        let len = slots.len();
        let index = index.unwrap_or(len);
        if index > len {
            return Err(CrdtError::IndexOutOfBounds { index, len });
        }
        let origin = match index.checked_sub(1) {
            Some(prev) => slots[prev].0,
            None => ElementId::root(),
        };
        self.insert_child_after(parent, origin, child)
    }

    /// Inserts `child` directly after the element `origin`, which may be a
    /// tombstone.
    pub fn insert_child_after(
        &mut self,
        parent: &BlockId,
        origin: ElementId,
        child: &BlockId,
    ) -> CrdtResult<ElementId> {
        let seq = &self.existing(parent)?.children;
        if !origin.is_root() && !seq.contains_element(&origin) {
            return Err(CrdtError::ElementNotFound {
                block: parent.clone(),
                element: origin,
            });
        }
        let element = self.space.next_element();
        self.apply(
            Op::InsertChild {
                parent: parent.clone(),
                element,
                origin,
                child: child.clone(),
            },
            Change::ChildInserted {
                parent: parent.clone(),
                element,
                child: child.clone(),
            },
        )?;
        Ok(element)
    }

    /// Removes `child` from `parent`'s children.
    pub fn remove_child(&mut self, parent: &BlockId, child: &BlockId) -> CrdtResult<ElementId> {
        let element = self
            .existing(parent)?
            .children
            .find(child)
            .ok_or_else(|| CrdtError::ChildNotFound {
                parent: parent.clone(),
                child: child.clone(),
            })?;
        self.remove_child_element(parent, element)?;
        Ok(element)
    }

    /// Tombstones one element of a child array. Already-removed elements are
    /// left alone.
    pub fn remove_child_element(&mut self, parent: &BlockId, element: ElementId) -> CrdtResult<()> {
        let Some(child) = self.existing(parent)?.children.value_of(&element).cloned() else {
            return Ok(());
        };
        self.apply(
            Op::RemoveChild {
                parent: parent.clone(),
                element,
            },
            Change::ChildRemoved {
                parent: parent.clone(),
                element,
                child,
            },
        )
    }

    /// Inserts `text` at character `index`.
    pub fn insert_text(&mut self, id: &BlockId, index: usize, text: &str) -> CrdtResult<()> {
        let seq = self.text_of(id)?;
        let len = seq.len();
        if index > len {
            return Err(CrdtError::IndexOutOfBounds { index, len });
        }
        let mut origin = seq.origin_for_index(index);
        for ch in text.chars() {
            origin = self.insert_char_after(id, origin, ch)?;
        }
        Ok(())
    }

    fn insert_char_after(&mut self, id: &BlockId, origin: ElementId, value: char) -> CrdtResult<ElementId> {
        let element = self.space.next_element();
        self.apply(
            Op::InsertText {
                id: id.clone(),
                element,
                origin,
                value,
            },
            Change::TextInserted {
                id: id.clone(),
                element,
            },
        )?;
        Ok(element)
    }

    /// Deletes `len` characters starting at `index`.
    pub fn delete_text(&mut self, id: &BlockId, index: usize, len: usize) -> CrdtResult<()> {
        let seq = self.text_of(id)?;
        let total = seq.len();
        match index.checked_add(len) {
            Some(end) if end <= total => {}
            end => {
                return Err(CrdtError::IndexOutOfBounds {
                    index: end.unwrap_or(usize::MAX),
                    len: total,
                });
            }
        }
        let doomed: Vec<ElementId> = seq.iter().skip(index).take(len).map(|(e, _)| e).collect();
        for element in doomed {
            self.delete_char(id, element)?;
        }
        Ok(())
    }

    fn delete_char(&mut self, id: &BlockId, element: ElementId) -> CrdtResult<()> {
        let Some(value) = self.text_of(id)?.value_of(&element).copied() else {
            return Ok(());
        };
        self.apply(
            Op::DeleteText {
                id: id.clone(),
                element,
            },
            Change::TextRemoved {
                id: id.clone(),
                element,
                value,
            },
        )
    }

    /// Replaces the whole text of a block.
    pub fn set_text(&mut self, id: &BlockId, text: &str) -> CrdtResult<()> {
        let len = self.text_of(id)?.len();
        self.delete_text(id, 0, len)?;
        self.insert_text(id, 0, text)
    }

    /// Applies the inverse of `changes`, newest first.
    ///
    /// Removed sequence elements come back as fresh elements inserted right
    /// after their tombstones, which puts them at their former position.
    pub fn revert(&mut self, changes: &[Change]) -> CrdtResult<()> {
        for change in changes.iter().rev() {
            match change {
                Change::Prop { id, key, before, .. } => self.set_prop(id, key, before.clone())?,
                Change::Alive { id, before, .. } => self.set_alive(id, *before)?,
                Change::ChildInserted { parent, element, .. } => {
                    self.remove_child_element(parent, *element)?;
                }
                Change::ChildRemoved {
                    parent,
                    element,
                    child,
                } => {
                    self.insert_child_after(parent, *element, child)?;
                }
                Change::TextInserted { id, element } => self.delete_char(id, *element)?,
                Change::TextRemoved { id, element, value } => {
                    self.insert_char_after(id, *element, *value)?;
                }
            }
        }
        Ok(())
    }

    /// Seals the transaction.
    pub fn commit(mut self) -> Committed {
        self.committed = true;
        let ops = std::mem::take(&mut self.ops);
        let changes = std::mem::take(&mut self.changes);
        let mut events = std::mem::take(&mut self.events);
        moved_parents(&self.tree_before, self.space.tree(), &mut events);
        let update = (!ops.is_empty()).then(|| {
            let deps = self.space.state.clone();
            let clock = self.space.state.increment(self.space.peer);
            let update = Update {
                peer: self.space.peer,
                clock,
                deps,
                ops,
            };
            self.space.log.push(update.clone());
            update
        });
        Committed {
            update,
            changes,
            events,
        }
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if !self.snapshots.is_empty() {
            self.space.tree.take();
        }
        for (id, before) in self.snapshots.drain() {
            match before {
                Some(block) => {
                    self.space.blocks.insert(id, block);
                }
                None => {
                    self.space.blocks.remove(&id);
                }
            }
        }
    }
}

/// Resolves the tree over the raw child arrays of `space`.
fn resolve_tree(space: &BlockSpace) -> Tree {
    let mut holders: Vec<&YBlock> = space.blocks().collect();
    holders.sort_by(|a, b| a.id.cmp(&b.id));

    let mut tree = Tree::new();
    let mut fallbacks: HashMap<BlockId, Vec<Placement>> = HashMap::new();
    let mut former: HashMap<BlockId, Vec<Placement>> = HashMap::new();
    for holder in holders {
        for (element, child, visible) in holder.children.iter_all() {
            if *child == holder.id || !space.contains(child) {
                continue;
            }
            let placement = Placement {
                parent: holder.id.clone(),
                element,
            };
            if !visible {
                former.entry(child.clone()).or_default().push(placement);
            } else if tree.contains_key(child) {
                fallbacks.entry(child.clone()).or_default().push(placement);
            } else {
                tree.insert(child.clone(), placement);
            }
        }
    }
    for (child, mut removed) in former {
        removed.sort_by(|a, b| b.element.cmp(&a.element));
        fallbacks.entry(child).or_default().extend(removed);
    }

    while let Some(cycle) = find_cycle(&tree) {
        let Some(smallest) = cycle.into_iter().min() else {
            break;
        };
        let replacement = fallbacks
            .get(&smallest)
            .into_iter()
            .flatten()
            .find(|p| !reaches(&tree, &p.parent, &smallest))
            .cloned();
        tracing::debug!(block = %smallest, reattached = replacement.is_some(), "breaking parent cycle");
        match replacement {
            Some(placement) => tree.insert(smallest, placement),
            None => tree.remove(&smallest),
        };
    }
    tree
}

/// The first parent cycle found walking up from each block in id order.
fn find_cycle(tree: &Tree) -> Option<Vec<BlockId>> {
    let mut starts: Vec<&BlockId> = tree.keys().collect();
    starts.sort();
    let mut cleared: HashSet<&BlockId> = HashSet::new();
    for start in starts {
        let mut path: Vec<&BlockId> = Vec::new();
        let mut current = start;
        while !cleared.contains(current) {
            if let Some(from) = path.iter().position(|id| *id == current) {
                return Some(path[from..].iter().map(|id| (*id).clone()).collect());
            }
            path.push(current);
            match tree.get(current) {
                Some(placement) => current = &placement.parent,
                None => break,
            }
        }
        cleared.extend(path);
    }
    None
}

/// Whether walking up from `from` (inclusive) meets `target`.
fn reaches(tree: &Tree, from: &BlockId, target: &BlockId) -> bool {
    let mut seen: HashSet<&BlockId> = HashSet::new();
    let mut current = from;
    loop {
        if current == target {
            return true;
        }
        if !seen.insert(current) {
            return false;
        }
        match tree.get(current) {
            Some(placement) => current = &placement.parent,
            None => return false,
        }
    }
}

/// Adds a [`SpaceEvent::ChildrenChanged`] for every parent that gained or
/// lost a child between two resolutions.
fn moved_parents(before: &Tree, after: &Tree, events: &mut Vec<SpaceEvent>) {
    if std::ptr::eq(before, after) {
        return;
    }
    let mut parents: Vec<&BlockId> = Vec::new();
    for (child, placement) in after {
        if before.get(child) != Some(placement) {
            parents.push(&placement.parent);
            if let Some(old) = before.get(child) {
                parents.push(&old.parent);
            }
        }
    }
    for (child, placement) in before {
        if !after.contains_key(child) {
            parents.push(&placement.parent);
        }
    }
    for parent in parents {
        let event = SpaceEvent::ChildrenChanged {
            parent: parent.clone(),
        };
        if !events.contains(&event) {
            events.push(event);
        }
    }
}
