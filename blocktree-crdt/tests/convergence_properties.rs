//! Property tests: replicas that integrate the same updates converge,
//! whatever order the updates arrive in, and resolve the same tree.

use blocktree_crdt::{BlockSpace, ElementId, Transaction, Update};
use blocktree_types::{BlockId, PeerId};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Action {
    SetProp { key: u8, value: i64 },
    ClearProp { key: u8 },
    InsertText { at: usize, text: String },
    DeleteText { at: usize, len: usize },
    AddChild { at: usize },
    RemoveChild { at: usize },
    Move { block: usize, target: usize },
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0u8..3, any::<i64>()).prop_map(|(key, value)| Action::SetProp { key, value }),
        (0u8..3).prop_map(|key| Action::ClearProp { key }),
        (0usize..20, "[a-z]{1,4}").prop_map(|(at, text)| Action::InsertText { at, text }),
        (0usize..20, 1usize..4).prop_map(|(at, len)| Action::DeleteText { at, len }),
        (0usize..10).prop_map(|at| Action::AddChild { at }),
        (0usize..10).prop_map(|at| Action::RemoveChild { at }),
        (0usize..16, 0usize..16).prop_map(|(block, target)| Action::Move { block, target }),
    ]
}

type Snapshot = BTreeMap<BlockId, (String, Vec<BlockId>, Map<String, Value>, Option<String>)>;

fn snapshot(space: &BlockSpace) -> Snapshot {
    space
        .blocks()
        .map(|b| {
            (
                b.id().clone(),
                (
                    b.flavour().to_owned(),
                    b.children(),
                    b.props().to_json(),
                    b.text(),
                ),
            )
        })
        .collect()
}

fn base() -> BlockSpace {
    let mut space = BlockSpace::new(PeerId::new());
    let mut tx = space.transact();
    tx.create_block("note".into(), "affine:note", false).unwrap();
    for name in ["p", "q", "r"] {
        tx.create_block(name.into(), "affine:paragraph", true).unwrap();
        tx.insert_child(&"note".into(), None, &name.into()).unwrap();
    }
    tx.commit();
    space
}

fn replica_of(origin: &BlockSpace) -> BlockSpace {
    let mut space = BlockSpace::new(PeerId::new());
    for update in origin.updates_since(&Default::default()) {
        space.apply_update(update);
    }
    space
}

/// Runs each action in its own transaction, skipping out-of-range ones.
fn perform(space: &mut BlockSpace, tag: &str, actions: &[Action]) {
    let note: BlockId = "note".into();
    let p: BlockId = "p".into();
    for (n, action) in actions.iter().enumerate() {
        let mut tx = space.transact();
        let text_len = tx.space().get(&p).and_then(|b| b.text()).map_or(0, |t| t.chars().count());
        let children = tx.space().children_of(&note);
        let ok = match action {
            Action::SetProp { key, value } => tx
                .set_prop(&p, &format!("k{key}"), Some(json!(value)))
                .is_ok(),
            Action::ClearProp { key } => tx.set_prop(&p, &format!("k{key}"), None).is_ok(),
            Action::InsertText { at, text } => tx.insert_text(&p, (*at).min(text_len), text).is_ok(),
            Action::DeleteText { at, len } => {
                *at + *len <= text_len && tx.delete_text(&p, *at, *len).is_ok()
            }
            Action::AddChild { at } => {
                let child: BlockId = format!("{tag}-{n}").into();
                tx.create_block(child.clone(), "affine:paragraph", true).is_ok()
                    && tx.insert_child(&note, Some((*at).min(children.len())), &child).is_ok()
            }
            Action::RemoveChild { at } => match children.get(*at) {
                Some(child) => tx.remove_child(&note, child).is_ok(),
                None => false,
            },
            Action::Move { block, target } => {
                let mut ids: Vec<BlockId> = tx.space().blocks().map(|b| b.id().clone()).collect();
                ids.sort();
                let block = ids[*block % ids.len()].clone();
                let target = ids[*target % ids.len()].clone();
                move_under(&mut tx, &block, &target)
            }
        };
        if ok {
            tx.commit();
        }
    }
}

/// Moves `block` to the end of `target`'s children, refusing moves into
/// its own subtree as the store does.
fn move_under(tx: &mut Transaction<'_>, block: &BlockId, target: &BlockId) -> bool {
    let mut current = Some(target.clone());
    for _ in 0..=tx.space().len() {
        let Some(id) = current else { break };
        if id == *block {
            return false;
        }
        current = tx.space().parent_of(&id).cloned();
    }
    let occurrences: Vec<(BlockId, ElementId)> = tx
        .space()
        .blocks()
        .flat_map(|b| {
            b.child_sequence()
                .iter()
                .filter(|(_, child)| *child == block)
                .map(|(element, _)| (b.id().clone(), element))
                .collect::<Vec<_>>()
        })
        .collect();
    occurrences
        .iter()
        .all(|(holder, element)| tx.remove_child_element(holder, *element).is_ok())
        && tx.insert_child(target, None, block).is_ok()
}

/// Each block lists exactly the blocks that name it as parent, and no
/// walk up the tree goes round.
fn check_tree(space: &BlockSpace) -> Result<(), TestCaseError> {
    let mut listed = 0;
    for block in space.blocks() {
        for child in space.children_of(block.id()) {
            prop_assert_eq!(space.parent_of(&child), Some(block.id()));
            listed += 1;
        }
        let mut current = block.id();
        let mut steps = 0;
        while let Some(parent) = space.parent_of(current) {
            steps += 1;
            prop_assert!(steps <= space.len(), "{} sits on a parent cycle", block.id());
            current = parent;
        }
    }
    prop_assert_eq!(listed, space.parent_index().len());
    Ok(())
}

fn tree(space: &BlockSpace) -> BTreeMap<BlockId, Vec<BlockId>> {
    space
        .blocks()
        .map(|b| (b.id().clone(), space.children_of(b.id())))
        .collect()
}

fn local_updates(space: &BlockSpace, since: &blocktree_crdt::VectorClock) -> Vec<Update> {
    space.updates_since(since)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn two_replicas_converge(
        left_actions in prop::collection::vec(action(), 0..12),
        right_actions in prop::collection::vec(action(), 0..12),
    ) {
        let origin = base();
        let mut left = replica_of(&origin);
        let mut right = replica_of(&origin);
        let shared = origin.state_vector().clone();

        perform(&mut left, "l", &left_actions);
        perform(&mut right, "r", &right_actions);

        let from_left = local_updates(&left, &shared);
        let from_right = local_updates(&right, &shared);

        // Deliver newest first so every update but the oldest has to wait.
        for u in from_right.iter().rev() {
            left.apply_update(u.clone());
        }
        for u in from_left.iter().rev() {
            right.apply_update(u.clone());
        }

        prop_assert_eq!(left.pending_len(), 0);
        prop_assert_eq!(right.pending_len(), 0);
        prop_assert_eq!(snapshot(&left), snapshot(&right));
        prop_assert_eq!(left.state_vector(), right.state_vector());
        prop_assert_eq!(tree(&left), tree(&right));
        check_tree(&left)?;
        check_tree(&right)?;
    }

    #[test]
    fn late_joiner_matches_after_interleaved_delivery(
        left_actions in prop::collection::vec(action(), 0..8),
        right_actions in prop::collection::vec(action(), 0..8),
    ) {
        let origin = base();
        let mut left = replica_of(&origin);
        let mut right = replica_of(&origin);
        perform(&mut left, "l", &left_actions);
        perform(&mut right, "r", &right_actions);
        for u in right.updates_since(left.state_vector()) {
            left.apply_update(u);
        }

        let mut joiner = BlockSpace::new(PeerId::new());
        let mut all = left.updates_since(&Default::default());
        all.reverse();
        for u in all {
            joiner.apply_update(u);
        }
        prop_assert_eq!(snapshot(&joiner), snapshot(&left));
        prop_assert_eq!(tree(&joiner), tree(&left));
        check_tree(&joiner)?;
    }
}
