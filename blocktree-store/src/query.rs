//! Partial materialization of a document.
//!
//! A [`Query`] assigns every live block a [`ViewType`]. Blocks resolved to
//! [`ViewType::Hidden`] get no model in the store, unless they are an
//! ancestor of a visible block: those become [`ViewType::Bypass`] so the
//! path from the root to every visible block stays intact.

use blocktree_crdt::{BlockSpace, YBlock};
use blocktree_types::BlockId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

/// How a materialized block is meant to be treated by views.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewType {
    /// Rendered with its content.
    #[default]
    Display,
    /// Present for structure only, e.g. the unmatched parent of a match.
    Bypass,
    /// Not materialized.
    Hidden,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Unmatched blocks are hidden.
    #[default]
    Strict,
    /// Unmatched blocks take the view type of their nearest matched
    /// ancestor, or display when there is none.
    Loose,
}

/// One entry of a query. Every criterion given must hold; an entry with no
/// criteria matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<BlockId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavour: Option<String>,
    /// Props that must be equal on the block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub props: Option<Map<String, Value>>,
    pub view_type: ViewType,
}

impl QueryMatch {
    pub fn id(id: impl Into<BlockId>, view_type: ViewType) -> Self {
        Self {
            id: Some(id.into()),
            view_type,
            ..Self::default()
        }
    }

    pub fn flavour(flavour: impl Into<String>, view_type: ViewType) -> Self {
        Self {
            flavour: Some(flavour.into()),
            view_type,
            ..Self::default()
        }
    }

    fn matches(&self, block: &YBlock) -> bool {
        if self.id.as_ref().is_some_and(|id| id != block.id()) {
            return false;
        }
        if self.flavour.as_deref().is_some_and(|f| f != block.flavour()) {
            return false;
        }
        self.props.as_ref().is_none_or(|props| {
            props
                .iter()
                .all(|(key, value)| block.prop(key) == Some(value))
        })
    }
}

/// Decides which blocks a store materializes. Entries are tried in order;
/// the first match wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub mode: QueryMode,
    pub matches: Vec<QueryMatch>,
}

impl Query {
    pub fn strict(matches: Vec<QueryMatch>) -> Self {
        Self {
            mode: QueryMode::Strict,
            matches,
        }
    }

    pub fn loose(matches: Vec<QueryMatch>) -> Self {
        Self {
            mode: QueryMode::Loose,
            matches,
        }
    }

    /// Whether every block is displayed regardless of the tree.
    pub fn is_trivial(&self) -> bool {
        self.mode == QueryMode::Loose && self.matches.is_empty()
    }

    /// Stable key of the query, used to cache stores per configuration.
    pub(crate) fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn own_view(&self, block: &YBlock) -> Option<ViewType> {
        self.matches
            .iter()
            .find(|m| m.matches(block))
            .map(|m| m.view_type)
    }

    /// View type of every live block of `space`.
    pub fn resolve(&self, space: &BlockSpace) -> BTreeMap<BlockId, ViewType> {
        if self.is_trivial() {
            return space
                .blocks()
                .map(|b| (b.id().clone(), ViewType::Display))
                .collect();
        }

        let parents = space.parent_index();
        let mut view: BTreeMap<BlockId, ViewType> = BTreeMap::new();

        let mut starts: Vec<&BlockId> = space
            .blocks()
            .map(YBlock::id)
            .filter(|id| !parents.contains_key(*id))
            .collect();
        starts.sort();

        for start in starts {
            if view.contains_key(start) {
                continue;
            }
            let mut stack = vec![(start.clone(), ViewType::Display)];
            while let Some((id, inherited)) = stack.pop() {
                let Some(block) = space.get(&id) else {
                    continue;
                };
                if view.contains_key(&id) {
                    continue;
                }
                let resolved = match (self.own_view(block), self.mode) {
                    (Some(own), _) => own,
                    (None, QueryMode::Strict) => ViewType::Hidden,
                    (None, QueryMode::Loose) => inherited,
                };
                view.insert(id.clone(), resolved);
                for child in space.children_of(&id).into_iter().rev() {
                    stack.push((child, resolved));
                }
            }
        }

        mark_bypass(&mut view, &parents);
        view
    }
}

/// Turns every hidden ancestor of a visible block into a bypass block.
fn mark_bypass(view: &mut BTreeMap<BlockId, ViewType>, parents: &HashMap<BlockId, BlockId>) {
    let visible: Vec<BlockId> = view
        .iter()
        .filter(|(_, v)| **v != ViewType::Hidden)
        .map(|(id, _)| id.clone())
        .collect();
    let mut walked: HashSet<BlockId> = HashSet::new();
    for id in visible {
        let mut current = id;
        while let Some(parent) = parents.get(&current) {
            if !walked.insert(parent.clone()) {
                break;
            }
            if let Some(v) = view.get_mut(parent) {
                if *v == ViewType::Hidden {
                    *v = ViewType::Bypass;
                }
            }
            current = parent.clone();
        }
    }
}
