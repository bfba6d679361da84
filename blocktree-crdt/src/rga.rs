//! Replicated Growable Array (RGA).
//!
//! An ordered sequence CRDT. Every element carries a globally unique
//! [`ElementId`] and the id of the element it was inserted after (its
//! *origin*). The visible order is a pure function of the element set, so
//! replicas holding the same elements agree on the order no matter in which
//! order the inserts arrived.
//!
//! Deleted elements stay in the set as tombstones. They keep anchoring the
//! elements inserted after them, and they let undo restore an element at its
//! exact former position by inserting a fresh element after the tombstone.
//!
//! Used for the child-id array of every block and for block text.

use blocktree_types::{HybridTimestamp, PeerId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Unique identifier for an element in a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementId {
    /// When this element was created.
    pub timestamp: HybridTimestamp,
    /// Which peer created this element.
    pub peer_id: PeerId,
    /// Per-peer sequence number.
    pub seq: u32,
}

impl ElementId {
    #[must_use]
    pub fn new(timestamp: HybridTimestamp, peer_id: PeerId, seq: u32) -> Self {
        Self {
            timestamp,
            peer_id,
            seq,
        }
    }

    /// The virtual head of every sequence ("before the first element").
    #[must_use]
    pub fn root() -> Self {
        Self {
            timestamp: HybridTimestamp::zero(),
            peer_id: PeerId::from_uuid(uuid::Uuid::nil()),
            seq: 0,
        }
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        *self == Self::root()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}:{}:{}",
            self.timestamp.wall_time(),
            self.timestamp.logical(),
            self.peer_id,
            self.seq
        )
    }
}

impl FromStr for ElementId {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (Some(time), Some(peer), Some(seq), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err("invalid ElementId format");
        };
        let (wall, logical) = time.split_once('.').ok_or("invalid timestamp")?;
        let wall: u64 = wall.parse().map_err(|_| "invalid wall time")?;
        let logical: u32 = logical.parse().map_err(|_| "invalid logical counter")?;
        let peer_id = PeerId::parse(peer).map_err(|_| "invalid peer id")?;
        let seq: u32 = seq.parse().map_err(|_| "invalid seq")?;
        Ok(Self::new(HybridTimestamp::new(wall, logical), peer_id, seq))
    }
}

impl PartialOrd for ElementId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ElementId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.peer_id.cmp(&other.peer_id))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Element<T> {
    origin: ElementId,
    value: T,
    deleted: bool,
}

/// A Replicated Growable Array.
///
/// The RGA does not mint element ids itself; the owner supplies them so a
/// single clock orders every sequence of a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: Serialize",
    deserialize = "T: Deserialize<'de>"
))]
pub struct RGA<T> {
    #[serde(with = "elements_serde")]
    elements: HashMap<ElementId, Element<T>>,
}

/// Elements are keyed by their string form so the map survives JSON.
mod elements_serde {
    use super::{Element, ElementId};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::{BTreeMap, HashMap};

    pub fn serialize<S, T>(
        elements: &HashMap<ElementId, Element<T>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        let keyed: BTreeMap<String, &Element<T>> =
            elements.iter().map(|(k, v)| (k.to_string(), v)).collect();
        keyed.serialize(serializer)
    }

    pub fn deserialize<'de, D, T>(
        deserializer: D,
    ) -> Result<HashMap<ElementId, Element<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        let keyed: HashMap<String, Element<T>> = HashMap::deserialize(deserializer)?;
        keyed
            .into_iter()
            .map(|(k, v)| {
                let id: ElementId = k.parse().map_err(D::Error::custom)?;
                Ok((id, v))
            })
            .collect()
    }
}

impl<T> Default for RGA<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RGA<T> {
    /// Creates an empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            elements: HashMap::new(),
        }
    }

    /// Every element id in sequence order, tombstones included.
    ///
    /// Siblings sharing an origin are ordered by descending id, so the most
    /// recent concurrent insert after a given element comes first.
    #[must_use]
    pub fn element_ids_in_order(&self) -> Vec<ElementId> {
        let mut after: HashMap<ElementId, Vec<ElementId>> = HashMap::new();
        for (id, elem) in &self.elements {
            after.entry(elem.origin).or_default().push(*id);
        }
        for siblings in after.values_mut() {
            siblings.sort_unstable_by(|a, b| a.cmp(b));
        }

        let mut order = Vec::with_capacity(self.elements.len());
        let mut stack = vec![ElementId::root()];
        while let Some(current) = stack.pop() {
            if !current.is_root() {
                order.push(current);
            }
            // Ascending push means the largest sibling is popped first.
            if let Some(kids) = after.get(&current) {
                stack.extend(kids.iter().copied());
            }
        }
        order
    }

    fn visible_ids(&self) -> Vec<ElementId> {
        self.element_ids_in_order()
            .into_iter()
            .filter(|id| self.is_visible(id))
            .collect()
    }

    /// Visible elements with their ids, in order.
    pub fn iter(&self) -> impl Iterator<Item = (ElementId, &T)> {
        self.iter_all()
            .filter(|(_, _, visible)| *visible)
            .map(|(id, value, _)| (id, value))
    }

    /// Every element in order, tombstones included, with whether it is
    /// still visible.
    pub fn iter_all(&self) -> impl Iterator<Item = (ElementId, &T, bool)> {
        self.element_ids_in_order()
            .into_iter()
            .filter_map(|id| self.elements.get(&id).map(|e| (id, &e.value, !e.deleted)))
    }

    /// Number of visible elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.values().filter(|e| !e.deleted).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The value at a visible index.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.iter().nth(index).map(|(_, v)| v)
    }

    /// The id of the element at a visible index.
    #[must_use]
    pub fn element_id_at(&self, index: usize) -> Option<ElementId> {
        self.iter().nth(index).map(|(id, _)| id)
    }

    /// The value stored under an element id, if that element is visible.
    #[must_use]
    pub fn value_of(&self, id: &ElementId) -> Option<&T> {
        self.elements
            .get(id)
            .filter(|e| !e.deleted)
            .map(|e| &e.value)
    }

    /// The origin an insert at visible `index` must use.
    ///
    /// Index `0` anchors at the head; an index at or past the end anchors
    /// after the last element in sequence order.
    #[must_use]
    pub fn origin_for_index(&self, index: usize) -> ElementId {
        if index == 0 {
            return ElementId::root();
        }
        let order = self.element_ids_in_order();
        let mut seen = 0;
        for id in &order {
            if self.is_visible(id) {
                seen += 1;
                if seen == index {
                    return *id;
                }
            }
        }
        order.last().copied().unwrap_or_else(ElementId::root)
    }

    /// Visible position of an element.
    #[must_use]
    pub fn index_of(&self, target: &ElementId) -> Option<usize> {
        self.visible_ids().iter().position(|id| id == target)
    }

    /// Inserts `value` under a caller-supplied id, after `origin`.
    ///
    /// Inserting an id that already exists is a no-op, which keeps replayed
    /// operations idempotent.
    pub fn insert_with_id(&mut self, id: ElementId, origin: ElementId, value: T) {
        self.elements.entry(id).or_insert(Element {
            origin,
            value,
            deleted: false,
        });
    }

    /// Whether the id was ever part of this sequence.
    #[must_use]
    pub fn contains_element(&self, id: &ElementId) -> bool {
        self.elements.contains_key(id)
    }

    #[must_use]
    pub fn is_tombstoned(&self, id: &ElementId) -> bool {
        self.elements.get(id).is_some_and(|e| e.deleted)
    }

    fn is_visible(&self, id: &ElementId) -> bool {
        self.elements.get(id).is_some_and(|e| !e.deleted)
    }

    /// Merges another replica of the same sequence. Deletion wins.
    pub fn merge(&mut self, other: &Self)
    where
        T: Clone,
    {
        for (id, theirs) in &other.elements {
            match self.elements.get_mut(id) {
                Some(ours) => ours.deleted |= theirs.deleted,
                None => {
                    self.elements.insert(*id, theirs.clone());
                }
            }
        }
    }
}

impl<T: Clone> RGA<T> {
    /// Tombstones an element. Returns the removed value if it was visible.
    ///
    /// The value stays readable through [`RGA::iter_all`].
    pub fn delete_by_id(&mut self, id: &ElementId) -> Option<T> {
        let element = self.elements.get_mut(id).filter(|e| !e.deleted)?;
        element.deleted = true;
        Some(element.value.clone())
    }

    /// Visible values in order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().map(|(_, v)| v.clone()).collect()
    }
}

impl<T: PartialEq> RGA<T> {
    /// Id of the first visible element holding `value`.
    #[must_use]
    pub fn find(&self, value: &T) -> Option<ElementId> {
        self.iter().find(|(_, v)| *v == value).map(|(id, _)| id)
    }
}

impl RGA<char> {
    #[must_use]
    pub fn as_string(&self) -> String {
        self.iter().map(|(_, c)| *c).collect()
    }
}
