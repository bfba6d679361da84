//! Map of independent last-writer-wins registers.
//!
//! Each key resolves on its own, so concurrent writes to different keys never
//! conflict. Removal is a write of `None`; the register stays behind so a
//! stale concurrent write cannot resurrect the key.

use crate::LWWRegister;
use blocktree_types::{HybridTimestamp, PeerId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A string-keyed map of JSON values with per-key LWW resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LwwMap {
    entries: BTreeMap<String, LWWRegister<Option<Value>>>,
}

impl LwwMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key).and_then(|r| r.value().as_ref())
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Applies a write. Returns true if the observable value of the key
    /// changed.
    pub fn set(
        &mut self,
        key: &str,
        value: Option<Value>,
        timestamp: HybridTimestamp,
        peer: PeerId,
    ) -> bool {
        match self.entries.get_mut(key) {
            Some(register) => {
                let before = register.value().clone();
                register.write(value, timestamp, peer) && *register.value() != before
            }
            None => {
                let changed = value.is_some();
                self.entries.insert(
                    key.to_owned(),
                    LWWRegister::new(value, timestamp, peer),
                );
                changed
            }
        }
    }

    /// Live keys and values, sorted by key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .filter_map(|(k, r)| r.value().as_ref().map(|v| (k.as_str(), v)))
    }

    /// Live entries as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> Map<String, Value> {
        self.iter()
            .map(|(k, v)| (k.to_owned(), v.clone()))
            .collect()
    }

    /// Merges another replica key by key.
    pub fn merge(&mut self, other: &Self) {
        for (key, theirs) in &other.entries {
            match self.entries.get_mut(key) {
                Some(ours) => ours.merge(theirs),
                None => {
                    self.entries.insert(key.clone(), theirs.clone());
                }
            }
        }
    }
}
