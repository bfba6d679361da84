//! The per-run context threaded through a command chain.

use crate::scope::BlockStdScope;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A typed name for one context entry.
///
/// Keys are compared by name; two keys with the same name and different
/// value types shadow each other, and a lookup through the wrong type
/// returns `None`.
pub struct CtxKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CtxKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for CtxKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CtxKey<T> {}

impl<T> fmt::Debug for CtxKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CtxKey({})", self.name)
    }
}

type Value = Arc<dyn Any + Send + Sync>;

/// Values accumulated by the commands of one run.
///
/// Cloning is cheap: entries are shared, and a `set` on a clone never shows
/// up in the original.
#[derive(Clone, Default)]
pub struct Context {
    std: Option<BlockStdScope>,
    values: HashMap<&'static str, Value>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Context")
            .field("std", &self.std.is_some())
            .field("keys", &keys)
            .finish()
    }
}

impl Context {
    /// An empty context, used for chain inputs and command outputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn seeded(std: Option<BlockStdScope>) -> Self {
        Self {
            std,
            values: HashMap::new(),
        }
    }

    /// The editor scope the run was started from.
    pub fn std(&self) -> anyhow::Result<&BlockStdScope> {
        self.std
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("command context has no std scope"))
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &CtxKey<T>) -> Option<&T> {
        self.values.get(key.name)?.downcast_ref::<T>()
    }

    /// Like [`Context::get`], failing with the key name when the entry is
    /// missing.
    pub fn require<T: Any + Send + Sync>(&self, key: &CtxKey<T>) -> anyhow::Result<&T> {
        self.get(key)
            .ok_or_else(|| anyhow::anyhow!("missing context value '{}'", key.name))
    }

    pub fn contains<T>(&self, key: &CtxKey<T>) -> bool {
        self.values.contains_key(key.name)
    }

    pub fn set<T: Any + Send + Sync>(&mut self, key: &CtxKey<T>, value: T) {
        self.values.insert(key.name, Arc::new(value));
    }

    /// Builder form of [`Context::set`].
    #[must_use]
    pub fn with<T: Any + Send + Sync>(mut self, key: &CtxKey<T>, value: T) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove<T>(&mut self, key: &CtxKey<T>) {
        self.values.remove(key.name);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Shallow merge: every entry of `other` overwrites the entry of the
    /// same name. The std scope is only taken from `other` when this
    /// context has none.
    pub fn merge(&mut self, other: Context) {
        if self.std.is_none() {
            self.std = other.std;
        }
        self.values.extend(other.values);
    }

    #[must_use]
    pub(crate) fn merged(&self, other: Context) -> Context {
        let mut ctx = self.clone();
        ctx.merge(other);
        ctx
    }
}
