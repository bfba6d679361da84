//! Undo/redo stacks of one document.
//!
//! An entry is the list of [`Change`]s it undoes. Consecutive local commits
//! join the top entry while they arrive within the capture timeout and no
//! capture boundary was set in between.

use blocktree_crdt::Change;
use std::time::{Duration, Instant};

/// How a commit is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Record {
    /// A regular local edit: goes to the undo stack and clears redo.
    Normal,
    /// Not recorded at all.
    Skip,
    /// The commit of an undo: its changes become a redo entry.
    Undo,
    /// The commit of a redo: its changes become an undo entry, redo is kept.
    Redo,
}

#[derive(Debug)]
pub(crate) struct History {
    undo: Vec<Vec<Change>>,
    redo: Vec<Vec<Change>>,
    capture_timeout: Duration,
    last: Option<Instant>,
    boundary: bool,
}

impl History {
    pub(crate) fn new(capture_timeout: Duration) -> Self {
        Self {
            undo: Vec::new(),
            redo: Vec::new(),
            capture_timeout,
            last: None,
            boundary: true,
        }
    }

    /// Records committed changes. Returns whether either stack changed.
    pub(crate) fn record(&mut self, mode: Record, changes: Vec<Change>, now: Instant) -> bool {
        if changes.is_empty() {
            return false;
        }
        match mode {
            Record::Skip => false,
            Record::Normal => {
                let joins = !self.boundary
                    && self
                        .last
                        .is_some_and(|at| now.duration_since(at) < self.capture_timeout);
                match self.undo.last_mut() {
                    Some(top) if joins => top.extend(changes),
                    _ => self.undo.push(changes),
                }
                self.redo.clear();
                self.last = Some(now);
                self.boundary = false;
                true
            }
            Record::Undo => {
                self.redo.push(changes);
                self.boundary = true;
                true
            }
            Record::Redo => {
                self.undo.push(changes);
                self.boundary = true;
                true
            }
        }
    }

    /// Closes the current entry; the next commit starts a new one.
    pub(crate) fn capture(&mut self) {
        self.boundary = true;
    }

    pub(crate) fn pop_undo(&mut self) -> Option<Vec<Change>> {
        self.undo.pop()
    }

    pub(crate) fn pop_redo(&mut self) -> Option<Vec<Change>> {
        self.redo.pop()
    }

    /// Puts back an entry whose revert failed.
    pub(crate) fn restore(&mut self, mode: Record, entry: Vec<Change>) {
        match mode {
            Record::Undo => self.undo.push(entry),
            Record::Redo => self.redo.push(entry),
            Record::Normal | Record::Skip => {}
        }
    }

    pub(crate) fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub(crate) fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
        self.last = None;
        self.boundary = true;
    }
}
