//! Undo/redo over full-document snapshots.
//!
//! Each recorded snapshot is stored as a pair of RFC 6902 patches (forward
//! and backward) against the previous one, so memory grows with the size of
//! the edits rather than the document. Traversal only rebuilds documents; it
//! never writes back to the entity store.

#[cfg(test)]
#[path = "history_test.rs"]
mod history_test;

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::json_patch::{Operation, apply_patch, create_patch};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub forward: Vec<Operation>,
    pub backward: Vec<Operation>,
    /// When the newer snapshot was taken.
    pub at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    current: Option<Value>,
    undo: VecDeque<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    limit: usize,
}

impl History {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { current: None, undo: VecDeque::new(), redo: Vec::new(), limit: limit.max(1) }
    }

    /// The document at the current position, once anything was recorded.
    #[must_use]
    pub fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    #[must_use]
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
        self.trim();
    }

    /// Record a new snapshot. The first call only sets the baseline.
    /// Returns `true` if an undo step was added.
    pub fn record(&mut self, doc: Value, now_ms: i64) -> bool {
        let Some(current) = &self.current else {
            self.current = Some(doc);
            return false;
        };

        let forward = create_patch(current, &doc);
        if forward.is_empty() {
            return false;
        }
        let backward = create_patch(&doc, current);

        self.undo.push_back(HistoryEntry { forward, backward, at_ms: now_ms });
        self.redo.clear();
        self.current = Some(doc);
        self.trim();
        true
    }

    /// Step back one snapshot and return it.
    pub fn undo(&mut self) -> Option<&Value> {
        let entry = self.undo.pop_back()?;
        self.step(&entry.backward);
        self.redo.push(entry);
        self.current.as_ref()
    }

    /// Step forward one snapshot and return it.
    pub fn redo(&mut self) -> Option<&Value> {
        let entry = self.redo.pop()?;
        self.step(&entry.forward);
        self.undo.push_back(entry);
        self.current.as_ref()
    }

    fn step(&mut self, ops: &[Operation]) {
        let Some(doc) = self.current.as_mut() else {
            return;
        };
        let failed = apply_patch(doc, ops).into_iter().filter(Result::is_err).count();
        if failed > 0 {
            warn!(failed, total = ops.len(), "history step applied partially");
        }
    }

    fn trim(&mut self) {
        while self.undo.len() > self.limit {
            self.undo.pop_front();
        }
    }
}
