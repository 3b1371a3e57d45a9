//! Last-known presence per tracked entity.
//!
//! The store is plain state: it is owned by the poll cycle runner, which is
//! its only writer. Readers go through the runner's lock.

mod transition;

pub use transition::detect;

use crate::models::Snapshot;
use rustc_hash::FxHashMap;

/// Holds at most one snapshot per entity id.
///
/// An id has no entry until its first successful fetch.
#[derive(Debug, Default)]
pub struct PresenceStore {
    entries: FxHashMap<String, Snapshot>,
}

impl PresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_id: &str) -> Option<&Snapshot> {
        self.entries.get(entity_id)
    }

    /// Unconditionally overwrite the entry for `entity_id`.
    pub fn set(&mut self, entity_id: impl Into<String>, snapshot: Snapshot) {
        self.entries.insert(entity_id.into(), snapshot);
    }

    pub fn remove(&mut self, entity_id: &str) -> Option<Snapshot> {
        self.entries.remove(entity_id)
    }

    /// Drop entries for ids the predicate rejects; returns the removed ids.
    pub fn retain_ids<F>(&mut self, mut keep: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        let mut removed: Vec<String> = self
            .entries
            .keys()
            .filter(|id| !keep(id.as_str()))
            .cloned()
            .collect();
        removed.sort();

        for id in &removed {
            self.entries.remove(id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every entry, sorted by entity id.
    pub fn snapshots(&self) -> Vec<Snapshot> {
        let mut all: Vec<Snapshot> = self.entries.values().cloned().collect();
        all.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        all
    }
}
