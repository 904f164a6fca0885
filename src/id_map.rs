//! Strict one-to-one map between provisional and confirmed ids.
//!
//! DESIGN
//! ======
//! Two hash maps kept in lockstep. `set` evicts any previous pairing of
//! either side before inserting, so every provisional id resolves to at most
//! one confirmed id and vice versa.

use std::collections::HashMap;

use crate::model::EntityId;

#[derive(Debug, Clone, Default)]
pub struct IdMap {
    by_provisional: HashMap<EntityId, EntityId>,
    by_confirmed: HashMap<EntityId, EntityId>,
}

impl IdMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `provisional -> confirmed`, replacing any pairing either id had.
    pub fn set(&mut self, provisional: EntityId, confirmed: EntityId) {
        if let Some(old_confirmed) = self.by_provisional.remove(&provisional) {
            self.by_confirmed.remove(&old_confirmed);
        }
        if let Some(old_provisional) = self.by_confirmed.remove(&confirmed) {
            self.by_provisional.remove(&old_provisional);
        }
        self.by_provisional.insert(provisional, confirmed);
        self.by_confirmed.insert(confirmed, provisional);
    }

    #[must_use]
    pub fn get_by_provisional(&self, provisional: EntityId) -> Option<EntityId> {
        self.by_provisional.get(&provisional).copied()
    }

    #[must_use]
    pub fn get_by_confirmed(&self, confirmed: EntityId) -> Option<EntityId> {
        self.by_confirmed.get(&confirmed).copied()
    }

    #[must_use]
    pub fn has_provisional(&self, provisional: EntityId) -> bool {
        self.by_provisional.contains_key(&provisional)
    }

    #[must_use]
    pub fn has_confirmed(&self, confirmed: EntityId) -> bool {
        self.by_confirmed.contains_key(&confirmed)
    }

    /// Remove the pairing for a provisional id. Returns the confirmed side.
    pub fn delete_by_provisional(&mut self, provisional: EntityId) -> Option<EntityId> {
        let confirmed = self.by_provisional.remove(&provisional)?;
        self.by_confirmed.remove(&confirmed);
        Some(confirmed)
    }

    /// Remove the pairing for a confirmed id. Returns the provisional side.
    pub fn delete_by_confirmed(&mut self, confirmed: EntityId) -> Option<EntityId> {
        let provisional = self.by_confirmed.remove(&confirmed)?;
        self.by_provisional.remove(&provisional);
        Some(provisional)
    }

    /// Resolve any id to its server-side form: confirmed ids pass through,
    /// provisional ids go through the map.
    #[must_use]
    pub fn resolve(&self, id: EntityId) -> Option<EntityId> {
        if id.is_provisional() { self.get_by_provisional(id) } else { Some(id) }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_provisional.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_provisional.is_empty()
    }
}

#[cfg(test)]
#[path = "id_map_test.rs"]
mod id_map_test;
