//! Entity store: the single owner of entity state.
//!
//! DESIGN
//! ======
//! `EntityStore` holds one `Collection` per entity type. A collection keeps
//! the live entities, a tombstone set of removed ids, the provisional ->
//! confirmed `IdMap`, and the patch log of local mutations waiting to be
//! flushed. All mutation goes through `EntityStore` methods: local entry
//! points (`add`, `modify`, `remove`), sync reconciliation (`confirm`,
//! `forget`, `drain_log`, `requeue_front`) and poll application
//! (`insert_remote`, `remove_remote`, `apply_remote`).
//!
//! `SharedStore` wraps the store for the adapters. The lock is synchronous
//! and never held across an await point, so every mutation is atomic with
//! respect to the cooperative flush and poll tasks. Each write bumps a
//! revision published on a `watch` channel for UI subscribers. Adapters keep
//! a `WeakStore` so responses arriving after teardown are discarded.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use crate::clock::Clock;
use crate::diff::{Delta, apply_typed};
use crate::error::SyncError;
use crate::id_map::IdMap;
use crate::model::{Entity, EntityId, EntityKind, Guest, Item, LAST_UPDATE, Seat};
use crate::patch::Patch;

// =============================================================================
// COLLECTION
// =============================================================================

/// Keyed entities of one type plus their sync bookkeeping.
///
/// Tombstones are never pruned; they grow with every local delete for the
/// life of the store.
#[derive(Debug)]
pub struct Collection<E: Entity> {
    entities: BTreeMap<EntityId, E>,
    tombstones: HashSet<EntityId>,
    ids: IdMap,
    log: Vec<Patch<E>>,
}

impl<E: Entity> Default for Collection<E> {
    fn default() -> Self {
        Self { entities: BTreeMap::new(), tombstones: HashSet::new(), ids: IdMap::new(), log: Vec::new() }
    }
}

impl<E: Entity> Collection<E> {
    /// Look up an entity. Stale provisional ids resolve to their confirmed slot.
    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&E> {
        self.entities.get(&self.local_key(id))
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Entities ordered by id.
    pub fn values(&self) -> impl Iterator<Item = &E> {
        self.entities.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub fn ids(&self) -> &IdMap {
        &self.ids
    }

    #[must_use]
    pub fn is_tombstoned(&self, id: EntityId) -> bool {
        self.tombstones.contains(&id)
    }

    /// Number of patches waiting in the log.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.log.len()
    }

    /// The key an id is stored under right now.
    fn local_key(&self, id: EntityId) -> EntityId {
        if self.entities.contains_key(&id) {
            return id;
        }
        self.ids.get_by_provisional(id).unwrap_or(id)
    }

    fn insert_local(&mut self, entity: E) {
        let id = entity.id();
        self.log.push(Patch::Add { id, entity: entity.clone() });
        self.entities.insert(id, entity);
    }

    fn modify_local(&mut self, id: EntityId, partial: &Delta, now_ms: i64) -> Result<EntityId, SyncError> {
        let key = self.local_key(id);
        let partial = without_local_fields(partial);
        let entity = self
            .entities
            .get_mut(&key)
            .ok_or(SyncError::MissingEntity { kind: E::KIND, id })?;
        if partial.is_empty() {
            return Ok(key);
        }

        let mut updated = entity.clone();
        apply_typed(&mut updated, &partial).map_err(|source| SyncError::Shape { kind: E::KIND, source })?;
        updated.set_last_update(now_ms);
        *entity = updated;

        self.log.push(Patch::Mod { id: key, partial });
        Ok(key)
    }

    fn remove_local(&mut self, id: EntityId) -> Option<EntityId> {
        let key = self.local_key(id);
        self.entities.remove(&key)?;

        self.tombstones.insert(key);
        if let Some(counterpart) = self.counterpart(key) {
            self.tombstones.insert(counterpart);
        }
        self.log.push(Patch::Del { id: key });
        Some(key)
    }

    fn counterpart(&self, id: EntityId) -> Option<EntityId> {
        if id.is_provisional() { self.ids.get_by_provisional(id) } else { self.ids.get_by_confirmed(id) }
    }

    /// Rename a provisional slot to its confirmed id in one step.
    fn confirm(&mut self, provisional: EntityId, confirmed: EntityId) -> bool {
        self.ids.set(provisional, confirmed);

        let renamed = match self.entities.remove(&provisional) {
            Some(mut entity) => {
                entity.set_id(confirmed);
                if self.entities.insert(confirmed, entity).is_some() {
                    debug!(kind = %E::KIND, %confirmed, "rename replaced a poll-materialized copy");
                }
                true
            }
            None => false,
        };

        // Removed while the create was in flight: keep the confirmed id dead
        // until the queued delete goes out.
        if self.tombstones.contains(&provisional) {
            self.tombstones.insert(confirmed);
            self.entities.remove(&confirmed);
        }
        renamed
    }

    fn forget(&mut self, id: EntityId) {
        self.tombstones.insert(id);
        let counterpart = if id.is_provisional() {
            self.ids.delete_by_provisional(id)
        } else {
            self.ids.delete_by_confirmed(id)
        };
        if let Some(other) = counterpart {
            self.tombstones.insert(other);
        }
    }

    fn insert_remote(&mut self, entity: E) -> bool {
        if self.tombstones.contains(&entity.id()) {
            return false;
        }
        self.entities.insert(entity.id(), entity);
        true
    }

    fn apply_remote(&mut self, id: EntityId, partial: &Delta, server_ms: i64) -> Result<RemoteOutcome, SyncError> {
        let Some(entity) = self.entities.get_mut(&id) else {
            return Ok(RemoteOutcome::Missing);
        };
        if entity.last_update() > server_ms {
            return Ok(RemoteOutcome::Conflict { local_ms: entity.last_update() });
        }

        let partial = without_local_fields(partial);
        let mut updated = entity.clone();
        if !partial.is_empty() {
            apply_typed(&mut updated, &partial).map_err(|source| SyncError::Shape { kind: E::KIND, source })?;
        }
        updated.set_last_update(server_ms);
        *entity = updated;
        Ok(RemoteOutcome::Applied)
    }
}

fn without_local_fields(partial: &Delta) -> Delta {
    let mut cleaned = partial.clone();
    cleaned.remove("id");
    cleaned.remove(LAST_UPDATE);
    cleaned
}

/// Result of applying an inbound server change to a local entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    Applied,
    /// The local entity is newer; the inbound change was dropped.
    Conflict { local_ms: i64 },
    /// No local entity with that id.
    Missing,
}

// =============================================================================
// ENTITY STORE
// =============================================================================

/// The entity the UI currently has focused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Focus {
    pub kind: EntityKind,
    pub id: EntityId,
}

/// Pending patch counts per entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub items: usize,
    pub seats: usize,
    pub guests: usize,
}

impl PendingCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.items + self.seats + self.guests
    }
}

pub struct EntityStore {
    pub(crate) items: Collection<Item>,
    pub(crate) seats: Collection<Seat>,
    pub(crate) guests: Collection<Guest>,
    focused: Option<Focus>,
    next_provisional: i64,
    clock: Arc<dyn Clock>,
}

impl EntityStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            items: Collection::default(),
            seats: Collection::default(),
            guests: Collection::default(),
            focused: None,
            next_provisional: -1,
            clock,
        }
    }

    #[must_use]
    pub fn items(&self) -> &Collection<Item> {
        &self.items
    }

    #[must_use]
    pub fn seats(&self) -> &Collection<Seat> {
        &self.seats
    }

    #[must_use]
    pub fn guests(&self) -> &Collection<Guest> {
        &self.guests
    }

    #[must_use]
    pub fn collection<E: Entity>(&self) -> &Collection<E> {
        E::collection(self)
    }

    // -------------------------------------------------------------------------
    // Local mutations
    // -------------------------------------------------------------------------

    /// Insert a locally created entity under a fresh provisional id.
    pub fn add<E: Entity>(&mut self, mut entity: E) -> EntityId {
        let id = EntityId(self.next_provisional);
        self.next_provisional -= 1;
        entity.set_id(id);
        entity.set_last_update(self.clock.now_ms());
        E::collection_mut(self).insert_local(entity);
        id
    }

    /// Merge a partial update into an entity and queue it.
    ///
    /// # Errors
    ///
    /// Returns `MissingEntity` for an unknown id, or `Shape` when the partial
    /// does not fit the schema (the entity is left unchanged).
    pub fn modify<E: Entity>(&mut self, id: EntityId, partial: &Delta) -> Result<EntityId, SyncError> {
        let now = self.clock.now_ms();
        E::collection_mut(self).modify_local(id, partial, now)
    }

    /// Remove an entity, tombstone its ids, and queue the delete.
    /// Returns `false` if the entity did not exist.
    pub fn remove<E: Entity>(&mut self, id: EntityId) -> bool {
        let Some(key) = E::collection_mut(self).remove_local(id) else {
            return false;
        };
        if self.focused.is_some_and(|f| f.kind == E::KIND && (f.id == key || f.id == id)) {
            self.focused = None;
        }
        true
    }

    pub fn focus(&mut self, kind: EntityKind, id: EntityId) {
        self.focused = Some(Focus { kind, id });
    }

    pub fn clear_focus(&mut self) {
        self.focused = None;
    }

    #[must_use]
    pub fn focused(&self) -> Option<Focus> {
        self.focused
    }

    #[must_use]
    pub fn pending_counts(&self) -> PendingCounts {
        PendingCounts { items: self.items.pending(), seats: self.seats.pending(), guests: self.guests.pending() }
    }

    // -------------------------------------------------------------------------
    // Sync reconciliation
    // -------------------------------------------------------------------------

    /// Take the whole patch log of one entity type.
    pub fn drain_log<E: Entity>(&mut self) -> Vec<Patch<E>> {
        std::mem::take(&mut E::collection_mut(self).log)
    }

    /// Put patches back at the head of the log, ahead of newer ones.
    pub fn requeue_front<E: Entity>(&mut self, patches: Vec<Patch<E>>) {
        if patches.is_empty() {
            return;
        }
        let log = &mut E::collection_mut(self).log;
        let newer = std::mem::replace(log, patches);
        log.extend(newer);
    }

    /// Record a server-confirmed id and atomically rename the local slot.
    /// References from seats and the focus follow the rename.
    pub fn confirm<E: Entity>(&mut self, provisional: EntityId, confirmed: EntityId) -> bool {
        let renamed = E::collection_mut(self).confirm(provisional, confirmed);

        match E::KIND {
            EntityKind::Item => {
                for seat in self.seats.entities.values_mut() {
                    if seat.table_id == provisional {
                        seat.table_id = confirmed;
                    }
                }
            }
            EntityKind::Guest => {
                for seat in self.seats.entities.values_mut() {
                    if seat.guest_id == Some(provisional) {
                        seat.guest_id = Some(confirmed);
                    }
                }
            }
            EntityKind::Seat => {}
        }

        if self.focused == Some(Focus { kind: E::KIND, id: provisional }) {
            self.focused = Some(Focus { kind: E::KIND, id: confirmed });
        }
        renamed
    }

    /// Drop the id mapping of a deleted entity and tombstone both ids.
    pub fn forget<E: Entity>(&mut self, id: EntityId) {
        E::collection_mut(self).forget(id);
    }

    // -------------------------------------------------------------------------
    // Poll application
    // -------------------------------------------------------------------------

    /// Materialize an entity from the server. Returns `false` if tombstoned.
    pub fn insert_remote<E: Entity>(&mut self, entity: E) -> bool {
        E::collection_mut(self).insert_remote(entity)
    }

    /// Remove an entity the server no longer lists. Idempotent.
    pub fn remove_remote<E: Entity>(&mut self, id: EntityId) -> bool {
        let removed = E::collection_mut(self).entities.remove(&id).is_some();
        if removed && self.focused == Some(Focus { kind: E::KIND, id }) {
            self.focused = None;
        }
        removed
    }

    /// Apply an inbound partial under the last-write-wins rule.
    ///
    /// # Errors
    ///
    /// Returns `Shape` when the partial does not fit the schema.
    pub fn apply_remote<E: Entity>(
        &mut self,
        id: EntityId,
        partial: &Delta,
        server_ms: i64,
    ) -> Result<RemoteOutcome, SyncError> {
        E::collection_mut(self).apply_remote(id, partial, server_ms)
    }

    /// Full collection as one JSON document, for history snapshots.
    #[must_use]
    pub fn to_document(&self) -> Value {
        let mut doc = serde_json::Map::new();
        doc.insert("items".into(), collection_json(&self.items));
        doc.insert("seats".into(), collection_json(&self.seats));
        doc.insert("guests".into(), collection_json(&self.guests));
        Value::Object(doc)
    }
}

fn collection_json<E: Entity>(collection: &Collection<E>) -> Value {
    let values = collection.values().collect::<Vec<_>>();
    serde_json::to_value(values).unwrap_or(Value::Array(Vec::new()))
}

// =============================================================================
// SHARED HANDLES
// =============================================================================

struct StoreCell {
    store: Mutex<EntityStore>,
    revision: watch::Sender<u64>,
}

/// Cloneable handle to the entity store.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<StoreCell>,
}

impl SharedStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (revision, _) = watch::channel(0);
        Self { inner: Arc::new(StoreCell { store: Mutex::new(EntityStore::new(clock)), revision }) }
    }

    /// Run `f` with shared access.
    pub fn read<R>(&self, f: impl FnOnce(&EntityStore) -> R) -> R {
        f(&self.lock())
    }

    /// Run `f` with exclusive access and publish a new revision.
    pub fn write<R>(&self, f: impl FnOnce(&mut EntityStore) -> R) -> R {
        let result = f(&mut self.lock());
        self.inner.revision.send_modify(|rev| *rev += 1);
        result
    }

    /// Receive a notification after every store write.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakStore {
        WeakStore(Arc::downgrade(&self.inner))
    }

    fn lock(&self) -> MutexGuard<'_, EntityStore> {
        self.inner.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Non-owning handle held by adapters.
#[derive(Clone)]
pub struct WeakStore(Weak<StoreCell>);

impl WeakStore {
    /// `None` once the owning context has been torn down.
    #[must_use]
    pub fn upgrade(&self) -> Option<SharedStore> {
        self.0.upgrade().map(|inner| SharedStore { inner })
    }
}
