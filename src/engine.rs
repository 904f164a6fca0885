//! The engine facade: UI entry points plus the timers that keep the store in
//! sync with the backend.
//!
//! DESIGN
//! ======
//! `SyncEngine` owns the `SharedStore` and one lane per entity type. A lane is
//! a `SyncAdapter` (outbound) and a `PollAdapter` (inbound) sharing the store
//! but no queue. After `start()`:
//!
//! - every entity type polls on its own `RepeatingTask`
//! - every local mutation retriggers that type's `DebouncedTask`, which
//!   flushes after the quiet period and again after `retry_delay` while
//!   patches are being requeued
//! - a snapshot task records `EntityStore::to_document()` into the undo
//!   history and mirrors the poll baselines to the cache file
//!
//! Timer closures capture adapters and a `WeakStore`, never the store itself,
//! so dropping the engine tears the store down even if a request is still in
//! flight. Its response is then discarded by the adapter.
//!
//! Flushes run items and guests before seats, since seat payloads reference
//! both.
//!
//! ERROR HANDLING
//! ==============
//! Entry points return `SyncError` only for local problems (unknown id, a
//! partial that does not fit the schema). Background failures are logged and
//! recorded on the `StatusBoard`; they never reach the caller.

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{Backend, HttpBackend};
use crate::cache::{CachedState, SnapshotCache};
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::diff::Delta;
use crate::error::SyncError;
use crate::history::History;
use crate::model::{Entity, EntityId, EntityKind, Guest, Item, Seat, from_wire};
use crate::poll::{PollAdapter, PollReport};
use crate::status::{LaneStatus, StatusBoard};
use crate::store::{EntityStore, Focus, PendingCounts, SharedStore, WeakStore};
use crate::sync::{FlushReport, SyncAdapter};
use crate::task::{DebouncedTask, RepeatingTask};

/// One value per entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerKind<T> {
    pub items: T,
    pub seats: T,
    pub guests: T,
}

impl<T> PerKind<T> {
    pub fn get(&self, kind: EntityKind) -> &T {
        match kind {
            EntityKind::Item => &self.items,
            EntityKind::Seat => &self.seats,
            EntityKind::Guest => &self.guests,
        }
    }
}

// =============================================================================
// LANES
// =============================================================================

struct Lane<E: Entity> {
    sync: Arc<SyncAdapter<E>>,
    poll: Arc<PollAdapter<E>>,
}

impl<E: Entity> Lane<E> {
    fn new(
        store: &SharedStore,
        backend: &Arc<dyn Backend>,
        config: &SyncConfig,
        status: &StatusBoard,
        clock: &Arc<dyn Clock>,
    ) -> Self {
        Self {
            sync: Arc::new(SyncAdapter::new(store, backend.clone(), config.max_send_attempts, status.clone())),
            poll: Arc::new(PollAdapter::new(store, backend.clone(), status.clone(), clock.clone())),
        }
    }

    fn start_poller(&self, config: &SyncConfig) -> RepeatingTask {
        let poll = self.poll.clone();
        RepeatingTask::start(E::KIND.collection(), config.poll_interval, move || {
            let poll = poll.clone();
            async move {
                poll_logged::<E>(&poll).await;
            }
        })
    }

    fn start_flusher(&self, config: &SyncConfig) -> DebouncedTask {
        let sync = self.sync.clone();
        let retry_delay = config.retry_delay;
        DebouncedTask::start(E::KIND.collection(), config.flush_debounce, move || {
            let sync = sync.clone();
            async move {
                sync.flush_until_settled(retry_delay).await;
            }
        })
    }
}

async fn poll_logged<E: Entity>(poll: &PollAdapter<E>) -> Option<PollReport> {
    match poll.poll().await {
        Ok(report) => report,
        Err(e) => {
            warn!(kind = %E::KIND, error = %e, code = e.error_code(), "poll failed; keeping last good state");
            None
        }
    }
}

fn restore_lane<E: Entity>(store: &mut EntityStore, state: &CachedState) -> usize {
    let mut restored = 0;
    for record in state.snapshot(E::KIND).records() {
        match from_wire::<E>(record) {
            Ok(entity) => {
                if store.insert_remote(entity) {
                    restored += 1;
                }
            }
            Err(e) => warn!(kind = %E::KIND, error = %e, code = e.error_code(), "cached record not restored"),
        }
    }
    restored
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

/// History capture plus cache mirroring, shared by the snapshot timer and
/// the explicit engine calls.
#[derive(Clone)]
struct SnapshotJob {
    store: WeakStore,
    history: Arc<Mutex<History>>,
    cache: Option<SnapshotCache>,
    clock: Arc<dyn Clock>,
    items: Arc<PollAdapter<Item>>,
    seats: Arc<PollAdapter<Seat>>,
    guests: Arc<PollAdapter<Guest>>,
}

impl SnapshotJob {
    /// Returns whether the history gained an entry.
    fn capture(&self) -> bool {
        let Some(store) = self.store.upgrade() else {
            return false;
        };
        let doc = store.read(EntityStore::to_document);
        let now = self.clock.now_ms();
        lock(&self.history).record(doc, now)
    }

    fn cached_state(&self) -> CachedState {
        let mut state = CachedState {
            history: Some(lock(&self.history).clone()),
            saved_at: self.clock.now_ms(),
            ..CachedState::default()
        };
        state.set_snapshot(EntityKind::Item, self.items.last_snapshot());
        state.set_snapshot(EntityKind::Seat, self.seats.last_snapshot());
        state.set_snapshot(EntityKind::Guest, self.guests.last_snapshot());
        state
    }

    async fn save(&self) -> Result<(), SyncError> {
        match &self.cache {
            Some(cache) => cache.save(&self.cached_state()).await,
            None => Ok(()),
        }
    }

    async fn run(&self) {
        if self.capture() {
            debug!("history snapshot recorded");
        }
        if let Err(e) = self.save().await {
            warn!(error = %e, code = e.error_code(), "cache mirror failed");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// ENGINE
// =============================================================================

#[derive(Default)]
struct Tasks {
    pollers: Vec<RepeatingTask>,
    flushers: HashMap<EntityKind, DebouncedTask>,
    snapshots: Option<RepeatingTask>,
}

pub struct SyncEngine {
    config: SyncConfig,
    store: SharedStore,
    status: StatusBoard,
    items: Lane<Item>,
    seats: Lane<Seat>,
    guests: Lane<Guest>,
    snapshots: SnapshotJob,
    tasks: Mutex<Option<Tasks>>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
        let store = SharedStore::new(clock.clone());
        let status = StatusBoard::new();
        let items = Lane::<Item>::new(&store, &backend, &config, &status, &clock);
        let seats = Lane::<Seat>::new(&store, &backend, &config, &status, &clock);
        let guests = Lane::<Guest>::new(&store, &backend, &config, &status, &clock);
        let snapshots = SnapshotJob {
            store: store.downgrade(),
            history: Arc::new(Mutex::new(History::new(config.history_limit))),
            cache: config.cache_path.clone().map(SnapshotCache::new),
            clock,
            items: items.poll.clone(),
            seats: seats.poll.clone(),
            guests: guests.poll.clone(),
        };
        Self { config, store, status, items, seats, guests, snapshots, tasks: Mutex::new(None) }
    }

    /// Engine talking HTTP to `config.base_url` on the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: SyncConfig) -> Result<Self, SyncError> {
        let backend = HttpBackend::new(&config.base_url, config.timeouts)?;
        Ok(Self::new(config, Arc::new(backend), Arc::new(SystemClock)))
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Restore the cache (if configured) and start polling, flushing and
    /// snapshot timers. Calling it on a running engine does nothing.
    pub async fn start(&self) {
        if self.is_running() {
            return;
        }
        if let Err(e) = self.restore_cache().await {
            warn!(error = %e, code = e.error_code(), "cache not restored; starting from the server");
        }

        let mut tasks = Tasks::default();
        tasks.pollers.push(self.items.start_poller(&self.config));
        tasks.pollers.push(self.guests.start_poller(&self.config));
        tasks.pollers.push(self.seats.start_poller(&self.config));
        tasks.flushers.insert(EntityKind::Item, self.items.start_flusher(&self.config));
        tasks.flushers.insert(EntityKind::Guest, self.guests.start_flusher(&self.config));
        tasks.flushers.insert(EntityKind::Seat, self.seats.start_flusher(&self.config));
        if let Some(period) = self.config.snapshot_interval {
            let job = self.snapshots.clone();
            tasks.snapshots = Some(RepeatingTask::start("snapshots", period, move || {
                let job = job.clone();
                async move { job.run().await }
            }));
        }
        *self.tasks_guard() = Some(tasks);

        info!(
            base_url = %self.config.base_url,
            poll_interval_ms = self.config.poll_interval.as_millis(),
            flush_debounce_ms = self.config.flush_debounce.as_millis(),
            "sync engine started"
        );
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tasks_guard().is_some()
    }

    /// Stop every timer and write a last cache mirror. A flush already
    /// sending is allowed to finish; anything it could not send, and anything
    /// queued after it, stays in the log for the next `flush_all`.
    pub async fn shutdown(&self) {
        let Some(Tasks { pollers, flushers, snapshots }) = self.tasks_guard().take() else {
            return;
        };
        drop(pollers);
        drop(snapshots);
        for flusher in flushers.into_values() {
            flusher.close().await;
        }
        if let Err(e) = self.snapshots.save().await {
            warn!(error = %e, code = e.error_code(), "final cache mirror failed");
        }
        info!(pending = self.pending_counts().total(), "sync engine stopped");
    }

    fn tasks_guard(&self) -> MutexGuard<'_, Option<Tasks>> {
        lock(&self.tasks)
    }

    fn schedule_flush(&self, kind: EntityKind) {
        if let Some(tasks) = self.tasks_guard().as_ref()
            && let Some(flusher) = tasks.flushers.get(&kind)
        {
            flusher.trigger();
        }
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Insert a new entity under a provisional id and queue its create.
    pub fn add<E: Entity>(&self, entity: E) -> EntityId {
        let id = self.store.write(|s| s.add(entity));
        debug!(kind = %E::KIND, %id, "entity added");
        self.schedule_flush(E::KIND);
        id
    }

    /// Merge a partial JSON object into an entity and queue the update.
    /// Returns the id the entity lives under now.
    ///
    /// # Errors
    ///
    /// Returns `Shape` if `partial` is not an object or does not fit the
    /// schema, and `MissingEntity` if the id is unknown.
    pub fn modify<E: Entity>(&self, id: EntityId, partial: Value) -> Result<EntityId, SyncError> {
        let Some(delta) = Delta::from_json(partial) else {
            return Err(SyncError::Shape {
                kind: E::KIND,
                source: serde::de::Error::custom("partial update must be a JSON object"),
            });
        };
        let id = self.store.write(|s| s.modify::<E>(id, &delta))?;
        debug!(kind = %E::KIND, %id, fields = delta.len(), "entity modified");
        self.schedule_flush(E::KIND);
        Ok(id)
    }

    /// Tombstone and delete an entity. Returns false if it was not present.
    pub fn remove<E: Entity>(&self, id: EntityId) -> bool {
        let removed = self.store.write(|s| s.remove::<E>(id));
        if removed {
            debug!(kind = %E::KIND, %id, "entity removed");
            self.schedule_flush(E::KIND);
        }
        removed
    }

    pub fn add_item(&self, item: Item) -> EntityId {
        self.add(item)
    }

    /// # Errors
    ///
    /// See [`SyncEngine::modify`].
    pub fn modify_item(&self, id: EntityId, partial: Value) -> Result<EntityId, SyncError> {
        self.modify::<Item>(id, partial)
    }

    pub fn remove_item(&self, id: EntityId) -> bool {
        self.remove::<Item>(id)
    }

    pub fn add_seat(&self, seat: Seat) -> EntityId {
        self.add(seat)
    }

    /// # Errors
    ///
    /// See [`SyncEngine::modify`].
    pub fn modify_seat(&self, id: EntityId, partial: Value) -> Result<EntityId, SyncError> {
        self.modify::<Seat>(id, partial)
    }

    pub fn remove_seat(&self, id: EntityId) -> bool {
        self.remove::<Seat>(id)
    }

    /// Put a guest on a seat, or clear it with `None`.
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::modify`].
    pub fn assign_guest(&self, seat: EntityId, guest: Option<EntityId>) -> Result<EntityId, SyncError> {
        self.modify::<Seat>(seat, serde_json::json!({ "guest_id": guest }))
    }

    pub fn add_guest(&self, guest: Guest) -> EntityId {
        self.add(guest)
    }

    /// # Errors
    ///
    /// See [`SyncEngine::modify`].
    pub fn modify_guest(&self, id: EntityId, partial: Value) -> Result<EntityId, SyncError> {
        self.modify::<Guest>(id, partial)
    }

    pub fn remove_guest(&self, id: EntityId) -> bool {
        self.remove::<Guest>(id)
    }

    /// # Errors
    ///
    /// Returns `MissingEntity` if the guest is unknown.
    pub fn set_guest_note(&self, id: EntityId, note: &str) -> Result<EntityId, SyncError> {
        self.modify::<Guest>(id, serde_json::json!({ "note": note }))
    }

    pub fn focus(&self, kind: EntityKind, id: EntityId) {
        self.store.write(|s| s.focus(kind, id));
    }

    pub fn clear_focus(&self) {
        self.store.write(EntityStore::clear_focus);
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn get<E: Entity>(&self, id: EntityId) -> Option<E> {
        self.store.read(|s| s.collection::<E>().get(id).cloned())
    }

    #[must_use]
    pub fn entities<E: Entity>(&self) -> Vec<E> {
        self.store.read(|s| s.collection::<E>().values().cloned().collect())
    }

    #[must_use]
    pub fn items(&self) -> Vec<Item> {
        self.entities()
    }

    #[must_use]
    pub fn seats(&self) -> Vec<Seat> {
        self.entities()
    }

    #[must_use]
    pub fn guests(&self) -> Vec<Guest> {
        self.entities()
    }

    #[must_use]
    pub fn focused(&self) -> Option<Focus> {
        self.store.read(EntityStore::focused)
    }

    #[must_use]
    pub fn pending_counts(&self) -> PendingCounts {
        self.store.read(EntityStore::pending_counts)
    }

    #[must_use]
    pub fn status(&self, kind: EntityKind) -> LaneStatus {
        self.status.get(kind)
    }

    /// Revision counter bumped on every store change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    // -------------------------------------------------------------------------
    // Sync on demand
    // -------------------------------------------------------------------------

    /// Flush every lane now, retrying requeued patches after `retry_delay`.
    /// A lane whose flush is already running reports `None`.
    pub async fn flush_all(&self) -> PerKind<Option<FlushReport>> {
        let retry_delay = self.config.retry_delay;
        let items = self.items.sync.flush_until_settled(retry_delay).await;
        let guests = self.guests.sync.flush_until_settled(retry_delay).await;
        let seats = self.seats.sync.flush_until_settled(retry_delay).await;
        PerKind { items, seats, guests }
    }

    /// Run one poll cycle per lane. Failed or skipped lanes report `None`;
    /// failures are also recorded on the status board.
    pub async fn poll_all(&self) -> PerKind<Option<PollReport>> {
        let items = poll_logged::<Item>(&self.items.poll).await;
        let guests = poll_logged::<Guest>(&self.guests.poll).await;
        let seats = poll_logged::<Seat>(&self.seats.poll).await;
        PerKind { items, seats, guests }
    }

    // -------------------------------------------------------------------------
    // History and cache
    // -------------------------------------------------------------------------

    /// Record the current store document into the history now.
    pub fn capture_snapshot(&self) -> bool {
        self.snapshots.capture()
    }

    /// Step back one history entry and return that document. The store is
    /// not touched; applying it is up to the caller.
    pub fn undo(&self) -> Option<Value> {
        lock(&self.snapshots.history).undo().cloned()
    }

    pub fn redo(&self) -> Option<Value> {
        lock(&self.snapshots.history).redo().cloned()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        lock(&self.snapshots.history).can_undo()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        lock(&self.snapshots.history).can_redo()
    }

    /// Mirror the poll baselines and history to the cache file now.
    ///
    /// # Errors
    ///
    /// Returns `Cache` if the file cannot be written.
    pub async fn save_cache(&self) -> Result<(), SyncError> {
        self.snapshots.save().await
    }

    /// Seed the store, poll baselines and history from the cache file.
    /// Returns false when no cache is configured or none was written yet.
    ///
    /// # Errors
    ///
    /// Returns `Cache` if the file exists but cannot be read or parsed.
    pub async fn restore_cache(&self) -> Result<bool, SyncError> {
        let Some(cache) = &self.snapshots.cache else {
            return Ok(false);
        };
        let Some(state) = cache.load().await? else {
            return Ok(false);
        };

        let restored = self.store.write(|s| {
            restore_lane::<Item>(s, &state) + restore_lane::<Seat>(s, &state) + restore_lane::<Guest>(s, &state)
        });
        self.items.poll.prime(state.snapshot(EntityKind::Item).clone());
        self.seats.poll.prime(state.snapshot(EntityKind::Seat).clone());
        self.guests.poll.prime(state.snapshot(EntityKind::Guest).clone());
        if let Some(mut history) = state.history {
            history.set_limit(self.config.history_limit);
            *lock(&self.snapshots.history) = history;
        }

        info!(path = %cache.path().display(), restored, saved_at = state.saved_at, "state restored from cache");
        Ok(true)
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if self.tasks_guard().take().is_some() {
            debug!("sync engine dropped while running; timers stopped");
        }
    }
}
