//! Inbound sync: fetch the remote collection and reconcile it into the store.
//!
//! DESIGN
//! ======
//! One `PollAdapter` per entity type. Each cycle lists the whole collection,
//! indexes it by server id into a `Snapshot`, and diffs it against the
//! previous snapshot. Only ids in that diff are touched:
//!
//! - gone from the server: removed locally (idempotent)
//! - new and unknown locally: materialized, unless tombstoned
//! - known locally: the changed fields are applied under last-write-wins,
//!   comparing the local `last_update` to the record's `updated_at`
//!
//! The previous snapshot is replaced after every successful fetch, conflicts
//! or not, so no cycle retries from a stale baseline. A cycle that starts
//! while another is still running is skipped.
//!
//! ERROR HANDLING
//! ==============
//! Fetch failures are returned to the caller and recorded on the status
//! board; the previous snapshot stays in place. Conflicts and undecodable
//! records are logged and skipped without failing the cycle.

#[cfg(test)]
#[path = "poll_test.rs"]
mod poll_test;

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::api::Backend;
use crate::clock::Clock;
use crate::diff::{Change, deep_diff, diff_typed};
use crate::error::SyncError;
use crate::model::{Entity, EntityId, EntityKind, from_wire, record_id, record_updated_at};
use crate::status::StatusBoard;
use crate::store::{EntityStore, RemoteOutcome, SharedStore, WeakStore};

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Backend records of one collection keyed by the id's decimal string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(Map<String, Value>);

impl Snapshot {
    /// Index records by id. Records without a numeric id are dropped.
    #[must_use]
    pub fn from_records(records: Vec<Value>) -> Self {
        let mut indexed = Map::new();
        for record in records {
            match record_id(&record) {
                Some(id) => {
                    indexed.insert(id.to_string(), record);
                }
                None => warn!(record = %record, "record without id ignored"),
            }
        }
        Self(indexed)
    }

    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&Value> {
        self.0.get(&id.to_string())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &Value> {
        self.0.values()
    }
}

/// Counts from one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    /// Inbound changes dropped because the local edit was newer.
    pub conflicts: usize,
    /// Records not applied (tombstoned or undecodable).
    pub skipped: usize,
}

// =============================================================================
// ADAPTER
// =============================================================================

pub struct PollAdapter<E: Entity> {
    store: WeakStore,
    backend: Arc<dyn Backend>,
    status: StatusBoard,
    clock: Arc<dyn Clock>,
    last: Mutex<Snapshot>,
    polling: AtomicBool,
    _entity: PhantomData<fn() -> E>,
}

struct PollGuard<'a> {
    flag: &'a AtomicBool,
    status: &'a StatusBoard,
    kind: EntityKind,
}

impl Drop for PollGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.status.update(self.kind, |lane| lane.polling = false);
    }
}

impl<E: Entity> PollAdapter<E> {
    pub fn new(store: &SharedStore, backend: Arc<dyn Backend>, status: StatusBoard, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: store.downgrade(),
            backend,
            status,
            clock,
            last: Mutex::new(Snapshot::default()),
            polling: AtomicBool::new(false),
            _entity: PhantomData,
        }
    }

    /// Seed the baseline, e.g. from a cached snapshot.
    pub fn prime(&self, snapshot: Snapshot) {
        *self.last_guard() = snapshot;
    }

    #[must_use]
    pub fn last_snapshot(&self) -> Snapshot {
        self.last_guard().clone()
    }

    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Acquire)
    }

    /// Run one poll cycle.
    ///
    /// Returns `Ok(None)` when skipped: a cycle is already running or the
    /// store has been torn down.
    ///
    /// # Errors
    ///
    /// Returns the fetch error; nothing is applied in that case.
    pub async fn poll(&self) -> Result<Option<PollReport>, SyncError> {
        if self
            .polling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(kind = %E::KIND, "previous poll still running; tick skipped");
            return Ok(None);
        }
        let _guard = PollGuard { flag: &self.polling, status: &self.status, kind: E::KIND };
        self.status.update(E::KIND, |lane| lane.polling = true);

        let records = match self.backend.list(E::KIND).await {
            Ok(records) => records,
            Err(e) => {
                let e = SyncError::from(e);
                self.status.record_error(E::KIND, &e);
                return Err(e);
            }
        };

        let Some(store) = self.store.upgrade() else {
            debug!(kind = %E::KIND, "store gone; discarding poll response");
            return Ok(None);
        };

        let current = Snapshot::from_records(records);
        let previous = std::mem::replace(&mut *self.last_guard(), current.clone());
        let report = store.write(|s| reconcile::<E>(s, &previous, &current));

        let now = self.clock.now_ms();
        self.status.update(E::KIND, |lane| {
            lane.last_poll_ms = Some(now);
            lane.last_error = None;
        });
        if report != PollReport::default() {
            info!(
                kind = %E::KIND,
                inserted = report.inserted,
                updated = report.updated,
                removed = report.removed,
                conflicts = report.conflicts,
                skipped = report.skipped,
                "poll applied"
            );
        }
        Ok(Some(report))
    }

    fn last_guard(&self) -> MutexGuard<'_, Snapshot> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// RECONCILIATION
// =============================================================================

fn reconcile<E: Entity>(store: &mut EntityStore, previous: &Snapshot, current: &Snapshot) -> PollReport {
    let mut report = PollReport::default();

    for (key, change) in deep_diff(&previous.0, &current.0).iter() {
        let Some(id) = EntityId::parse(key) else {
            continue;
        };

        match (change, current.get(id)) {
            (Change::Absent, _) | (_, None) => {
                if store.remove_remote::<E>(id) {
                    report.removed += 1;
                }
            }
            (_, Some(record)) => {
                if let Err(e) = apply_record::<E>(store, id, previous.get(id), record, &mut report) {
                    warn!(kind = %E::KIND, %id, error = %e, code = e.error_code(), "record not applied");
                    report.skipped += 1;
                }
            }
        }
    }
    report
}

fn apply_record<E: Entity>(
    store: &mut EntityStore,
    id: EntityId,
    before: Option<&Value>,
    record: &Value,
    report: &mut PollReport,
) -> Result<(), SyncError> {
    let incoming: E = from_wire(record)?;
    let server_ms = record_updated_at(record);

    let Some(local) = store.collection::<E>().get(id).cloned() else {
        if store.insert_remote(incoming) {
            report.inserted += 1;
        } else {
            warn!(kind = %E::KIND, %id, "tombstoned entity still listed by the server; not resurrected");
            report.skipped += 1;
        }
        return Ok(());
    };

    let partial = match before {
        Some(previous) => diff_typed(&from_wire::<E>(previous)?, &incoming),
        None => diff_typed(&local, &incoming),
    }
    .map_err(|source| SyncError::Shape { kind: E::KIND, source })?;

    match store.apply_remote::<E>(id, &partial, server_ms)? {
        RemoteOutcome::Applied => report.updated += 1,
        RemoteOutcome::Conflict { local_ms } => {
            let conflict = SyncError::ReconciliationConflict { kind: E::KIND, id, local_ms, remote_ms: server_ms };
            warn!(error = %conflict, code = conflict.error_code(), "inbound change dropped; local edit wins");
            report.conflicts += 1;
        }
        RemoteOutcome::Missing => {}
    }
    Ok(())
}
