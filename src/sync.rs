//! Outbound sync: drain the patch log and write it to the backend.
//!
//! DESIGN
//! ======
//! One `SyncAdapter` per entity type. A flush takes the whole backlog, merges
//! consecutive same-id modifications, and sends the result strictly in order,
//! awaiting each call before the next. Patches queued while a flush is
//! running are picked up by the next loop iteration. A second flush started
//! while one is running returns immediately.
//!
//! Id reconciliation happens here: a confirmed create renames the local slot
//! through the store, later patches resolve provisional ids through the
//! `IdMap`, and a delete of an entity that never reached the server is
//! skipped.
//!
//! ERROR HANDLING
//! ==============
//! Retryable failures (network, 429, 5xx, an unconfirmed reference) put the
//! patch back at the head of the log, up to `max_attempts` sends per entity.
//! Any later patch for the same entity waits behind it so the backend never
//! sees updates out of order. Everything else is logged and dropped.
//!
//! A flush cancelled at an await point puts every unsettled patch back on
//! the log, the one in flight included. The backend may then see that
//! patch twice.

#[cfg(test)]
#[path = "sync_test.rs"]
mod sync_test;

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, Backend};
use crate::error::SyncError;
use crate::model::{Entity, EntityId, EntityKind, partial_to_wire, record_id, to_wire};
use crate::patch::{Patch, merge_sequence};
use crate::status::StatusBoard;
use crate::store::{EntityStore, SharedStore, WeakStore};

/// Counts from one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Patches the backend accepted.
    pub sent: usize,
    /// Deletes of never-confirmed entities, resolved locally.
    pub skipped: usize,
    /// Patches put back for another attempt.
    pub requeued: usize,
    /// Patches dropped for good.
    pub failed: usize,
}

impl FlushReport {
    fn absorb(&mut self, other: FlushReport) {
        self.sent += other.sent;
        self.skipped += other.skipped;
        self.requeued = other.requeued;
        self.failed += other.failed;
    }
}

enum Sent {
    Done,
    Dropped,
    /// The store was torn down while the request was in flight.
    Gone,
}

pub struct SyncAdapter<E: Entity> {
    store: WeakStore,
    backend: Arc<dyn Backend>,
    status: StatusBoard,
    max_attempts: u32,
    flushing: AtomicBool,
    failures: Mutex<HashMap<EntityId, u32>>,
    _entity: PhantomData<fn() -> E>,
}

/// Clears the in-progress flag however the flush ends.
struct FlushGuard<'a> {
    flag: &'a AtomicBool,
    status: &'a StatusBoard,
    kind: EntityKind,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.status.update(self.kind, |lane| lane.flushing = false);
    }
}

/// Patches taken off the log but not yet settled. Whatever is left goes back
/// to the head of the log when the flush ends, including when the flush
/// future is dropped mid-send.
struct Backlog<'a, E: Entity> {
    store: &'a WeakStore,
    deferred: Vec<Patch<E>>,
    unsent: VecDeque<Patch<E>>,
}

impl<E: Entity> Backlog<'_, E> {
    fn restore(&mut self) {
        let mut patches = std::mem::take(&mut self.deferred);
        patches.extend(self.unsent.drain(..));
        if patches.is_empty() {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            debug!(kind = %E::KIND, count = patches.len(), "unsent patches returned to the log");
            store.write(|s| s.requeue_front(patches));
        }
    }
}

impl<E: Entity> Drop for Backlog<'_, E> {
    fn drop(&mut self) {
        self.restore();
    }
}

impl<E: Entity> SyncAdapter<E> {
    pub fn new(store: &SharedStore, backend: Arc<dyn Backend>, max_attempts: u32, status: StatusBoard) -> Self {
        Self {
            store: store.downgrade(),
            backend,
            status,
            max_attempts: max_attempts.max(1),
            flushing: AtomicBool::new(false),
            failures: Mutex::new(HashMap::new()),
            _entity: PhantomData,
        }
    }

    #[must_use]
    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Send everything queued for this entity type.
    ///
    /// Returns `None` if a flush is already running.
    pub async fn flush(&self) -> Option<FlushReport> {
        if self
            .flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(kind = %E::KIND, "flush already in progress");
            return None;
        }
        let _guard = FlushGuard { flag: &self.flushing, status: &self.status, kind: E::KIND };
        self.status.update(E::KIND, |lane| lane.flushing = true);

        let mut report = FlushReport::default();
        let mut backlog = Backlog::<E> { store: &self.store, deferred: Vec::new(), unsent: VecDeque::new() };
        let mut clean = true;

        loop {
            let Some(batch) = self.write(EntityStore::drain_log::<E>) else {
                return Some(report);
            };
            if batch.is_empty() {
                break;
            }
            backlog.unsent.extend(merge_sequence(batch));

            while let Some(patch) = backlog.unsent.front() {
                let id = patch.id();

                if matches!(patch, Patch::Del { .. }) && self.is_local_only(id) {
                    backlog.unsent.pop_front();
                    backlog.deferred.retain(|p| p.id() != id);
                    self.reset_failures(id);
                    self.write(|s| s.forget::<E>(id));
                    debug!(kind = %E::KIND, %id, "delete of unconfirmed entity resolved locally");
                    report.skipped += 1;
                    continue;
                }

                if backlog.deferred.iter().any(|p| p.id() == id) {
                    backlog.deferred.extend(backlog.unsent.pop_front());
                    report.requeued += 1;
                    continue;
                }

                // The patch stays in the backlog until the call returns.
                let outcome = self.send(patch).await;
                let Some(patch) = backlog.unsent.pop_front() else {
                    break;
                };
                match outcome {
                    Ok(Sent::Done) => {
                        self.reset_failures(id);
                        report.sent += 1;
                    }
                    Ok(Sent::Dropped) => report.failed += 1,
                    Ok(Sent::Gone) => {
                        debug!(kind = %E::KIND, %id, "store gone; discarding response");
                        return Some(report);
                    }
                    Err(e) => {
                        clean = false;
                        self.status.record_error(E::KIND, &e);
                        if self.should_retry(id, &e) {
                            warn!(kind = %E::KIND, %id, verb = patch.verb(), error = %e, code = e.error_code(), "send failed; requeued");
                            backlog.deferred.push(patch);
                            report.requeued += 1;
                        } else {
                            error!(kind = %E::KIND, %id, verb = patch.verb(), error = %e, code = e.error_code(), "send failed; patch dropped");
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        backlog.restore();
        if clean {
            self.status.clear_error(E::KIND);
        }
        if report != FlushReport::default() {
            info!(
                kind = %E::KIND,
                sent = report.sent,
                skipped = report.skipped,
                requeued = report.requeued,
                failed = report.failed,
                "flush complete"
            );
        }
        Some(report)
    }

    /// Flush, then keep flushing after `retry_delay` while patches were requeued.
    pub async fn flush_until_settled(&self, retry_delay: Duration) -> Option<FlushReport> {
        let mut total = self.flush().await?;
        while total.requeued > 0 {
            tokio::time::sleep(retry_delay).await;
            let Some(next) = self.flush().await else {
                break;
            };
            total.absorb(next);
        }
        Some(total)
    }

    async fn send(&self, patch: &Patch<E>) -> Result<Sent, SyncError> {
        match patch {
            Patch::Add { id, entity } => {
                let Some(fields) = self.read(|s| to_wire(entity, s)).transpose()? else {
                    return Ok(Sent::Gone);
                };
                let record = self.backend.create(E::KIND, fields).await?;
                let confirmed = record_id(&record)
                    .ok_or_else(|| ApiError::Decode(format!("create response for {} {id} has no id", E::KIND)))?;

                if self.write(|s| s.confirm::<E>(*id, confirmed)).is_none() {
                    return Ok(Sent::Gone);
                }
                info!(kind = %E::KIND, provisional = %id, %confirmed, "entity confirmed");
                Ok(Sent::Done)
            }

            Patch::Mod { id, partial } => {
                let Some(prepared) = self.read(|s| match s.collection::<E>().ids().resolve(*id) {
                    Some(target) => partial_to_wire::<E>(partial, s).map(|fields| Some((target, fields))),
                    None => Ok(None),
                }) else {
                    return Ok(Sent::Gone);
                };
                let Some((target, fields)) = prepared? else {
                    warn!(kind = %E::KIND, %id, code = "E_MISSING_MAPPING", "update for an entity that was never confirmed dropped");
                    return Ok(Sent::Dropped);
                };
                self.backend.update(E::KIND, target, fields).await?;
                Ok(Sent::Done)
            }

            Patch::Del { id } => {
                let Some(resolved) = self.read(|s| s.collection::<E>().ids().resolve(*id)) else {
                    return Ok(Sent::Gone);
                };
                let Some(target) = resolved else {
                    return Ok(Sent::Dropped);
                };
                match self.backend.delete(E::KIND, target).await {
                    Ok(()) => {}
                    Err(e) if e.status() == Some(404) => {
                        debug!(kind = %E::KIND, id = %target, "already deleted on the backend");
                    }
                    Err(e) => return Err(e.into()),
                }
                if self.write(|s| s.forget::<E>(target)).is_none() {
                    return Ok(Sent::Gone);
                }
                Ok(Sent::Done)
            }
        }
    }

    /// A provisional id the backend has never confirmed.
    fn is_local_only(&self, id: EntityId) -> bool {
        id.is_provisional() && self.read(|s| !s.collection::<E>().ids().has_provisional(id)).unwrap_or(false)
    }

    fn should_retry(&self, id: EntityId, error: &SyncError) -> bool {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        if !error.retryable() {
            failures.remove(&id);
            return false;
        }
        let attempts = failures.entry(id).or_insert(0);
        *attempts += 1;
        if *attempts >= self.max_attempts {
            failures.remove(&id);
            return false;
        }
        true
    }

    fn reset_failures(&self, id: EntityId) {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
    }

    fn read<R>(&self, f: impl FnOnce(&EntityStore) -> R) -> Option<R> {
        self.store.upgrade().map(|store| store.read(f))
    }

    fn write<R>(&self, f: impl FnOnce(&mut EntityStore) -> R) -> Option<R> {
        self.store.upgrade().map(|store| store.write(f))
    }
}
