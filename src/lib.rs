//! # seatplan-sync
//!
//! Optimistic sync engine for a shared seating plan: items on the floor
//! plan, seats at tables, and guests. Local edits apply instantly under
//! provisional ids, are queued as patches, coalesced and written to a REST
//! backend in order. The backend is polled per collection and reconciled
//! back into the store under last-write-wins.
//!
//! | Module | Role |
//! |--------|------|
//! | [`diff`] | structural diff and deep merge over JSON maps |
//! | [`patch`] | add/mod/del patches and the order-preserving merger |
//! | [`id_map`] | provisional to confirmed id bimap |
//! | [`model`] | entity types and wire conversion |
//! | [`store`] | the entity store, patch log and tombstones |
//! | [`api`] | backend trait and the reqwest implementation |
//! | [`sync`] | outbound flush per entity type |
//! | [`poll`] | inbound poll and reconciliation per entity type |
//! | [`engine`] | UI entry points and timers |
//! | [`json_patch`] | RFC 6902 diff and apply |
//! | [`history`] | undo/redo over store snapshots |
//! | [`cache`] | local JSON mirror for reloads |

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod history;
pub mod id_map;
pub mod json_patch;
pub mod model;
pub mod patch;
pub mod poll;
pub mod status;
pub mod store;
pub mod sync;
pub mod task;

#[cfg(test)]
pub mod test_helpers;
