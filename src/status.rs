//! Per-lane sync status shared between the adapters and the UI.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{ErrorKind, SyncError};
use crate::model::EntityKind;

/// Snapshot of one entity lane's activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaneStatus {
    pub polling: bool,
    pub flushing: bool,
    /// Most recent failure, cleared by the next clean pass.
    pub last_error: Option<(ErrorKind, String)>,
    /// Wall-clock ms of the last completed poll.
    pub last_poll_ms: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    lanes: Arc<Mutex<HashMap<EntityKind, LaneStatus>>>,
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, kind: EntityKind) -> LaneStatus {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    pub fn update(&self, kind: EntityKind, f: impl FnOnce(&mut LaneStatus)) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        f(lanes.entry(kind).or_default());
    }

    pub fn record_error(&self, kind: EntityKind, error: &SyncError) {
        let entry = (error.kind(), error.to_string());
        self.update(kind, |lane| lane.last_error = Some(entry));
    }

    pub fn clear_error(&self, kind: EntityKind) {
        self.update(kind, |lane| lane.last_error = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityId;

    #[test]
    fn lanes_default_to_idle() {
        let board = StatusBoard::new();
        assert_eq!(board.get(EntityKind::Seat), LaneStatus::default());
    }

    #[test]
    fn errors_are_recorded_per_lane() {
        let board = StatusBoard::new();
        let err = SyncError::MissingMapping { kind: EntityKind::Item, id: EntityId(-1) };
        board.record_error(EntityKind::Seat, &err);

        let lane = board.get(EntityKind::Seat);
        assert_eq!(lane.last_error.as_ref().map(|(k, _)| *k), Some(ErrorKind::MissingMapping));
        assert!(board.get(EntityKind::Item).last_error.is_none());

        board.clear_error(EntityKind::Seat);
        assert!(board.get(EntityKind::Seat).last_error.is_none());
    }
}
