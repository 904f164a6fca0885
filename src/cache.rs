//! Best-effort local mirror of the last server snapshots and the history.
//!
//! The cache is a convenience for reloads, never a source of truth: the
//! engine seeds the store and the poll baselines from it, and the first poll
//! then reconciles against the server. Writes go to a sibling temp file that
//! is renamed into place, so a crash mid-write leaves the previous mirror.

#[cfg(test)]
#[path = "cache_test.rs"]
mod cache_test;

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SyncError;
use crate::history::History;
use crate::model::EntityKind;
use crate::poll::Snapshot;

/// Everything mirrored to disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedState {
    #[serde(default)]
    pub items: Snapshot,
    #[serde(default)]
    pub seats: Snapshot,
    #[serde(default)]
    pub guests: Snapshot,
    #[serde(default)]
    pub history: Option<History>,
    #[serde(default)]
    pub saved_at: i64,
}

impl CachedState {
    #[must_use]
    pub fn snapshot(&self, kind: EntityKind) -> &Snapshot {
        match kind {
            EntityKind::Item => &self.items,
            EntityKind::Seat => &self.seats,
            EntityKind::Guest => &self.guests,
        }
    }

    pub fn set_snapshot(&mut self, kind: EntityKind, snapshot: Snapshot) {
        match kind {
            EntityKind::Item => self.items = snapshot,
            EntityKind::Seat => self.seats = snapshot,
            EntityKind::Guest => self.guests = snapshot,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the mirror. A missing file is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `Cache` if the file cannot be read or parsed.
    pub async fn load(&self) -> Result<Option<CachedState>, SyncError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SyncError::Cache(format!("read {}: {e}", self.path.display()))),
        };
        let state = serde_json::from_slice(&raw)
            .map_err(|e| SyncError::Cache(format!("parse {}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), "cache loaded");
        Ok(Some(state))
    }

    /// Replace the mirror atomically.
    ///
    /// # Errors
    ///
    /// Returns `Cache` if the state cannot be written.
    pub async fn save(&self, state: &CachedState) -> Result<(), SyncError> {
        let body = serde_json::to_vec(state).map_err(|e| SyncError::Cache(format!("encode: {e}")))?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| SyncError::Cache(format!("write {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SyncError::Cache(format!("rename into {}: {e}", self.path.display())))?;
        debug!(path = %self.path.display(), "cache saved");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
