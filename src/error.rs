//! Error taxonomy for the sync engine.
//!
//! DESIGN
//! ======
//! Transport failures come from the `api` layer as `ApiError`; everything the
//! engine itself detects (conflicts, unresolved ids, schema drift) is a
//! `SyncError` variant. Every variant maps onto one `ErrorKind` so logs and the
//! status board can report a small closed set of failure classes.

use crate::api::ApiError;
use crate::model::{EntityId, EntityKind};

// =============================================================================
// KIND
// =============================================================================

/// Closed set of failure classes surfaced to logs and status accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request never completed.
    Network,
    /// The backend answered with a non-2xx status or `success: false`.
    Http,
    /// A body or record could not be decoded.
    Decode,
    /// A local edit is newer than the incoming server value.
    ReconciliationConflict,
    /// An id had no confirmed counterpart yet.
    MissingMapping,
    /// Local bookkeeping failure (unknown entity, cache I/O).
    Local,
}

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{kind} {id}: local edit at {local_ms} is newer than server value at {remote_ms}")]
    ReconciliationConflict { kind: EntityKind, id: EntityId, local_ms: i64, remote_ms: i64 },

    #[error("{kind} {id} has no confirmed id yet")]
    MissingMapping { kind: EntityKind, id: EntityId },

    #[error("{kind} {id} not found")]
    MissingEntity { kind: EntityKind, id: EntityId },

    #[error("{kind} value does not fit the schema: {source}")]
    Shape {
        kind: EntityKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache error: {0}")]
    Cache(String),
}

impl SyncError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api(ApiError::Network(_)) => ErrorKind::Network,
            Self::Api(ApiError::Http { .. }) => ErrorKind::Http,
            Self::Api(ApiError::Decode(_)) | Self::Shape { .. } => ErrorKind::Decode,
            Self::ReconciliationConflict { .. } => ErrorKind::ReconciliationConflict,
            Self::MissingMapping { .. } => ErrorKind::MissingMapping,
            Self::MissingEntity { .. } | Self::Cache(_) => ErrorKind::Local,
        }
    }

    /// Stable machine-readable code for logs.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Api(ApiError::Network(_)) => "E_NETWORK",
            Self::Api(ApiError::Http { .. }) => "E_HTTP",
            Self::Api(ApiError::Decode(_)) => "E_DECODE",
            Self::ReconciliationConflict { .. } => "E_RECONCILIATION_CONFLICT",
            Self::MissingMapping { .. } => "E_MISSING_MAPPING",
            Self::MissingEntity { .. } => "E_MISSING_ENTITY",
            Self::Shape { .. } => "E_SHAPE",
            Self::Cache(_) => "E_CACHE",
        }
    }

    /// Whether a failed send should be requeued.
    ///
    /// Unresolved references are retryable: the referenced entity's create is
    /// usually still queued on another entity type's flush loop.
    #[must_use]
    pub fn retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.retryable(),
            Self::MissingMapping { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;
