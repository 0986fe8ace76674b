//! Error types for the sync layer.

use crate::gateway::{LocalStoreError, RemoteError};
use tandem_types::RecordId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Malformed operation, rejected before enqueue.
    #[error("validation error: {0}")]
    Validation(String),

    /// Remote fetch failed.
    #[error("remote read failed for {id}: {source}")]
    RemoteRead {
        id: RecordId,
        #[source]
        source: RemoteError,
    },

    /// Remote create/replace failed.
    #[error("remote write failed for {id}: {source}")]
    RemoteWrite {
        id: RecordId,
        #[source]
        source: RemoteError,
    },

    /// Remote delete failed (not-found is not an error).
    #[error("remote delete failed for {id}: {source}")]
    RemoteDelete {
        id: RecordId,
        #[source]
        source: RemoteError,
    },

    /// Local write or read failed during a pull.
    #[error("local store error for {id}: {source}")]
    LocalStore {
        id: RecordId,
        #[source]
        source: LocalStoreError,
    },

    /// The manager has been shut down.
    #[error("sync queue is closed")]
    QueueClosed,

    /// No async runtime to dispatch on.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Operation journal failure.
    #[error("journal error: {0}")]
    Journal(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Only remote timeouts and network failures qualify; validation,
    /// local-store, and remote rejections are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RemoteRead { source, .. }
            | Self::RemoteWrite { source, .. }
            | Self::RemoteDelete { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// The record this error is attached to, if any.
    pub fn record_id(&self) -> Option<&RecordId> {
        match self {
            Self::RemoteRead { id, .. }
            | Self::RemoteWrite { id, .. }
            | Self::RemoteDelete { id, .. }
            | Self::LocalStore { id, .. } => Some(id),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Journal(err.to_string())
    }
}

impl From<tandem_types::Error> for SyncError {
    fn from(err: tandem_types::Error) -> Self {
        Self::Validation(err.to_string())
    }
}
