//! Externally visible engine state: status, events, and failure reports.

use crate::error::SyncError;
use crate::operation::{OperationKind, SyncOperation};
use serde::{Deserialize, Serialize};
use std::fmt;
use tandem_types::{OperationId, RecordId};

/// Engine status as seen by the application layer.
///
/// `Idle` → `Syncing` when work is queued; `Syncing` → `Idle` when the queue
/// drains cleanly or `Error` when something failed terminally. `Error` is
/// left by queueing new work or by an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// A record (or path) that failed terminally, with enough context to
/// re-enqueue it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub path: String,
    pub record_id: Option<RecordId>,
    pub error: SyncError,
    pub attempts: u32,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.kind, self.path)?;
        if let Some(id) = &self.record_id {
            write!(f, " (record {id})")?;
        }
        write!(f, " failed after {} attempt(s): {}", self.attempts, self.error)
    }
}

/// Notifications broadcast by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The operation finished; `failed` counts records that failed terminally.
    OperationCompleted {
        operation_id: OperationId,
        kind: OperationKind,
        path: String,
        attempts: u32,
        failed: usize,
    },
    /// Transient failures will be retried after `delay_ms`.
    RetryScheduled {
        operation_id: OperationId,
        path: String,
        attempt: u32,
        delay_ms: u64,
        records: Vec<RecordId>,
    },
    /// A record failed permanently or exhausted its retries.
    RecordFailed(FailureReport),
}

/// An operation narrowed to its failed records, kept for manual retry.
#[derive(Debug, Clone)]
pub struct FailedOperation<M> {
    pub operation: SyncOperation<M>,
    pub failures: Vec<FailureReport>,
}
