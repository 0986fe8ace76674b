//! Sync operations: immutable units of reconciliation work.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tandem_types::{OperationId, Record, RecordId, Timestamp, validate_record};

/// What a [`SyncOperation`] does with its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
    Sync,
    InsertAll,
    UpdateAll,
    DeleteAll,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Sync => "SYNC",
            Self::InsertAll => "INSERT_ALL",
            Self::UpdateAll => "UPDATE_ALL",
            Self::DeleteAll => "DELETE_ALL",
        }
    }

    /// Singular kinds carry exactly one record.
    pub fn is_singular(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    /// Kinds that push the local copy to the remote store.
    pub fn is_push(&self) -> bool {
        matches!(
            self,
            Self::Insert | Self::Update | Self::InsertAll | Self::UpdateAll
        )
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete | Self::DeleteAll)
    }

    /// Only `DELETE_ALL` may be empty, meaning "everything under the path".
    pub fn allows_empty_payload(&self) -> bool {
        matches!(self, Self::DeleteAll)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of reconciliation work.
///
/// Immutable once constructed. `path` is the logical address of the target
/// collection or record in the remote store and is the key for per-path
/// FIFO ordering; `payload` holds records in the remote-facing model form.
///
/// Deserialization applies the same checks as [`SyncOperation::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "RawOperation<M>",
    bound(deserialize = "M: Record + Deserialize<'de>")
)]
pub struct SyncOperation<M> {
    id: OperationId,
    kind: OperationKind,
    path: String,
    payload: Vec<M>,
    enqueued_at: Timestamp,
}

/// Unchecked wire form of a [`SyncOperation`].
#[derive(Deserialize)]
struct RawOperation<M> {
    id: OperationId,
    kind: OperationKind,
    path: String,
    payload: Vec<M>,
    enqueued_at: Timestamp,
}

impl<M: Record> TryFrom<RawOperation<M>> for SyncOperation<M> {
    type Error = SyncError;

    fn try_from(raw: RawOperation<M>) -> SyncResult<Self> {
        validate(raw.kind, &raw.path, &raw.payload)?;
        Ok(Self {
            id: raw.id,
            kind: raw.kind,
            path: raw.path,
            payload: raw.payload,
            enqueued_at: raw.enqueued_at,
        })
    }
}

/// Rejects an empty path, a payload size the kind does not allow, an
/// invalid record, or duplicate ids.
fn validate<M: Record>(kind: OperationKind, path: &str, payload: &[M]) -> SyncResult<()> {
    if path.trim().is_empty() {
        return Err(SyncError::Validation(format!("{kind} operation has an empty path")));
    }
    if payload.is_empty() && !kind.allows_empty_payload() {
        return Err(SyncError::Validation(format!(
            "{kind} operation on {path} requires a payload"
        )));
    }
    if kind.is_singular() && payload.len() != 1 {
        return Err(SyncError::Validation(format!(
            "{kind} operation on {path} carries {} records, expected exactly one",
            payload.len()
        )));
    }

    let mut seen = HashSet::with_capacity(payload.len());
    for record in payload {
        validate_record(record)?;
        let id = record.id();
        if !seen.insert(id.clone()) {
            return Err(SyncError::Validation(format!(
                "{kind} operation on {path} lists record {id} more than once"
            )));
        }
    }
    Ok(())
}

impl<M: Record> SyncOperation<M> {
    /// Builds and validates an operation stamped with the current time.
    ///
    /// Fails with [`SyncError::Validation`] for an empty path, a payload
    /// size the kind does not allow, an invalid record, or duplicate ids.
    pub fn new(kind: OperationKind, path: impl Into<String>, payload: Vec<M>) -> SyncResult<Self> {
        let path = path.into();
        validate(kind, &path, &payload)?;
        Ok(Self {
            id: OperationId::new(),
            kind,
            path,
            payload,
            enqueued_at: Timestamp::now(),
        })
    }

    pub fn insert(path: impl Into<String>, model: M) -> SyncResult<Self> {
        Self::new(OperationKind::Insert, path, vec![model])
    }

    pub fn update(path: impl Into<String>, model: M) -> SyncResult<Self> {
        Self::new(OperationKind::Update, path, vec![model])
    }

    pub fn delete(path: impl Into<String>, model: M) -> SyncResult<Self> {
        Self::new(OperationKind::Delete, path, vec![model])
    }

    pub fn sync(path: impl Into<String>, model: M) -> SyncResult<Self> {
        Self::new(OperationKind::Sync, path, vec![model])
    }

    pub fn sync_all(path: impl Into<String>, models: Vec<M>) -> SyncResult<Self> {
        Self::new(OperationKind::Sync, path, models)
    }

    pub fn insert_all(path: impl Into<String>, models: Vec<M>) -> SyncResult<Self> {
        Self::new(OperationKind::InsertAll, path, models)
    }

    pub fn update_all(path: impl Into<String>, models: Vec<M>) -> SyncResult<Self> {
        Self::new(OperationKind::UpdateAll, path, models)
    }

    pub fn delete_all(path: impl Into<String>, models: Vec<M>) -> SyncResult<Self> {
        Self::new(OperationKind::DeleteAll, path, models)
    }

    /// Deletes everything stored under `path`.
    pub fn delete_path(path: impl Into<String>) -> SyncResult<Self> {
        Self::new(OperationKind::DeleteAll, path, Vec::new())
    }

    /// Ids of the payload records, in payload order.
    pub fn record_ids(&self) -> Vec<RecordId> {
        self.payload.iter().map(Record::id).collect()
    }
}

impl<M> SyncOperation<M> {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn payload(&self) -> &[M] {
        &self.payload
    }

    pub fn enqueued_at(&self) -> Timestamp {
        self.enqueued_at
    }

    /// True for a `DELETE_ALL` that addresses the whole path.
    pub fn is_path_delete(&self) -> bool {
        self.kind == OperationKind::DeleteAll && self.payload.is_empty()
    }

    /// Overrides the enqueue time (for replay and tests).
    #[must_use]
    pub fn with_enqueued_at(mut self, enqueued_at: Timestamp) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }
}

impl<M: Clone> SyncOperation<M> {
    /// Narrows the payload to the records `keep` accepts, keeping the
    /// operation id, kind, path and enqueue time.
    #[must_use]
    pub fn retain_where(&self, mut keep: impl FnMut(&M) -> bool) -> Self {
        Self {
            id: self.id,
            kind: self.kind,
            path: self.path.clone(),
            payload: self.payload.iter().filter(|record| keep(record)).cloned().collect(),
            enqueued_at: self.enqueued_at,
        }
    }
}

impl<M: Record + Clone> SyncOperation<M> {
    /// Narrows the payload to the given ids. A path delete is returned
    /// unchanged.
    #[must_use]
    pub fn retain_records(&self, ids: &HashSet<RecordId>) -> Self {
        self.retain_where(|record| ids.contains(&record.id()))
    }
}
