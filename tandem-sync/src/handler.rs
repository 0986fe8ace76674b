//! Sync handler: executes one operation against both stores.
//!
//! The handler owns no state between invocations. Each record in the
//! payload is processed independently so one failing record never blocks the
//! rest of its batch, and every gateway call is bounded by the configured
//! timeout.

use crate::conflict::{Resolution, resolve};
use crate::error::SyncError;
use crate::gateway::{FetchOutcome, LocalStore, LocalStoreError, RemoteError, RemoteStore};
use crate::mapper::Mapper;
use crate::operation::{OperationKind, SyncOperation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tandem_types::{OperationId, RecordId};
use tracing::{debug, warn};

/// Default bound on a single gateway call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// What happened to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordAction {
    /// Local copy written to the remote store.
    Pushed,
    /// Remote copy written to the local store.
    Pulled,
    /// Both copies carry the same timestamp; nothing written.
    InSync,
    /// Remote copy deleted.
    Deleted,
    /// Remote copy was already gone.
    AlreadyAbsent,
    /// Every remote record under the path deleted.
    PathCleared,
}

impl RecordAction {
    /// Whether this action wrote to either store.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Pushed | Self::Pulled | Self::Deleted | Self::PathCleared
        )
    }
}

/// Per-record result. For a path delete, `id` holds the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub id: RecordId,
    pub result: Result<RecordAction, SyncError>,
}

/// Aggregate result of one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub path: String,
    pub records: Vec<RecordOutcome>,
}

impl OperationOutcome {
    /// True if every record succeeded.
    pub fn is_success(&self) -> bool {
        self.records.iter().all(|r| r.result.is_ok())
    }

    /// Failed records with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&RecordId, &SyncError)> {
        self.records
            .iter()
            .filter_map(|r| r.result.as_ref().err().map(|e| (&r.id, e)))
    }

    /// Ids whose failure may succeed on a later attempt.
    pub fn transient_failures(&self) -> HashSet<RecordId> {
        self.failures()
            .filter(|(_, e)| e.is_transient())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of store writes performed.
    pub fn writes(&self) -> usize {
        self.records
            .iter()
            .filter(|r| matches!(&r.result, Ok(action) if action.is_write()))
            .count()
    }

    /// The action taken for a record, if it succeeded.
    pub fn action(&self, id: &str) -> Option<RecordAction> {
        self.records
            .iter()
            .find(|r| r.id.as_str() == id)
            .and_then(|r| r.result.as_ref().ok().copied())
    }
}

/// Executes [`SyncOperation`]s using a mapper and the two gateways.
pub struct SyncHandler<M, R, L> {
    remote: Arc<R>,
    local: Arc<L>,
    mapper: M,
    call_timeout: Duration,
}

impl<M, R, L> SyncHandler<M, R, L>
where
    M: Mapper,
    R: RemoteStore<Model = M::Model>,
    L: LocalStore<Entity = M::Entity>,
{
    /// Creates a handler with the default call timeout.
    pub fn new(remote: Arc<R>, local: Arc<L>, mapper: M) -> Self {
        Self {
            remote,
            local,
            mapper,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Sets the bound applied to every gateway call.
    #[must_use]
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Ids the handler reports outcomes under, in payload order. A path
    /// delete is keyed by its path.
    pub fn record_ids(&self, op: &SyncOperation<M::Model>) -> Vec<RecordId> {
        if op.is_path_delete() {
            return vec![RecordId::from(op.path())];
        }
        op.payload().iter().map(|model| self.mapper.id(model)).collect()
    }

    /// Narrows `op` to the records whose outcome id is in `ids`.
    pub fn retain_records(
        &self,
        op: &SyncOperation<M::Model>,
        ids: &HashSet<RecordId>,
    ) -> SyncOperation<M::Model> {
        op.retain_where(|model| ids.contains(&self.mapper.id(model)))
    }

    /// Runs one operation to completion, returning every record's outcome.
    pub async fn handle(&self, op: &SyncOperation<M::Model>) -> OperationOutcome {
        debug!(
            "Handling {} on {} ({} records)",
            op.kind(),
            op.path(),
            op.payload().len()
        );

        let records = match op.kind() {
            OperationKind::Insert
            | OperationKind::Update
            | OperationKind::InsertAll
            | OperationKind::UpdateAll => {
                let mut records = Vec::with_capacity(op.payload().len());
                for model in op.payload() {
                    records.push(self.push(model).await);
                }
                records
            }
            OperationKind::Delete | OperationKind::DeleteAll if op.is_path_delete() => {
                vec![self.delete_path(op.path()).await]
            }
            OperationKind::Delete | OperationKind::DeleteAll => {
                let mut records = Vec::with_capacity(op.payload().len());
                for model in op.payload() {
                    records.push(self.delete(self.mapper.id(model)).await);
                }
                records
            }
            OperationKind::Sync => {
                let mut records = Vec::with_capacity(op.payload().len());
                for model in op.payload() {
                    records.push(self.reconcile(model).await);
                }
                records
            }
        };

        for record in &records {
            if let Err(e) = &record.result {
                warn!("{} on {} failed for {}: {}", op.kind(), op.path(), record.id, e);
            }
        }

        OperationOutcome {
            operation_id: op.id(),
            kind: op.kind(),
            path: op.path().to_string(),
            records,
        }
    }

    async fn push(&self, model: &M::Model) -> RecordOutcome {
        let id = self.mapper.id(model);
        let result = self
            .remote_call(self.remote.create(model))
            .await
            .map(|()| RecordAction::Pushed)
            .map_err(|source| SyncError::RemoteWrite {
                id: id.clone(),
                source,
            });
        debug!("Push {}: {:?}", id, result);
        RecordOutcome { id, result }
    }

    async fn delete(&self, id: RecordId) -> RecordOutcome {
        let result = match self.remote_call(self.remote.delete(&id)).await {
            Ok(()) => Ok(RecordAction::Deleted),
            Err(RemoteError::NotFound) => Ok(RecordAction::AlreadyAbsent),
            Err(source) => Err(SyncError::RemoteDelete {
                id: id.clone(),
                source,
            }),
        };
        debug!("Delete {}: {:?}", id, result);
        RecordOutcome { id, result }
    }

    async fn delete_path(&self, path: &str) -> RecordOutcome {
        let id = RecordId::from(path);
        let result = match self.remote_call(self.remote.delete_path(path)).await {
            Ok(()) => Ok(RecordAction::PathCleared),
            Err(RemoteError::NotFound) => Ok(RecordAction::AlreadyAbsent),
            Err(source) => Err(SyncError::RemoteDelete {
                id: id.clone(),
                source,
            }),
        };
        RecordOutcome { id, result }
    }

    /// Last-write-wins reconciliation of a single record. Never deletes and
    /// writes to at most one store.
    async fn reconcile(&self, model: &M::Model) -> RecordOutcome {
        let id = self.mapper.id(model);

        let remote = match self.remote_call(self.remote.fetch(&id)).await {
            Ok(FetchOutcome::Found(remote)) => Some(remote),
            Ok(FetchOutcome::NotFound) | Err(RemoteError::NotFound) => None,
            Err(source) => {
                return RecordOutcome {
                    id: id.clone(),
                    result: Err(SyncError::RemoteRead { id, source }),
                };
            }
        };

        let local = match self.local_call(self.local.get(&id)).await {
            Ok(local) => local,
            Err(source) => {
                return RecordOutcome {
                    id: id.clone(),
                    result: Err(SyncError::LocalStore { id, source }),
                };
            }
        };

        // Prefer the stored copy; the payload may be stale by dispatch time.
        let local_model = match &local {
            Some(entity) => self.mapper.to_model(entity),
            None => model.clone(),
        };

        let result = match remote {
            None => self.push_model(&id, &local_model).await,
            Some(remote) => {
                let local_ts = self.mapper.last_updated(&local_model);
                let remote_ts = self.mapper.last_updated(&remote);
                match resolve(local_ts, remote_ts) {
                    Resolution::Pull => self.pull(&id, &remote, local.is_some()).await,
                    Resolution::Push => self.push_model(&id, &local_model).await,
                    Resolution::InSync => Ok(RecordAction::InSync),
                }
            }
        };
        debug!("Sync {}: {:?}", id, result);
        RecordOutcome { id, result }
    }

    async fn push_model(&self, id: &RecordId, model: &M::Model) -> Result<RecordAction, SyncError> {
        self.remote_call(self.remote.create(model))
            .await
            .map(|()| RecordAction::Pushed)
            .map_err(|source| SyncError::RemoteWrite {
                id: id.clone(),
                source,
            })
    }

    async fn pull(
        &self,
        id: &RecordId,
        remote: &M::Model,
        exists_locally: bool,
    ) -> Result<RecordAction, SyncError> {
        let entity = self.mapper.to_entity(remote);
        let write = if exists_locally {
            self.local_call(self.local.update(&entity)).await
        } else {
            self.local_call(self.local.insert(&entity)).await
        };
        write
            .map(|()| RecordAction::Pulled)
            .map_err(|source| SyncError::LocalStore {
                id: id.clone(),
                source,
            })
    }

    async fn remote_call<T>(
        &self,
        call: impl Future<Output = Result<T, RemoteError>>,
    ) -> Result<T, RemoteError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        }
    }

    async fn local_call<T>(
        &self,
        call: impl Future<Output = Result<T, LocalStoreError>>,
    ) -> Result<T, LocalStoreError> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LocalStoreError::new(format!(
                "timed out after {}ms",
                self.call_timeout.as_millis()
            ))),
        }
    }
}
