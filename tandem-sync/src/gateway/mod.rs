//! Store gateway abstractions.
//!
//! The sync engine talks to exactly two stores: the local persistent store
//! (source of truth for pushes) and the remote store. Both are narrowed to
//! the handful of calls reconciliation needs, so any database or backend can
//! sit behind them.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tandem_types::{Record, RecordId};
use thiserror::Error;

/// Failure reported by a [`RemoteStore`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum RemoteError {
    /// The addressed record does not exist remotely.
    #[error("not found")]
    NotFound,

    /// The call did not complete within the configured timeout.
    #[error("timed out")]
    Timeout,

    /// Connectivity failure.
    #[error("network error: {0}")]
    Network(String),

    /// The remote refused the caller's credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The remote rejected the payload.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The gateway does not implement this call.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl RemoteError {
    /// Timeouts and network failures may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network(_))
    }
}

/// Failure reported by a [`LocalStore`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{0}")]
pub struct LocalStoreError(pub String);

impl LocalStoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Result of a remote fetch: "not found" is an ordinary branch, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome<M> {
    Found(M),
    NotFound,
}

impl<M> FetchOutcome<M> {
    /// Converts into an `Option`, discarding the distinction's name.
    pub fn into_option(self) -> Option<M> {
        match self {
            Self::Found(model) => Some(model),
            Self::NotFound => None,
        }
    }
}

/// The local persistent store, keyed by record id.
///
/// Implementations provide their own concurrency safety and are assumed
/// durable once a call returns `Ok`.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Local-storage representation of a record.
    type Entity: Record + Clone + Send + Sync + 'static;

    /// Inserts a record that is not yet present.
    async fn insert(&self, entity: &Self::Entity) -> Result<(), LocalStoreError>;

    /// Replaces an existing record.
    async fn update(&self, entity: &Self::Entity) -> Result<(), LocalStoreError>;

    /// Removes a record.
    async fn delete(&self, entity: &Self::Entity) -> Result<(), LocalStoreError>;

    /// Reads a record by id.
    async fn get(&self, id: &RecordId) -> Result<Option<Self::Entity>, LocalStoreError>;
}

/// The remote store, keyed by record id.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Remote-facing representation of a record.
    type Model: Record + Clone + Send + Sync + 'static;

    /// Creates the record or replaces the existing copy.
    async fn create(&self, model: &Self::Model) -> Result<(), RemoteError>;

    /// Fetches a record by id.
    async fn fetch(&self, id: &RecordId) -> Result<FetchOutcome<Self::Model>, RemoteError>;

    /// Deletes a record by id. Returns [`RemoteError::NotFound`] for a
    /// missing id.
    async fn delete(&self, id: &RecordId) -> Result<(), RemoteError>;

    /// Deletes every record under a collection path.
    async fn delete_path(&self, path: &str) -> Result<(), RemoteError> {
        Err(RemoteError::Unsupported(format!("delete by path ({path})")))
    }
}
