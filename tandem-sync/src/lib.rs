//! Offline-first sync engine for tandem.
//!
//! Keeps a local persistent store and a remote store convergent. Local
//! mutations (or scheduled reconciliation passes) become [`SyncOperation`]s;
//! the [`SyncManager`] queues them per path and hands each to a
//! [`SyncHandler`], which talks to both stores through narrow gateway traits.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Gateways**: [`LocalStore`] and [`RemoteStore`], the only I/O seams
//! - **Mapper**: converts between remote models and local entities
//! - **Handler**: executes one operation, applying last-write-wins on SYNC
//! - **Manager**: per-path FIFO dispatch, retry with backoff, status, events
//! - **Journal**: optional SQLite persistence of the pending queue
//!
//! ## Operation kinds
//!
//! 1. **INSERT / UPDATE (and `_ALL`)**: push local records to the remote
//! 2. **DELETE (and `_ALL`)**: delete remote records; missing ones count as done
//! 3. **SYNC**: compare timestamps and copy the newer side over the older
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tandem_sync::gateway::memory::{MemoryLocalStore, MemoryRemoteStore};
//! use tandem_sync::{IdentityMapper, SyncConfig, SyncManager, SyncOperation, SyncStatus};
//! use tandem_types::{Record, RecordId, Timestamp};
//!
//! #[derive(Debug, Clone)]
//! struct Note {
//!     id: String,
//!     updated: u64,
//! }
//!
//! impl Record for Note {
//!     fn id(&self) -> RecordId {
//!         RecordId::from(self.id.as_str())
//!     }
//!     fn created_at(&self) -> Timestamp {
//!         Timestamp::from_millis(0)
//!     }
//!     fn last_updated(&self) -> Timestamp {
//!         Timestamp::from_millis(self.updated)
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tandem_sync::SyncResult<()> {
//! let remote = Arc::new(MemoryRemoteStore::<Note>::new());
//! let local = Arc::new(MemoryLocalStore::<Note>::new());
//! let manager = SyncManager::new(
//!     remote.clone(),
//!     local,
//!     IdentityMapper::new(),
//!     SyncConfig::default(),
//! )?;
//!
//! let note = Note { id: "n1".into(), updated: 10 };
//! manager.queue_operation(SyncOperation::insert("notes", note)?)?;
//! manager.wait_idle().await;
//!
//! assert_eq!(manager.status(), SyncStatus::Idle);
//! assert!(remote.get("n1").is_some());
//! # Ok(())
//! # }
//! ```

pub mod conflict;
mod error;
pub mod gateway;
pub mod handler;
pub mod journal;
mod manager;
pub mod mapper;
pub mod operation;
pub mod retry;
pub mod status;

pub use conflict::{Resolution, resolve};
pub use error::{SyncError, SyncResult};
pub use gateway::{FetchOutcome, LocalStore, LocalStoreError, RemoteError, RemoteStore};
pub use handler::{OperationOutcome, RecordAction, RecordOutcome, SyncHandler};
pub use journal::{OperationJournal, SqliteJournal};
pub use manager::{SyncConfig, SyncManager};
pub use mapper::{IdentityMapper, Mapper};
pub use operation::{OperationKind, SyncOperation};
pub use retry::RetryPolicy;
pub use status::{FailedOperation, FailureReport, SyncEvent, SyncStatus};
