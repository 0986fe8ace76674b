//! Core type definitions for tandem.
//!
//! This crate defines the storage-agnostic types shared by every
//! synchronizable record and by the sync engine itself:
//! - Record identifiers (opaque strings) and operation identifiers (UUID v7)
//! - Millisecond timestamps used for last-write-wins comparison
//! - The [`Record`] contract and its validation policy
//!
//! Concrete models and entities belong to the application, not here.

mod ids;
mod record;
mod timestamp;

pub use ids::{OperationId, RecordId};
pub use record::{Record, validate_record};
pub use timestamp::Timestamp;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),

    #[error("invalid record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },
}

impl From<uuid::Error> for Error {
    fn from(err: uuid::Error) -> Self {
        Self::InvalidUuid(err.to_string())
    }
}
