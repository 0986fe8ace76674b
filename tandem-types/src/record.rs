//! The contract every synchronizable record satisfies.
//!
//! Both the remote-facing model and the local-facing entity implement
//! [`Record`]. Business rules about what makes a record acceptable live in
//! [`validate_record`], not in the trait, so storage types stay plain data.

use crate::{Error, RecordId, Timestamp};

/// A record with a stable identity and modification timestamps.
pub trait Record {
    /// Stable identifier, immutable once assigned.
    fn id(&self) -> RecordId;

    /// When the record was first created.
    fn created_at(&self) -> Timestamp;

    /// When the record was last modified. Drives last-write-wins.
    fn last_updated(&self) -> Timestamp;
}

/// Checks a record against the invariants the sync engine relies on:
/// a non-empty id and `last_updated >= created_at`.
pub fn validate_record<R: Record + ?Sized>(record: &R) -> crate::Result<()> {
    let id = record.id();
    if id.is_empty() {
        return Err(Error::InvalidRecord {
            id: String::new(),
            reason: "record id is empty".to_string(),
        });
    }
    if record.last_updated() < record.created_at() {
        return Err(Error::InvalidRecord {
            id: id.to_string(),
            reason: format!(
                "last_updated {} precedes created_at {}",
                record.last_updated(),
                record.created_at()
            ),
        });
    }
    Ok(())
}
