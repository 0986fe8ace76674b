//! Last-write-wins conflict resolution.
//!
//! Kept as a pure function over timestamps so the rule can be tested and
//! reasoned about apart from any store.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tandem_types::Timestamp;

/// Which direction a record should flow after comparing both copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    /// Remote copy is newer: write it into the local store.
    Pull,
    /// Local copy is newer: push it to the remote store.
    Push,
    /// Same timestamp: the remote copy stays canonical and nothing is written.
    InSync,
}

/// Compares the local and remote `last_updated` timestamps.
///
/// Strict inequality decides the winner. Equal timestamps never write, which
/// makes repeated reconciliation of the same pair a fixed point.
pub fn resolve(local: Timestamp, remote: Timestamp) -> Resolution {
    match remote.cmp(&local) {
        Ordering::Greater => Resolution::Pull,
        Ordering::Less => Resolution::Push,
        Ordering::Equal => Resolution::InSync,
    }
}
