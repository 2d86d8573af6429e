//! Local data status, derived from the marker file in a profile directory.
//!
//! The marker's presence means the directory holds a complete copy of the backed-up
//! data. It does not provide mutual exclusion despite the `.lock` suffix.

use std::fmt;
use std::path::Path;

/// Marker file name. Excluded from every transfer.
pub const MARKER_FILE: &str = ".datadb.lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Data is on local disk
    DataAvailable,
    /// Data is not on local disk
    DataMissing,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::DataAvailable => f.write_str("DATA_AVAILABLE"),
            SyncStatus::DataMissing => f.write_str("DATA_MISSING"),
        }
    }
}

/// Check status of a local dir. Existence of the marker is the only signal.
pub fn status(dir: &Path) -> SyncStatus {
    if dir.join(MARKER_FILE).exists() {
        SyncStatus::DataAvailable
    } else {
        SyncStatus::DataMissing
    }
}
