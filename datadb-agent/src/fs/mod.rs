//! Local filesystem state of a profile directory.

pub mod marker;
pub mod metadata;

pub use marker::{status, SyncStatus, MARKER_FILE};
pub use metadata::PermissionSnapshot;
