//! Directory metadata preserved across a restore.
//!
//! rsync and tar both rewrite the owner and mode of the directory they extract
//! into. The snapshot is taken before the transfer and applied afterwards.

use nix::unistd::{chown, Gid, Uid};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;

/// Owner, group and mode bits of a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionSnapshot {
    /// Unix mode bits, including the file type bits
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

impl PermissionSnapshot {
    /// Capture the current metadata of a path
    pub fn capture(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;

        Ok(Self {
            mode: metadata.mode(),
            uid: metadata.uid(),
            gid: metadata.gid(),
        })
    }

    /// Apply mode, then ownership
    pub fn apply(&self, path: &Path) -> std::io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(self.mode & 0o7777))?;

        chown(
            path,
            Some(Uid::from_raw(self.uid)),
            Some(Gid::from_raw(self.gid)),
        )
        .map_err(std::io::Error::from)?;

        Ok(())
    }
}
