//! Detection of the external programs the transports shell out to.

use std::path::Path;
use tracing::debug;

/// Check if a command is available in PATH
pub fn has_binary(name: &str) -> bool {
    which::which(name).is_ok()
}

/// External programs resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// `gtar` when installed (BSD hosts), otherwise `tar`
    pub tar: String,

    pub rsync: String,

    /// Prefix for archive creation, lowest CPU priority
    pub nice: Option<String>,

    /// Prefix for archive creation, idle I/O class
    pub ionice: Option<String>,

    /// Compress with pigz instead of tar's builtin gzip
    pub pigz: bool,
}

impl Toolchain {
    /// Probe PATH for the preferred variants of each tool
    pub fn detect() -> Self {
        let toolchain = Self {
            tar: if has_binary("gtar") { "gtar" } else { "tar" }.to_string(),
            rsync: "rsync".to_string(),
            nice: has_binary("nice").then(|| "nice".to_string()),
            ionice: has_binary("ionice").then(|| "ionice".to_string()),
            pigz: has_binary("pigz"),
        };
        debug!("Detected toolchain: {:?}", toolchain);
        toolchain
    }

    /// Toolchain with plain program names and no optional helpers
    pub fn minimal() -> Self {
        Self {
            tar: "tar".to_string(),
            rsync: "rsync".to_string(),
            nice: None,
            ionice: None,
            pigz: false,
        }
    }

    /// Replace the tar program, e.g. with an absolute path
    pub fn with_tar(mut self, tar: impl AsRef<Path>) -> Self {
        self.tar = tar.as_ref().display().to_string();
        self
    }

    /// Replace the rsync program
    pub fn with_rsync(mut self, rsync: impl AsRef<Path>) -> Self {
        self.rsync = rsync.as_ref().display().to_string();
        self
    }
}
