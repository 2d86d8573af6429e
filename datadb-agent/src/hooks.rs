//! Pre/post-exec shell hooks.
//!
//! Hooks are opaque command lines run through `sh -c`. Their exit status is logged
//! and otherwise ignored: a failing hook never changes the outcome of a backup or
//! restore.

use std::path::Path;
use tokio::process::Command;
use tracing::{info, warn};

/// Which hook phases the user allowed on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookPolicy {
    pub pre: bool,
    pub post: bool,
}

impl HookPolicy {
    /// `no_exec` disables both phases
    pub fn from_flags(no_exec: bool, no_pre_exec: bool, no_post_exec: bool) -> Self {
        Self {
            pre: !(no_exec || no_pre_exec),
            post: !(no_exec || no_post_exec),
        }
    }
}

/// Execute a command in a shell and wait for it to exit
pub async fn run_hook(command: &str, workdir: &Path) {
    info!("Calling: {}", command);

    let result = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workdir)
        .status()
        .await;

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("Hook '{}' exited with {}", command, status),
        Err(e) => warn!("Failed to run hook '{}': {}", command, e),
    }
}

/// Run an optional hook if its phase is enabled
pub async fn run_optional(command: Option<&str>, enabled: bool, workdir: &Path) {
    if let (true, Some(command)) = (enabled, command) {
        run_hook(command, workdir).await;
    }
}
