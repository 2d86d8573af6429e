//! rsync-over-ssh transport.
//!
//! Both directions mirror with `--delete`, which only ever removes files on the
//! receiving side: the remote copy on backup, the local directory on restore.

use crate::config::{Profile, Settings};
use crate::fs::MARKER_FILE;
use crate::transfer::{dir_arg, run_logged};
use crate::utils::binaries::Toolchain;
use crate::utils::errors::{AgentError, Result};
use std::path::Path;
use std::process::ExitStatus;
use tokio::process::Command;
use tracing::info;

/// "Partial transfer due to vanished source files". Expected while the data is live.
pub const EXIT_VANISHED: i32 = 24;

pub struct RsyncTransport<'a> {
    settings: &'a Settings,
    toolchain: &'a Toolchain,
}

impl<'a> RsyncTransport<'a> {
    pub fn new(settings: &'a Settings, toolchain: &'a Toolchain) -> Self {
        Self { settings, toolchain }
    }

    /// Flags shared by both directions
    fn base_args(&self, port: u16) -> Vec<String> {
        vec![
            "-avzr".to_string(),
            "-e".to_string(),
            format!(
                "ssh -i {} -p {} -o StrictHostKeyChecking=no",
                self.settings.key_path.display(),
                port
            ),
            format!("--exclude={}", MARKER_FILE),
            "--whole-file".to_string(),
            "--one-file-system".to_string(),
            "--delete".to_string(),
        ]
    }

    fn remote_arg(&self, host: &str, path: &str) -> String {
        format!("{}@{}:{}", self.settings.remote_user, host, dir_arg(path))
    }

    /// Arguments for pushing the local directory to a prepared remote path
    pub fn push_args(&self, profile: &Profile, remote_path: &str) -> Vec<String> {
        let mut args = self.base_args(profile.uri.ssh_port());

        for exclude in &profile.excludes {
            args.push("--exclude".to_string());
            args.push(exclude.clone());
        }

        args.push(dir_arg(&profile.dir));
        args.push(self.remote_arg(&profile.uri.host, remote_path));
        args
    }

    /// Arguments for pulling a remote path into the local directory
    pub fn pull_args(&self, profile: &Profile, remote_path: &str) -> Vec<String> {
        let mut args = self.base_args(profile.uri.ssh_port());
        args.push(self.remote_arg(&profile.uri.host, remote_path));
        args.push(dir_arg(&profile.dir));
        args
    }

    /// Sync the profile directory to the server. Vanished source files are tolerated.
    pub async fn push(&self, profile: &Profile, remote_path: &str) -> Result<()> {
        let args = self.push_args(profile, remote_path);
        info!("Rsync backup call: {} {}", self.toolchain.rsync, args.join(" "));

        let status = self.run(&args, &profile.dir).await?;
        check_push_status(status)
    }

    /// Sync the server copy into the profile directory. Any failure is fatal.
    pub async fn pull(&self, profile: &Profile, remote_path: &str) -> Result<()> {
        let args = self.pull_args(profile, remote_path);
        info!("Rsync restore call: {} {}", self.toolchain.rsync, args.join(" "));

        let status = self.run(&args, &profile.dir).await?;
        if status.success() {
            Ok(())
        } else {
            Err(AgentError::Transfer(format!("rsync restore exited with {}", status)))
        }
    }

    async fn run(&self, args: &[String], dir: &Path) -> Result<ExitStatus> {
        let mut cmd = Command::new(&self.toolchain.rsync);
        cmd.args(args).current_dir(dir);

        run_logged(cmd, "rsync")
            .await
            .map_err(|e| AgentError::Transfer(format!("failed to run {}: {}", self.toolchain.rsync, e)))
    }
}

fn check_push_status(status: ExitStatus) -> Result<()> {
    match status.code() {
        Some(0) => Ok(()),
        Some(EXIT_VANISHED) => {
            info!("rsync reported vanished source files, treating as success");
            Ok(())
        }
        _ => Err(AgentError::Transfer(format!("rsync backup exited with {}", status))),
    }
}
