//! Transport drivers, selected by the profile URI scheme.
//!
//! Neither driver moves bytes itself: rsync and tar do the work, the drivers build
//! their command lines, wire up their pipes and judge their exit status.

pub mod archive;
pub mod progress;
pub mod rsync;

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Render a directory as a command argument with exactly one trailing slash, so
/// rsync and tar operate on its contents rather than the directory itself
pub fn dir_arg(path: impl AsRef<Path>) -> String {
    let raw = path.as_ref().to_string_lossy();
    let trimmed = raw.trim_end_matches('/');
    format!("{}/", trimmed)
}

/// Run a command to completion, forwarding its output lines to the log
pub(crate) async fn run_logged(mut cmd: Command, label: &'static str) -> std::io::Result<ExitStatus> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    let stdout = child.stdout.take().map(|out| {
        tokio::spawn(forward_lines(out, move |line| debug!("{}: {}", label, line)))
    });
    let stderr = child.stderr.take().map(|err| {
        tokio::spawn(forward_lines(err, move |line| warn!("{}: {}", label, line)))
    });

    let status = child.wait().await?;

    for handle in [stdout, stderr].into_iter().flatten() {
        let _ = handle.await;
    }

    Ok(status)
}

async fn forward_lines<R, F>(reader: R, emit: F)
where
    R: AsyncRead + Unpin,
    F: Fn(&str),
{
    let mut lines = BufReader::new(reader).split(b'\n');
    while let Ok(Some(line)) = lines.next_segment().await {
        emit(String::from_utf8_lossy(&line).trim_end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_arg() {
        assert_eq!(dir_arg("/data/gyfd"), "/data/gyfd/");
        assert_eq!(dir_arg("/data/gyfd/"), "/data/gyfd/");
        assert_eq!(dir_arg("/data/gyfd//"), "/data/gyfd/");
        assert_eq!(dir_arg("/"), "/");
    }

    #[tokio::test]
    async fn test_run_logged_reports_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo out; echo err >&2; exit 7");

        let status = run_logged(cmd, "sh").await.unwrap();
        assert_eq!(status.code(), Some(7));
    }
}
