//! tar-over-HTTP transport.
//!
//! Backup runs tar in the profile directory and streams its stdout straight into
//! the upload request. Restore streams the download straight into `tar -x`. In both
//! directions the pipe applies back-pressure, nothing is buffered on disk.

use crate::config::Profile;
use crate::fs::MARKER_FILE;
use crate::remote::DatadbClient;
use crate::transfer::dir_arg;
use crate::transfer::progress::{format_bytes, ProgressStream};
use crate::utils::binaries::Toolchain;
use crate::utils::errors::{AgentError, Result};
use futures_util::StreamExt;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

/// Read size for tar's stdout
const CHUNK_SIZE: usize = 256 * 1024;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Warnings that fire when files change underneath tar. They are expected on live
/// data and are silenced rather than treated as failures.
const SILENCED_WARNINGS: [&str; 4] = [
    "--warning=no-file-changed",
    "--warning=no-file-removed",
    "--warning=no-file-ignored",
    "--warning=no-file-shrank",
];

/// Verbose tar lists each member relative to `./`; anything else on stderr is a diagnostic.
pub fn is_progress_line(line: &str) -> bool {
    line.starts_with("./")
}

/// Full archive-creation command line, program first
pub fn create_command_line(toolchain: &Toolchain, excludes: &[String]) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(ionice) = &toolchain.ionice {
        args.extend([ionice.clone(), "-c".to_string(), "3".to_string()]);
    }
    if let Some(nice) = &toolchain.nice {
        args.extend([nice.clone(), "-n".to_string(), "19".to_string()]);
    }

    args.push(toolchain.tar.clone());
    args.push(format!("--exclude={}", MARKER_FILE));
    args.extend(SILENCED_WARNINGS.iter().map(|w| w.to_string()));

    if toolchain.pigz {
        args.extend(["--use-compress-program".to_string(), "pigz".to_string()]);
    } else {
        args.push("-z".to_string());
    }

    for exclude in excludes {
        args.push("--exclude".to_string());
        args.push(exclude.clone());
    }

    args.extend(["-cv".to_string(), "./".to_string()]);
    args
}

/// Read tar's stderr to the end, logging every line. Returns the distinct lines that
/// are not per-file progress, in the order first seen.
pub async fn scan_errors<R>(stream: R) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut errors: Vec<String> = Vec::new();
    let mut lines = BufReader::new(stream).split(b'\n');

    while let Some(raw) = lines.next_segment().await? {
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        if line.is_empty() {
            continue;
        }

        if is_progress_line(&line) {
            debug!("tar: {}", line);
            continue;
        }

        warn!("tar: {}", line);
        if !errors.contains(&line) {
            errors.push(line);
        }
    }

    Ok(errors)
}

/// Stream a gzip tar of the profile directory to the server
pub async fn backup(client: &DatadbClient, toolchain: &Toolchain, profile: &Profile) -> Result<()> {
    let command_line = create_command_line(toolchain, &profile.excludes);
    let tar_dir = dir_arg(&profile.dir);
    info!("Tar call in {}: {}", tar_dir, command_line.join(" "));

    let mut cmd = Command::new(&command_line[0]);
    cmd.args(&command_line[1..])
        .current_dir(&tar_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut tar = cmd
        .spawn()
        .map_err(|e| AgentError::Transfer(format!("failed to run {}: {}", command_line[0], e)))?;

    let (stdout, stderr) = match (tar.stdout.take(), tar.stderr.take()) {
        (Some(stdout), Some(stderr)) => (stdout, stderr),
        _ => return Err(AgentError::Transfer("tar pipes were not captured".to_string())),
    };

    // The scanner owns the error list; it is only read back after the join below.
    let scanner = tokio::spawn(scan_errors(stderr));

    let uploaded = Arc::new(AtomicU64::new(0));
    let uploaded_clone = Arc::clone(&uploaded);
    let body = ProgressStream::new(
        ReaderStream::with_capacity(stdout, CHUNK_SIZE),
        PROGRESS_INTERVAL,
        Arc::new(move |bytes: u64| {
            uploaded_clone.store(bytes, Ordering::Relaxed);
            debug!("Uploaded {} so far", format_bytes(bytes));
        }),
    );

    info!("Putting archive of '{}' (keep={})", profile.name, profile.keep);
    let upload = client
        .upload_archive(&profile.name, profile.keep, reqwest::Body::wrap_stream(body))
        .await;

    let upload = match upload {
        Ok(upload) => upload,
        Err(e) => {
            let _ = tar.start_kill();
            let _ = tar.wait().await;
            return Err(e);
        }
    };

    if !upload.status.is_success() {
        error!("Upload rejected: {}", upload.body.trim());
        let _ = tar.start_kill();
        let _ = tar.wait().await;
        return Err(AgentError::Transfer(format!(
            "Upload failed with code: {}: {}",
            upload.status.as_u16(),
            upload.body.trim()
        )));
    }

    let status = tar.wait().await?;
    let tar_errors = scanner
        .await
        .map_err(|e| AgentError::Transfer(format!("tar error scanner panicked: {}", e)))??;

    info!(
        "Uploaded {} for '{}', tar exited with {}",
        format_bytes(uploaded.load(Ordering::Relaxed)),
        profile.name,
        status
    );

    judge_create_status(status.success(), status.to_string(), &tar_errors)
}

/// A failed tar only fails the backup when it said something other than progress
fn judge_create_status(success: bool, status: String, tar_errors: &[String]) -> Result<()> {
    if success {
        return Ok(());
    }

    if tar_errors.is_empty() {
        warn!("tar exited with {} without diagnostics, treating as success", status);
        return Ok(());
    }

    Err(AgentError::Transfer(format!(
        "Tar process exited with nonzero code {}. Tar errors: \n    {}",
        status,
        tar_errors.join("\n    ")
    )))
}

/// Download the latest archive and unpack it into the profile directory
pub async fn restore(client: &DatadbClient, toolchain: &Toolchain, profile: &Profile) -> Result<()> {
    let target = dir_arg(&profile.dir);
    let args = ["-zxv".to_string(), "-C".to_string(), target];
    info!("Tar restore call: {} {}", toolchain.tar, args.join(" "));

    let response = client.fetch_archive(&profile.name).await?;

    let mut cmd = Command::new(&toolchain.tar);
    cmd.args(&args).stdin(Stdio::piped()).kill_on_drop(true);

    let mut extract = cmd
        .spawn()
        .map_err(|e| AgentError::Transfer(format!("failed to run {}: {}", toolchain.tar, e)))?;
    let mut stdin = extract
        .stdin
        .take()
        .ok_or_else(|| AgentError::Transfer("tar stdin was not captured".to_string()))?;

    let download = async move {
        let mut stream = ProgressStream::new(
            Box::pin(response.bytes_stream()),
            PROGRESS_INTERVAL,
            Arc::new(|bytes: u64| debug!("Downloaded {} so far", format_bytes(bytes))),
        );

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("network error: {}", e))?;
            stdin
                .write_all(&chunk)
                .await
                .map_err(|e| format!("tar stopped reading: {}", e))?;
        }
        stdin.shutdown().await.map_err(|e| e.to_string())?;

        Ok::<u64, String>(stream.bytes_transferred())
    };

    let (downloaded, extracted) = tokio::join!(download, extract.wait());

    let extracted = extracted?;

    match (downloaded, extracted.success()) {
        (Ok(bytes), true) => {
            info!("Restored {} into {}", format_bytes(bytes), profile.dir.display());
            Ok(())
        }
        (Err(e), true) => Err(AgentError::Transfer(format!("Could not download archive: {}", e))),
        (Ok(_), false) => Err(AgentError::Transfer(format!(
            "Could not extract archive: tar exited with {}",
            extracted
        ))),
        (Err(e), false) => Err(AgentError::Transfer(format!(
            "Could not download archive: {}; tar exited with {}",
            e, extracted
        ))),
    }
}
