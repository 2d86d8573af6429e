//! HTTP client for the datadb coordination API.
//!
//! Two endpoints are consumed, both taking a `proto` (scheme) and `name` (profile)
//! query parameter:
//! - `get_backup`: HEAD probes existence, GET returns the rsync source path or the
//!   streamed archive
//! - `new_backup`: GET prepares an rsync destination, PUT confirms it or receives
//!   the streamed archive

use crate::config::{Scheme, Settings};
use crate::utils::errors::{AgentError, Result};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

const GET_BACKUP: &str = "get_backup";
const NEW_BACKUP: &str = "new_backup";

/// Destination reserved by the server for one rsync backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHandle {
    /// Absolute directory on the datadb host
    pub path: String,
    /// Opaque value echoed back on confirmation
    pub token: String,
}

/// Outcome of an archive upload, inspected by the caller
#[derive(Debug, Clone)]
pub struct UploadResponse {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Clone)]
pub struct DatadbClient {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Option<Duration>,
}

impl DatadbClient {
    pub fn new(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .user_agent(concat!("datadb-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: settings.api_url.clone(),
            request_timeout: settings.request_timeout,
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}{}", self.base_url, name)
    }

    fn control(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.request_timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }

    /// Check whether the server holds a backup for this profile
    pub async fn probe_exists(&self, scheme: Scheme, name: &str) -> Result<bool> {
        let resp = self
            .control(self.http.head(self.endpoint(GET_BACKUP)))
            .query(&[("proto", scheme.as_str()), ("name", name)])
            .send()
            .await?;

        debug!("Probe {} backup '{}': {}", scheme, name, resp.status());

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(AgentError::Transfer(format!(
                "existence check for '{}' failed with status {}",
                name, status
            ))),
        }
    }

    /// Ask the server to prepare a restore; returns the directory to rsync from
    pub async fn prepare_restore(&self, name: &str) -> Result<String> {
        let resp = self
            .control(self.http.get(self.endpoint(GET_BACKUP)))
            .query(&[("proto", Scheme::Rsync.as_str()), ("name", name)])
            .send()
            .await?;

        let body = expect_success(resp, "prepare restore").await?;
        let path = body.trim_end().to_string();
        if path.is_empty() {
            return Err(AgentError::Transfer(format!("server returned no restore path for '{}'", name)));
        }

        info!("Restore source for '{}': {}", name, path);
        Ok(path)
    }

    /// Reserve a destination for a new rsync backup
    pub async fn prepare_backup(&self, name: &str, keep: u32, inplace: bool) -> Result<TransferHandle> {
        let keep = keep.to_string();
        let mut params = vec![
            ("proto", Scheme::Rsync.as_str()),
            ("name", name),
            ("keep", keep.as_str()),
        ];
        if inplace {
            params.push(("inplace", "1"));
        }

        let resp = self
            .control(self.http.get(self.endpoint(NEW_BACKUP)))
            .query(&params)
            .send()
            .await?;

        let body = expect_success(resp, "prepare backup").await?;
        let handle = parse_handle(&body)?;

        info!("Backup destination for '{}': {}", name, handle.path);
        Ok(handle)
    }

    /// Tell the server a versioned rsync backup finished
    pub async fn confirm_backup(&self, name: &str, token: &str, keep: u32) -> Result<()> {
        let keep = keep.to_string();
        let resp = self
            .control(self.http.put(self.endpoint(NEW_BACKUP)))
            .query(&[
                ("proto", Scheme::Rsync.as_str()),
                ("name", name),
                ("token", token),
                ("keep", keep.as_str()),
            ])
            .send()
            .await?;

        expect_success(resp, "confirm backup").await?;
        info!("Confirmed backup '{}'", name);
        Ok(())
    }

    /// Start downloading the latest archive. The body is left unread for streaming.
    pub async fn fetch_archive(&self, name: &str) -> Result<reqwest::Response> {
        let resp = self
            .http
            .get(self.endpoint(GET_BACKUP))
            .query(&[("proto", Scheme::Archive.as_str()), ("name", name)])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::Transfer(format!(
                "Could not download archive: status {}: {}",
                status,
                text.trim()
            )));
        }

        Ok(resp)
    }

    /// Upload an archive as a streamed request body
    pub async fn upload_archive(&self, name: &str, keep: u32, body: reqwest::Body) -> Result<UploadResponse> {
        let keep = keep.to_string();
        let resp = self
            .http
            .put(self.endpoint(NEW_BACKUP))
            .query(&[
                ("proto", Scheme::Archive.as_str()),
                ("name", name),
                ("keep", keep.as_str()),
            ])
            .header("content-type", "application/octet-stream")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_else(|_| "Unknown error".to_string());

        Ok(UploadResponse { status, body })
    }
}

async fn expect_success(resp: reqwest::Response, action: &str) -> Result<String> {
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        return Err(AgentError::Transfer(format!(
            "{} failed with status {}: {}",
            action,
            status,
            text.trim()
        )));
    }

    Ok(text)
}

/// Decode the `[path, token]` pair returned when preparing a backup
fn parse_handle(body: &str) -> Result<TransferHandle> {
    let (path, token): (String, Value) = serde_json::from_str(body)?;

    // The token is opaque; numbers are echoed back in their JSON form.
    let token = match token {
        Value::String(s) => s,
        other => other.to_string(),
    };

    Ok(TransferHandle { path, token })
}
