//! HTTP client for the remote snapshot service
//!
//! Endpoints, relative to the service base URL:
//! - `GET  /snapshots/{id}`                  200 manifest, 404 not found
//! - `POST /snapshots/{id}/upload-targets`   `{"paths": [..]}` -> `{"targets": {path: url}}`
//! - `POST /snapshots`                       manifest body
//! - `PUT  {target url}`                     raw file bytes, streamed
//! - `PUT  /runs/{run_id}/status`            run status document
//! - `PUT  /runs/{run_id}/artifacts/{kind}/{name}`

use crate::config::SnapshotConfig;
use crate::error::{is_transient_status, SnapshotError};
use crate::manifest::SnapshotManifest;
use crate::remote::{BlobSource, BlobTransport, SnapshotRemote};
use ahash::AHashMap;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

const MAX_ATTEMPTS: usize = 4;
const BASE_DELAY_MS: u64 = 200;
const MAX_DELAY_MS: u64 = 2_000;

/// reqwest-backed implementation of [`SnapshotRemote`] and [`BlobTransport`]
#[derive(Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Build from `service_url` / `service_token` of the configuration
    pub fn from_config(config: &SnapshotConfig) -> anyhow::Result<Self> {
        let url = config.service_url.clone().with_context(|| {
            format!(
                "No snapshot service configured; set {} or service_url in the config file",
                crate::config::ENV_SERVICE_URL
            )
        })?;
        Self::new(url, config.service_token.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Replace the remote status document of a run
    pub async fn update_run_status<T>(&self, run_id: &str, status: &T) -> Result<(), SnapshotError>
    where
        T: Serialize + ?Sized + Sync,
    {
        const OP: &str = "update_run_status";
        let url = self.url(&format!("/runs/{}/status", run_id));
        let resp = send_with_retry(OP, || self.authorize(self.client.put(&url).json(status)).send()).await?;
        expect_success(OP, resp).await
    }

    /// Upload one run artifact (log archive, output file, build log)
    pub async fn upload_run_artifact(
        &self,
        run_id: &str,
        kind: &str,
        name: &str,
        body: Bytes,
    ) -> Result<(), SnapshotError> {
        const OP: &str = "upload_run_artifact";
        let url = self.url(&format!("/runs/{}/artifacts/{}/{}", run_id, kind, name));
        let resp = send_with_retry(OP, || {
            self.authorize(self.client.put(&url).body(body.clone())).send()
        })
        .await?;
        expect_success(OP, resp).await
    }
}

#[async_trait]
impl SnapshotRemote for HttpRemote {
    async fn get_snapshot(&self, snapshot_id: &str) -> Result<Option<SnapshotManifest>, SnapshotError> {
        const OP: &str = "get_snapshot";
        let url = self.url(&format!("/snapshots/{}", snapshot_id));
        let resp = send_with_retry(OP, || self.authorize(self.client.get(&url)).send()).await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(remote_error(OP, resp).await);
        }

        let body = resp.bytes().await.map_err(|e| SnapshotError::from_reqwest(OP, e))?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| SnapshotError::MalformedResponse {
                operation: OP,
                reason: e.to_string(),
            })
    }

    async fn request_upload_targets(
        &self,
        snapshot_id: &str,
        paths: &[String],
    ) -> Result<AHashMap<String, String>, SnapshotError> {
        const OP: &str = "request_upload_targets";
        let url = self.url(&format!("/snapshots/{}/upload-targets", snapshot_id));
        let body = serde_json::json!({ "paths": paths });
        let resp = send_with_retry(OP, || self.authorize(self.client.post(&url).json(&body)).send()).await?;
        if !resp.status().is_success() {
            return Err(remote_error(OP, resp).await);
        }

        let raw = resp.bytes().await.map_err(|e| SnapshotError::from_reqwest(OP, e))?;
        parse_upload_targets(&raw)
    }

    async fn commit_snapshot(&self, manifest: &SnapshotManifest) -> Result<(), SnapshotError> {
        const OP: &str = "commit_snapshot";
        let url = self.url("/snapshots");
        let resp = self
            .authorize(self.client.post(&url).json(manifest))
            .send()
            .await
            .map_err(|e| SnapshotError::from_reqwest(OP, e))?;

        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            let message = resp.text().await.unwrap_or_default();
            return Err(SnapshotError::CommitRejected {
                status: status.as_u16(),
                message,
            });
        }
        debug!(snapshot_id = %manifest.snapshot_id, "manifest committed");
        Ok(())
    }
}

#[async_trait]
impl BlobTransport for HttpRemote {
    async fn put_blob(&self, location: &str, source: &BlobSource) -> Result<(), SnapshotError> {
        const OP: &str = "put_blob";
        let body = stream_body(source).await?;
        // Pre-signed targets carry their own credentials
        let resp = self
            .client
            .put(location)
            .header(reqwest::header::CONTENT_LENGTH, source.size)
            .body(body)
            .send()
            .await
            .map_err(|e| SnapshotError::from_reqwest(OP, e))?;
        expect_success(OP, resp).await
    }
}

async fn stream_body(source: &BlobSource) -> Result<reqwest::Body, SnapshotError> {
    let file = source.open().await?;
    Ok(reqwest::Body::wrap_stream(ReaderStream::new(file)))
}

fn parse_upload_targets(raw: &[u8]) -> Result<AHashMap<String, String>, SnapshotError> {
    const OP: &str = "request_upload_targets";
    let malformed = |reason: String| SnapshotError::MalformedResponse { operation: OP, reason };

    let value: serde_json::Value = serde_json::from_slice(raw).map_err(|e| malformed(e.to_string()))?;
    let targets = value
        .get("targets")
        .and_then(|t| t.as_object())
        .ok_or_else(|| malformed("missing `targets` object".to_string()))?;

    targets
        .iter()
        .map(|(path, location)| {
            location
                .as_str()
                .map(|l| (path.clone(), l.to_string()))
                .ok_or_else(|| malformed(format!("target for {} is not a string", path)))
        })
        .collect()
}

async fn expect_success(operation: &'static str, resp: reqwest::Response) -> Result<(), SnapshotError> {
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(remote_error(operation, resp).await)
    }
}

async fn remote_error(operation: &'static str, resp: reqwest::Response) -> SnapshotError {
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    SnapshotError::Remote {
        operation,
        status,
        message,
    }
}

/// Send a request, retrying transient statuses and connection failures
async fn send_with_retry<F, Fut>(operation: &'static str, mut send: F) -> Result<reqwest::Response, SnapshotError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt: usize = 0;
    let mut delay_ms = BASE_DELAY_MS;
    loop {
        attempt += 1;
        let transient = match send().await {
            Ok(resp) => {
                if is_transient_status(resp.status().as_u16()) && attempt < MAX_ATTEMPTS {
                    format!("status {}", resp.status())
                } else {
                    return Ok(resp);
                }
            }
            Err(err) => {
                if (err.is_timeout() || err.is_connect()) && attempt < MAX_ATTEMPTS {
                    err.to_string()
                } else {
                    return Err(SnapshotError::from_reqwest(operation, err));
                }
            }
        };

        let jitter = rand::Rng::gen_range(&mut rand::thread_rng(), 0..50);
        warn!(operation, attempt, reason = %transient, "transient remote failure, retrying");
        tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
        delay_ms = delay_ms.saturating_mul(2).min(MAX_DELAY_MS);
    }
}
