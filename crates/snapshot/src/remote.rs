//! Remote snapshot service interfaces
//!
//! [`SnapshotRemote`] covers the metadata endpoints (lookup, upload targets,
//! manifest commit); [`BlobTransport`] streams a file to a target location.
//! [`DirectoryRemote`] implements both against a local directory.

use crate::error::SnapshotError;
use crate::manifest::SnapshotManifest;
use ahash::AHashMap;
use async_trait::async_trait;
use bytes::Bytes;
use codesnap_core::{atomic_copy, atomic_write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Metadata side of the snapshot service
#[async_trait]
pub trait SnapshotRemote: Send + Sync {
    /// Look up a snapshot by id; `Ok(None)` when the service reports not found
    async fn get_snapshot(&self, snapshot_id: &str) -> Result<Option<SnapshotManifest>, SnapshotError>;

    /// Ask for one upload location per path
    async fn request_upload_targets(
        &self,
        snapshot_id: &str,
        paths: &[String],
    ) -> Result<AHashMap<String, String>, SnapshotError>;

    /// Commit a manifest; a rejection is [`SnapshotError::CommitRejected`]
    async fn commit_snapshot(&self, manifest: &SnapshotManifest) -> Result<(), SnapshotError>;
}

/// A local file whose bytes are sent to an upload location
///
/// Transports open the file per attempt and stream it; its contents are never
/// held in memory as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobSource {
    pub path: PathBuf,
    pub size: u64,
}

impl BlobSource {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        Self { path: path.into(), size }
    }

    pub async fn open(&self) -> Result<tokio::fs::File, SnapshotError> {
        tokio::fs::File::open(&self.path)
            .await
            .map_err(|source| SnapshotError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// Byte transport to upload locations handed out by [`SnapshotRemote`]
#[async_trait]
pub trait BlobTransport: Send + Sync {
    async fn put_blob(&self, location: &str, source: &BlobSource) -> Result<(), SnapshotError>;
}

/// Snapshot "service" backed by a plain directory
///
/// ```text
/// <root>/
///   snapshots/<id>.json     committed manifests
///   blobs/<id>/<path>       uploaded file bytes
/// ```
pub struct DirectoryRemote {
    root: PathBuf,
}

impl DirectoryRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn manifest_path(&self, snapshot_id: &str) -> PathBuf {
        self.root.join("snapshots").join(format!("{}.json", snapshot_id))
    }
}

#[async_trait]
impl SnapshotRemote for DirectoryRemote {
    async fn get_snapshot(&self, snapshot_id: &str) -> Result<Option<SnapshotManifest>, SnapshotError> {
        let path = self.manifest_path(snapshot_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SnapshotError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SnapshotError::MalformedResponse {
                operation: "get_snapshot",
                reason: e.to_string(),
            })
    }

    async fn request_upload_targets(
        &self,
        snapshot_id: &str,
        paths: &[String],
    ) -> Result<AHashMap<String, String>, SnapshotError> {
        let base = self.root.join("blobs").join(snapshot_id);
        Ok(paths
            .iter()
            .map(|path| (path.clone(), base.join(path).to_string_lossy().into_owned()))
            .collect())
    }

    async fn commit_snapshot(&self, manifest: &SnapshotManifest) -> Result<(), SnapshotError> {
        let path = self.manifest_path(&manifest.snapshot_id);
        let body = serde_json::to_vec_pretty(manifest).map_err(|e| SnapshotError::Io {
            path: path.clone(),
            source: e.into(),
        })?;
        write_blocking(path, Bytes::from(body)).await?;
        debug!(snapshot_id = %manifest.snapshot_id, "committed manifest to directory remote");
        Ok(())
    }
}

#[async_trait]
impl BlobTransport for DirectoryRemote {
    async fn put_blob(&self, location: &str, source: &BlobSource) -> Result<(), SnapshotError> {
        let target = PathBuf::from(location);
        let from = source.path.clone();
        tokio::task::spawn_blocking(move || {
            atomic_copy(&from, &target).map_err(|e| SnapshotError::Io {
                source: std::io::Error::new(std::io::ErrorKind::Other, format!("{:#}", e)),
                path: from,
            })
        })
        .await
        .map_err(|e| SnapshotError::Task(e.to_string()))??;
        Ok(())
    }
}

async fn write_blocking(path: PathBuf, body: Bytes) -> Result<(), SnapshotError> {
    tokio::task::spawn_blocking(move || {
        atomic_write(&path, &body).map_err(|e| SnapshotError::Io {
            source: std::io::Error::new(std::io::ErrorKind::Other, format!("{:#}", e)),
            path,
        })
    })
    .await
    .map_err(|e| SnapshotError::Task(e.to_string()))?
}
