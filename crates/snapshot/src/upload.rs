//! Batched upload of changed file bytes
//!
//! Files are split into batches of `batch_size`. Every file of a batch is
//! scheduled at once on the shared [`WorkerPool`]; the batch is then joined in
//! full before the next one starts, which bounds in-flight uploads and open
//! file handles to the batch size.

use crate::config::{UploadSettings, ENV_UPLOAD_TIMEOUT_SECS};
use crate::error::SnapshotError;
use crate::manifest::FileRevision;
use crate::pool::WorkerPool;
use crate::remote::{BlobSource, BlobTransport, SnapshotRemote};
use ahash::AHashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A file scheduled for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub relative_path: String,
    pub size: u64,
}

/// Outcome of a completed upload
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub file_revisions: Vec<FileRevision>,
    pub batches: usize,
    pub bytes: u64,
}

pub struct SnapshotUploader {
    remote: Arc<dyn SnapshotRemote>,
    transport: Arc<dyn BlobTransport>,
    pool: WorkerPool,
    settings: UploadSettings,
}

impl SnapshotUploader {
    pub fn new(
        remote: Arc<dyn SnapshotRemote>,
        transport: Arc<dyn BlobTransport>,
        pool: WorkerPool,
        settings: UploadSettings,
    ) -> Self {
        Self {
            remote,
            transport,
            pool,
            settings,
        }
    }

    /// Request upload locations for `paths` in one call
    ///
    /// A response that omits any requested path is malformed.
    pub async fn request_upload_targets(
        &self,
        snapshot_id: &str,
        paths: &[String],
    ) -> Result<AHashMap<String, String>, SnapshotError> {
        let targets = self.remote.request_upload_targets(snapshot_id, paths).await?;
        if let Some(missing) = paths.iter().find(|p| !targets.contains_key(p.as_str())) {
            return Err(SnapshotError::MalformedResponse {
                operation: "request_upload_targets",
                reason: format!("no upload target for {}", missing),
            });
        }
        Ok(targets)
    }

    /// Upload `files` (relative to `base_dir`) for `snapshot_id`
    ///
    /// A file revision is recorded for every scheduled file. The first terminal
    /// failure of a batch is returned once that whole batch has finished.
    pub async fn upload(
        &self,
        snapshot_id: &str,
        base_dir: &Path,
        files: &[UploadFile],
    ) -> Result<UploadReport, SnapshotError> {
        let mut report = UploadReport::default();
        let batch_size = self.settings.batch_size.max(1);

        for (index, batch) in files.chunks(batch_size).enumerate() {
            let paths: Vec<String> = batch.iter().map(|f| f.relative_path.clone()).collect();
            let targets = self.request_upload_targets(snapshot_id, &paths).await?;

            let mut in_flight = JoinSet::new();
            for file in batch {
                let location = targets[file.relative_path.as_str()].clone();
                report.file_revisions.push(FileRevision {
                    relative_path: file.relative_path.clone(),
                    blob_location: location.clone(),
                    size_bytes: file.size,
                });
                report.bytes += file.size;

                let job = UploadJob {
                    relative_path: file.relative_path.clone(),
                    source: BlobSource::new(base_dir.join(&file.relative_path), file.size),
                    location,
                    transport: Arc::clone(&self.transport),
                    settings: self.settings.clone(),
                };
                let pool = self.pool.clone();
                in_flight.spawn(async move {
                    match pool.run(job.run()).await {
                        Ok(outcome) => outcome,
                        Err(closed) => Err(SnapshotError::Task(closed.to_string())),
                    }
                });
            }

            let mut first_error = None;
            while let Some(joined) = in_flight.join_next().await {
                let outcome = joined.unwrap_or_else(|e| Err(SnapshotError::Task(e.to_string())));
                if let Err(err) = outcome {
                    warn!(batch = index, error = %err, "file upload failed");
                    first_error.get_or_insert(err);
                }
            }

            report.batches += 1;
            if let Some(err) = first_error {
                return Err(SnapshotError::Upload {
                    scheduled_files: report.file_revisions.len(),
                    scheduled_bytes: report.bytes,
                    source: Box::new(err),
                });
            }
            debug!(batch = index, files = batch.len(), "upload batch flushed");
        }

        info!(
            snapshot_id,
            files = report.file_revisions.len(),
            bytes = report.bytes,
            batches = report.batches,
            "uploaded snapshot files"
        );
        Ok(report)
    }
}

struct UploadJob {
    relative_path: String,
    source: BlobSource,
    location: String,
    transport: Arc<dyn BlobTransport>,
    settings: UploadSettings,
}

impl UploadJob {
    async fn run(self) -> Result<(), SnapshotError> {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(
                self.settings.timeout(),
                self.transport.put_blob(&self.location, &self.source),
            )
            .await
            {
                Ok(Err(SnapshotError::Transport { timeout: true, .. })) | Err(_) => Err(self.timeout_error()),
                Ok(result) => result,
            };

            match outcome {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.settings.max_retries => {
                    let delay = self.settings.backoff(attempt);
                    debug!(
                        path = %self.relative_path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying upload"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn timeout_error(&self) -> SnapshotError {
        SnapshotError::UploadTimeout {
            path: self.relative_path.clone(),
            timeout_ms: self.settings.timeout_ms,
            env_var: ENV_UPLOAD_TIMEOUT_SECS,
        }
    }
}
