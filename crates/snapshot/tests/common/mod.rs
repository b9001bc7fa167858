//! Fakes shared by the snapshot integration tests
//!
//! `FakeRemote` keeps committed manifests in memory and can fail lookups,
//! reject commits or drop upload targets. `FakeTransport` instruments every upload with
//! start/end events and an in-flight counter.

#![allow(dead_code)]

use ahash::AHashMap;
use async_trait::async_trait;
use bytes::Bytes;
use codesnap_cache::SnapshotCache;
use codesnap_snapshot::{
    BlobSource, BlobTransport, SnapshotConfig, SnapshotError, SnapshotManifest, SnapshotRemote, SnapshotService,
    UploadSettings, WorkerPool,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct FakeRemote {
    pub manifests: Mutex<AHashMap<String, SnapshotManifest>>,
    pub committed: Mutex<Vec<SnapshotManifest>>,
    pub lookups: AtomicUsize,
    pub target_requests: AtomicUsize,
    pub commit_attempts: AtomicUsize,
    reject_commits: AtomicUsize,
    omit_target: Mutex<Option<String>>,
    lookup_status: Mutex<Option<u16>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject the next `n` commits with status 409
    pub fn reject_next_commits(&self, n: usize) {
        self.reject_commits.store(n, Ordering::SeqCst);
    }

    /// Leave `path` out of every upload-target response
    pub fn omit_target(&self, path: &str) {
        *self.omit_target.lock() = Some(path.to_string());
    }

    /// Answer every snapshot lookup with `status`
    pub fn fail_lookups(&self, status: u16) {
        *self.lookup_status.lock() = Some(status);
    }

    pub fn commits(&self) -> usize {
        self.committed.lock().len()
    }

    pub fn last_commit(&self) -> Option<SnapshotManifest> {
        self.committed.lock().last().cloned()
    }
}

#[async_trait]
impl SnapshotRemote for FakeRemote {
    async fn get_snapshot(&self, snapshot_id: &str) -> Result<Option<SnapshotManifest>, SnapshotError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = *self.lookup_status.lock() {
            return Err(SnapshotError::Remote {
                operation: "get_snapshot",
                status,
                message: "lookup failed".to_string(),
            });
        }
        Ok(self.manifests.lock().get(snapshot_id).cloned())
    }

    async fn request_upload_targets(
        &self,
        snapshot_id: &str,
        paths: &[String],
    ) -> Result<AHashMap<String, String>, SnapshotError> {
        self.target_requests.fetch_add(1, Ordering::SeqCst);
        let omit = self.omit_target.lock().clone();
        Ok(paths
            .iter()
            .filter(|p| omit.as_deref() != Some(p.as_str()))
            .map(|p| (p.clone(), format!("mem://{}/{}", snapshot_id, p)))
            .collect())
    }

    async fn commit_snapshot(&self, manifest: &SnapshotManifest) -> Result<(), SnapshotError> {
        self.commit_attempts.fetch_add(1, Ordering::SeqCst);
        let pending = self.reject_commits.load(Ordering::SeqCst);
        if pending > 0 {
            self.reject_commits.store(pending - 1, Ordering::SeqCst);
            return Err(SnapshotError::CommitRejected {
                status: 409,
                message: "parent snapshot mismatch".to_string(),
            });
        }
        self.manifests
            .lock()
            .insert(manifest.snapshot_id.clone(), manifest.clone());
        self.committed.lock().push(manifest.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(String),
    End(String),
}

#[derive(Default)]
pub struct FakeTransport {
    pub uploads: Mutex<Vec<(String, Bytes)>>,
    pub events: Mutex<Vec<Event>>,
    pub attempts: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    delay: Mutex<Duration>,
    transient_failures: Mutex<AHashMap<String, usize>>,
    fatal: Mutex<Option<String>>,
    hang: Mutex<Option<String>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hold every upload for `delay`
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let transport = Self::default();
        *transport.delay.lock() = delay;
        Arc::new(transport)
    }

    /// Answer 503 to the first `n` uploads of locations ending in `suffix`
    pub fn fail_transiently(&self, suffix: &str, n: usize) {
        self.transient_failures.lock().insert(suffix.to_string(), n);
    }

    /// Answer 403 to every upload of locations ending in `suffix`
    pub fn fail_fatally(&self, suffix: &str) {
        *self.fatal.lock() = Some(suffix.to_string());
    }

    /// Never answer uploads of locations ending in `suffix`
    pub fn hang_on(&self, suffix: &str) {
        *self.hang.lock() = Some(suffix.to_string());
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().len()
    }

    pub fn uploaded_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .uploads
            .lock()
            .iter()
            .map(|(location, _)| location.splitn(4, '/').nth(3).unwrap_or_default().to_string())
            .collect();
        paths.sort();
        paths
    }

    pub fn reset(&self) {
        self.uploads.lock().clear();
        self.events.lock().clear();
    }

    fn outcome(&self, location: &str) -> Result<(), SnapshotError> {
        if let Some(fatal) = self.fatal.lock().as_deref() {
            if location.ends_with(fatal) {
                return Err(SnapshotError::Remote {
                    operation: "put_blob",
                    status: 403,
                    message: "forbidden".to_string(),
                });
            }
        }
        let mut failures = self.transient_failures.lock();
        if let Some((_, remaining)) = failures.iter_mut().find(|(suffix, _)| location.ends_with(suffix.as_str())) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SnapshotError::Remote {
                    operation: "put_blob",
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlobTransport for FakeTransport {
    async fn put_blob(&self, location: &str, source: &BlobSource) -> Result<(), SnapshotError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push(Event::Start(location.to_string()));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let hang = self.hang.lock().clone();
        if hang.map_or(false, |suffix| location.ends_with(&suffix)) {
            // Dropped by the caller's timeout; the in-flight count stays raised
            std::future::pending::<()>().await;
        }

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = match self.outcome(location) {
            Ok(()) => tokio::fs::read(&source.path)
                .await
                .map(|body| self.uploads.lock().push((location.to_string(), Bytes::from(body))))
                .map_err(|e| SnapshotError::Io {
                    path: source.path.clone(),
                    source: e,
                }),
            Err(err) => Err(err),
        };
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().push(Event::End(location.to_string()));
        outcome
    }
}

/// Upload settings tuned for fast tests
pub fn fast_upload_settings() -> UploadSettings {
    UploadSettings {
        batch_size: 2,
        max_retries: 2,
        backoff_base_ms: 1,
        backoff_max_ms: 4,
        timeout_ms: 2_000,
    }
}

pub fn test_config() -> SnapshotConfig {
    SnapshotConfig {
        collect_scm_tags: false,
        upload: fast_upload_settings(),
        ..SnapshotConfig::default()
    }
}

pub struct Harness {
    pub service: SnapshotService,
    pub remote: Arc<FakeRemote>,
    pub transport: Arc<FakeTransport>,
    pub cache: Arc<SnapshotCache>,
}

pub fn harness(config: SnapshotConfig, cache_dir: &Path) -> Harness {
    harness_with(config, cache_dir, FakeRemote::new(), FakeTransport::new())
}

pub fn harness_with(
    config: SnapshotConfig,
    cache_dir: &Path,
    remote: Arc<FakeRemote>,
    transport: Arc<FakeTransport>,
) -> Harness {
    let cache = Arc::new(SnapshotCache::open(cache_dir).unwrap());
    let service = SnapshotService::new(
        config,
        Arc::clone(&cache),
        remote.clone(),
        transport.clone(),
        WorkerPool::new(16),
    );
    Harness {
        service,
        remote,
        transport,
        cache,
    }
}

pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}
