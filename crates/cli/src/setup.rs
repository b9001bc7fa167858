//! Wiring of configuration, cache and remotes shared by commands

use anyhow::{Context, Result};
use codesnap_cache::SnapshotCache;
use codesnap_snapshot::config::ENV_SERVICE_URL;
use codesnap_snapshot::{
    BlobTransport, DirectoryRemote, HttpRemote, SnapshotConfig, SnapshotRemote, SnapshotService, WorkerPool,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where snapshots are published
pub enum Remote {
    Directory(Arc<DirectoryRemote>),
    Http(Arc<HttpRemote>),
}

impl Remote {
    /// Directory remote if `dir` is given, otherwise the configured service
    pub fn select(config: &SnapshotConfig, dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = dir {
            return Ok(Remote::Directory(Arc::new(DirectoryRemote::new(dir))));
        }
        if config.service_url.is_none() {
            anyhow::bail!(
                "No snapshot remote configured: set {} or pass --remote-dir",
                ENV_SERVICE_URL
            );
        }
        Ok(Remote::Http(Arc::new(HttpRemote::from_config(config)?)))
    }

    pub fn describe(&self) -> String {
        match self {
            Remote::Directory(remote) => remote.root().display().to_string(),
            Remote::Http(remote) => remote.base_url().to_string(),
        }
    }

    fn parts(&self) -> (Arc<dyn SnapshotRemote>, Arc<dyn BlobTransport>) {
        match self {
            Remote::Directory(remote) => (remote.clone(), remote.clone()),
            Remote::Http(remote) => (remote.clone(), remote.clone()),
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<SnapshotConfig> {
    SnapshotConfig::load(path).context("Failed to load snapshot configuration")
}

pub fn open_cache(config: &SnapshotConfig) -> Result<Arc<SnapshotCache>> {
    let dir = config.resolved_cache_dir();
    let cache = SnapshotCache::open(&dir)
        .with_context(|| format!("Failed to open snapshot cache at {}", dir.display()))?;
    Ok(Arc::new(cache))
}

pub fn snapshot_service(
    config: SnapshotConfig,
    cache: Arc<SnapshotCache>,
    remote: &Remote,
    pool: WorkerPool,
) -> SnapshotService {
    let (snapshots, transport) = remote.parts();
    SnapshotService::new(config, cache, snapshots, transport, pool)
}

/// Default root for run working directories and environments
pub fn default_workspace() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("codesnap")
}
