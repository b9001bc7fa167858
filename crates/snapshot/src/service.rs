//! Snapshot creation state machine
//!
//! ```text
//! Idle -> CacheLoaded -> TreeBuilt -> DiffComputed -> NoChange
//!                                                  -> HashCheck -> RemoteExists
//!                                                               -> EntriesUploading -> ManifestCommitting -> Committed
//!                                                                                                        -> ConflictRetry -> CacheLoaded (once)
//! ```
//! Two dedup layers sit on this path: an empty diff against the cached tree
//! returns the cached id without touching the network, and a snapshot id the
//! remote already knows skips the upload entirely.

use crate::config::{SnapshotConfig, ENV_DISABLE_FILE_COUNT_LIMIT, ENV_DISABLE_SIZE_LIMIT};
use crate::error::SnapshotError;
use crate::manifest::SnapshotManifest;
use crate::pool::WorkerPool;
use crate::remote::{BlobTransport, SnapshotRemote};
use crate::scm;
use crate::upload::{SnapshotUploader, UploadFile};
use codesnap_cache::{LatestSnapshot, SnapshotCache};
use codesnap_core::{diff, include_all, measure_folder, total_size, ContentNode, ExcludeFn, ExclusionRules};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-call switches of [`SnapshotService::create_snapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// Retry once, after clearing the latest cache pointer, when the commit is rejected
    pub retry_on_failure: bool,
    /// Fail on size/file-count limit violations instead of logging them
    pub raise_on_validation_failure: bool,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            retry_on_failure: true,
            raise_on_validation_failure: true,
        }
    }
}

/// Exclusion predicate over a loaded rule set
pub fn exclude_with(rules: Arc<ExclusionRules>) -> Arc<ExcludeFn<'static>> {
    Arc::new(move |path: &Path, is_dir: bool| rules.should_exclude(path, is_dir))
}

/// Publishes folders as content-addressed snapshots
pub struct SnapshotService {
    config: SnapshotConfig,
    cache: Arc<SnapshotCache>,
    remote: Arc<dyn SnapshotRemote>,
    uploader: SnapshotUploader,
    exclude: Arc<ExcludeFn<'static>>,
}

impl SnapshotService {
    pub fn new(
        config: SnapshotConfig,
        cache: Arc<SnapshotCache>,
        remote: Arc<dyn SnapshotRemote>,
        transport: Arc<dyn BlobTransport>,
        pool: WorkerPool,
    ) -> Self {
        let uploader = SnapshotUploader::new(Arc::clone(&remote), transport, pool, config.upload.clone());
        Self {
            config,
            cache,
            remote,
            uploader,
            exclude: Arc::new(include_all),
        }
    }

    /// Replace the exclusion predicate applied while building trees
    ///
    /// Callers normally pass a folder that is already filtered, so the default
    /// excludes nothing.
    pub fn with_exclusion(mut self, exclude: Arc<ExcludeFn<'static>>) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Publish `folder` under `project_key` and return its snapshot id
    ///
    /// `size` is the caller-measured byte size of the folder, checked against
    /// the configured limit before any work starts.
    pub async fn create_snapshot(
        &self,
        folder: &Path,
        size: u64,
        project_key: &str,
        options: SnapshotOptions,
    ) -> Result<String, SnapshotError> {
        self.create_filtered(folder, size, project_key, options, Arc::clone(&self.exclude))
            .await
    }

    /// Publish `folder` with its own `.snapignore`/`.gitignore` rules applied
    ///
    /// The folder is measured under the same rules to obtain the size that is
    /// checked against the limit.
    pub async fn publish_folder(
        &self,
        folder: &Path,
        project_key: &str,
        options: SnapshotOptions,
    ) -> Result<String, SnapshotError> {
        let rules = ExclusionRules::load(folder, self.config.ignore.clone()).map_err(|e| {
            SnapshotError::Exclusion {
                path: folder.to_path_buf(),
                message: format!("{:#}", e),
            }
        })?;
        let exclude = exclude_with(Arc::new(rules));

        let root = folder.to_path_buf();
        let measure_exclude = Arc::clone(&exclude);
        let stats = tokio::task::spawn_blocking(move || measure_folder(&root, &*measure_exclude))
            .await
            .map_err(|e| SnapshotError::Task(e.to_string()))?
            .map_err(|e| SnapshotError::Io {
                path: folder.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, format!("{:#}", e)),
            })?;
        debug!(
            folder = %folder.display(),
            files = stats.file_count,
            bytes = stats.total_bytes,
            "measured snapshot folder"
        );

        self.create_filtered(folder, stats.total_bytes, project_key, options, exclude)
            .await
    }

    async fn create_filtered(
        &self,
        folder: &Path,
        size: u64,
        project_key: &str,
        options: SnapshotOptions,
        exclude: Arc<ExcludeFn<'static>>,
    ) -> Result<String, SnapshotError> {
        if self.config.enforce_size_limit && size > self.config.max_snapshot_bytes {
            self.validation_failure(
                format!(
                    "snapshot of {} is {} bytes, above the limit of {} bytes; set {}=1 to disable the check",
                    folder.display(),
                    size,
                    self.config.max_snapshot_bytes,
                    ENV_DISABLE_SIZE_LIMIT
                ),
                options,
            )?;
        }

        let mut retry_on_failure = options.retry_on_failure;
        loop {
            match self.attempt(folder, project_key, options, &exclude).await {
                Ok(snapshot_id) => return Ok(snapshot_id),
                Err(err) if err.is_commit_rejection() && retry_on_failure => {
                    warn!(project = project_key, error = %err, "snapshot commit rejected, retrying once");
                    self.cache.remove_latest(project_key)?;
                    retry_on_failure = false;
                }
                Err(err) if err.is_commit_rejection() && options.retry_on_failure => {
                    return Err(SnapshotError::CommitFailed(Box::new(err)));
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(
        &self,
        folder: &Path,
        project_key: &str,
        options: SnapshotOptions,
        exclude: &Arc<ExcludeFn<'static>>,
    ) -> Result<String, SnapshotError> {
        let latest = self.load_latest(project_key)?;
        debug!(project = project_key, parent = %latest.snapshot_id, "cache loaded");

        let tree = build_tree(folder, exclude).await?;
        debug!(project = project_key, digest = %tree.digest, files = tree.file_count(), "tree built");

        let entries = diff(&latest.tree, &tree);
        debug!(project = project_key, entries = entries.len(), "diff computed");

        if entries.is_empty() && latest.has_snapshot() {
            info!(project = project_key, snapshot_id = %latest.snapshot_id, "no changes since last snapshot");
            return Ok(latest.snapshot_id);
        }

        let snapshot_id = tree.digest.snapshot_id();
        if self.remote.get_snapshot(&snapshot_id).await?.is_some() {
            info!(project = project_key, snapshot_id = %snapshot_id, "snapshot already exists remotely");
            self.cache.update(project_key, &tree, &snapshot_id)?;
            return Ok(snapshot_id);
        }

        let files: Vec<UploadFile> = entries
            .iter()
            .filter(|e| e.needs_upload())
            .map(|e| UploadFile {
                relative_path: e.relative_path.clone(),
                size: e.size.unwrap_or(0),
            })
            .collect();

        if self.config.enforce_file_count_limit && files.len() > self.config.max_file_count {
            self.validation_failure(
                format!(
                    "snapshot of {} uploads {} files, above the limit of {}; set {}=1 to disable the check",
                    folder.display(),
                    files.len(),
                    self.config.max_file_count,
                    ENV_DISABLE_FILE_COUNT_LIMIT
                ),
                options,
            )?;
        }

        let properties = self.scm_properties(folder).await;
        let pending_bytes = total_size(&entries);
        debug!(project = project_key, files = files.len(), bytes = pending_bytes, "uploading entries");
        let report = match self.uploader.upload(&snapshot_id, folder, &files).await {
            Ok(report) => report,
            Err(err) => {
                warn!(
                    project = project_key,
                    files = files.len(),
                    bytes = pending_bytes,
                    error = %err,
                    "snapshot upload aborted"
                );
                return Err(err);
            }
        };

        let manifest = SnapshotManifest {
            snapshot_id: snapshot_id.clone(),
            parent_snapshot_id: latest.snapshot_id,
            properties,
            root_tree: tree,
            file_revisions: report.file_revisions,
        };
        debug!(project = project_key, snapshot_id = %snapshot_id, "committing manifest");
        self.remote.commit_snapshot(&manifest).await?;

        self.cache.update(project_key, &manifest.root_tree, &snapshot_id)?;
        info!(
            project = project_key,
            snapshot_id = %snapshot_id,
            parent = %manifest.parent_snapshot_id,
            files = manifest.file_revisions.len(),
            bytes = manifest.uploaded_bytes(),
            "snapshot committed"
        );
        Ok(snapshot_id)
    }

    /// Cached state of a project; a corrupt record is dropped and read once more
    fn load_latest(&self, project_key: &str) -> Result<LatestSnapshot, SnapshotError> {
        match self.cache.get_latest(project_key) {
            Ok(latest) => Ok(latest),
            Err(err) if err.is_corrupt() => {
                warn!(project = project_key, error = %err, "discarding corrupt snapshot cache");
                self.cache.remove(project_key)?;
                Ok(self.cache.get_latest(project_key)?)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn scm_properties(&self, folder: &Path) -> BTreeMap<String, String> {
        if !self.config.collect_scm_tags {
            return BTreeMap::new();
        }
        let folder = folder.to_path_buf();
        tokio::task::spawn_blocking(move || scm::collect_tags(&folder))
            .await
            .unwrap_or_default()
    }

    fn validation_failure(&self, message: String, options: SnapshotOptions) -> Result<(), SnapshotError> {
        if options.raise_on_validation_failure {
            Err(SnapshotError::Validation(message))
        } else {
            warn!("{}", message);
            Ok(())
        }
    }
}

async fn build_tree(folder: &Path, exclude: &Arc<ExcludeFn<'static>>) -> Result<ContentNode, SnapshotError> {
    let folder: PathBuf = folder.to_path_buf();
    let exclude = Arc::clone(exclude);
    let tree = tokio::task::spawn_blocking(move || codesnap_core::build(&folder, &*exclude))
        .await
        .map_err(|e| SnapshotError::Task(e.to_string()))??;
    Ok(tree)
}
