//! Per-project snapshot cache
//!
//! Layout under the cache directory:
//! ```text
//! <cache>/
//!   <project-hash>/
//!     LATEST              pointer (JSON): project key, snapshot id, root digest
//!     trees/
//!       <root-digest>.bin tree record (SNC1 + zstd(bincode))
//! ```
//! `LATEST` is the single cache record of a project. Tree records form a short
//! history keyed by root digest, pruned by [`RetentionPolicy`].

use crate::retention::RetentionPolicy;
use codesnap_core::hash::Digest;
use codesnap_core::{atomic_write, ContentNode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

/// Snapshot id used when a project has no prior snapshot
pub const EMPTY_SNAPSHOT_ID: &str = "00000000-0000-0000-0000-000000000000";

const TREE_MAGIC: &[u8; 4] = b"SNC1";
const LATEST_FILE: &str = "LATEST";
const TREES_DIR: &str = "trees";

/// Errors raised by the snapshot cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("corrupt cache record {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("cache I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache write failed: {0}")]
    Write(#[from] anyhow::Error),
}

impl CacheError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, CacheError::Corrupt { .. })
    }

    fn corrupt(path: &Path, reason: impl ToString) -> Self {
        CacheError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Latest cached state of a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestSnapshot {
    pub tree: ContentNode,
    pub snapshot_id: String,
}

impl LatestSnapshot {
    /// The "no prior snapshot" state
    pub fn none() -> Self {
        Self {
            tree: ContentNode::empty_root(),
            snapshot_id: EMPTY_SNAPSHOT_ID.to_string(),
        }
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot_id != EMPTY_SNAPSHOT_ID
    }
}

/// One retained snapshot of a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub snapshot_id: String,
    pub root_digest: Digest,
    pub file_count: usize,
    pub total_bytes: u64,
    pub is_latest: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct LatestPointer {
    project_key: String,
    snapshot_id: String,
    root_digest: String,
    updated_at_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct TreeRecord {
    snapshot_id: String,
    tree: ContentNode,
}

/// Durable mapping from project key to its latest (tree, snapshot id)
pub struct SnapshotCache {
    dir: PathBuf,
    policy: RetentionPolicy,
}

impl SnapshotCache {
    /// Open or create a cache rooted at `dir`
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            policy: RetentionPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: RetentionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory holding one project's record
    pub fn project_dir(&self, project_key: &str) -> PathBuf {
        let hash = blake3::hash(project_key.as_bytes()).to_hex();
        self.dir.join(&hash.as_str()[..32])
    }

    /// Load the latest snapshot of a project
    ///
    /// A missing record yields [`LatestSnapshot::none`]. Any unreadable or
    /// inconsistent record yields [`CacheError::Corrupt`].
    pub fn get_latest(&self, project_key: &str) -> Result<LatestSnapshot, CacheError> {
        let pointer_path = self.project_dir(project_key).join(LATEST_FILE);
        let Some(pointer) = self.read_pointer(&pointer_path)? else {
            return Ok(LatestSnapshot::none());
        };

        if pointer.project_key != project_key {
            return Err(CacheError::corrupt(&pointer_path, "pointer belongs to another project"));
        }
        let digest = Digest::from_hex(&pointer.root_digest)
            .ok_or_else(|| CacheError::corrupt(&pointer_path, "invalid root digest"))?;

        let tree_path = self.tree_path(project_key, &digest);
        let record = match std::fs::read(&tree_path) {
            Ok(bytes) => decode_tree_record(&bytes).map_err(|reason| CacheError::corrupt(&tree_path, reason))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::corrupt(&tree_path, "tree record missing"));
            }
            Err(e) => return Err(CacheError::io(&tree_path, e)),
        };

        if record.tree.digest != digest || record.snapshot_id != pointer.snapshot_id {
            return Err(CacheError::corrupt(&tree_path, "tree record does not match pointer"));
        }

        debug!(project = project_key, snapshot_id = %pointer.snapshot_id, "loaded cached snapshot");
        Ok(LatestSnapshot {
            tree: record.tree,
            snapshot_id: pointer.snapshot_id,
        })
    }

    /// Record `tree`/`snapshot_id` as the latest snapshot of a project
    ///
    /// The tree record is written before the pointer, each by atomic rename.
    pub fn update(&self, project_key: &str, tree: &ContentNode, snapshot_id: &str) -> Result<(), CacheError> {
        let tree_path = self.tree_path(project_key, &tree.digest);
        let record = TreeRecord {
            snapshot_id: snapshot_id.to_string(),
            tree: tree.clone(),
        };
        atomic_write(&tree_path, &encode_tree_record(&record)?)?;

        let pointer = LatestPointer {
            project_key: project_key.to_string(),
            snapshot_id: snapshot_id.to_string(),
            root_digest: tree.digest.to_hex(),
            updated_at_ms: now_ms(),
        };
        let pointer_bytes = serde_json::to_vec_pretty(&pointer)
            .map_err(|e| CacheError::Write(anyhow::Error::new(e)))?;
        atomic_write(&self.project_dir(project_key).join(LATEST_FILE), &pointer_bytes)?;

        debug!(project = project_key, snapshot_id, "updated snapshot cache");
        self.prune(project_key, &tree.digest);
        Ok(())
    }

    /// Clear only the latest pointer, keeping the tree history
    pub fn remove_latest(&self, project_key: &str) -> Result<(), CacheError> {
        let path = self.project_dir(project_key).join(LATEST_FILE);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Delete the whole record of a project
    pub fn remove(&self, project_key: &str) -> Result<(), CacheError> {
        let dir = self.project_dir(project_key);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(&dir, e)),
        }
    }

    /// Retained snapshots of a project, newest first
    ///
    /// Unreadable history records are skipped.
    pub fn history(&self, project_key: &str) -> Result<Vec<HistoryEntry>, CacheError> {
        let latest = self
            .read_pointer(&self.project_dir(project_key).join(LATEST_FILE))
            .ok()
            .flatten()
            .map(|p| p.root_digest);

        let mut entries = Vec::new();
        for (path, _) in self.tree_files(project_key)? {
            let record = match std::fs::read(&path).map_err(|e| e.to_string()).and_then(|b| decode_tree_record(&b)) {
                Ok(record) => record,
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "skipping unreadable history record");
                    continue;
                }
            };
            entries.push(HistoryEntry {
                is_latest: latest.as_deref() == Some(record.tree.digest.to_hex().as_str()),
                snapshot_id: record.snapshot_id,
                root_digest: record.tree.digest,
                file_count: record.tree.file_count(),
                total_bytes: record.tree.size,
            });
        }
        Ok(entries)
    }

    fn read_pointer(&self, path: &Path) -> Result<Option<LatestPointer>, CacheError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::corrupt(path, e))
    }

    fn tree_path(&self, project_key: &str, digest: &Digest) -> PathBuf {
        self.project_dir(project_key)
            .join(TREES_DIR)
            .join(format!("{}.bin", digest.to_hex()))
    }

    /// Tree record files with modification times, newest first
    fn tree_files(&self, project_key: &str) -> Result<Vec<(PathBuf, SystemTime)>, CacheError> {
        let dir = self.project_dir(project_key).join(TREES_DIR);
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::io(&dir, e)),
        };

        let mut files = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| CacheError::io(&dir, e))?;
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "bin") {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(UNIX_EPOCH);
            files.push((path, modified));
        }
        files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(files)
    }

    fn prune(&self, project_key: &str, keep: &Digest) {
        let files = match self.tree_files(project_key) {
            Ok(files) => files,
            Err(e) => {
                warn!(project = project_key, error = %e, "failed to list cache history");
                return;
            }
        };

        let keep_name = format!("{}.bin", keep.to_hex());
        let stale = files
            .into_iter()
            .filter(|(path, _)| path.file_name().map_or(true, |n| n != keep_name.as_str()))
            .skip(self.policy.retain_trees.saturating_sub(1));
        for (path, _) in stale {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to prune cache history");
            }
        }
    }
}

fn encode_tree_record(record: &TreeRecord) -> Result<Vec<u8>, CacheError> {
    let raw = bincode::serialize(record).map_err(|e| CacheError::Write(anyhow::Error::new(e)))?;
    let compressed = zstd::encode_all(raw.as_slice(), 3).map_err(|e| CacheError::Write(e.into()))?;
    let mut out = Vec::with_capacity(TREE_MAGIC.len() + compressed.len());
    out.extend_from_slice(TREE_MAGIC);
    out.extend_from_slice(&compressed);
    Ok(out)
}

fn decode_tree_record(bytes: &[u8]) -> Result<TreeRecord, String> {
    let body = bytes
        .strip_prefix(TREE_MAGIC.as_slice())
        .ok_or_else(|| "bad magic".to_string())?;
    let raw = zstd::decode_all(body).map_err(|e| format!("decompress: {}", e))?;
    bincode::deserialize(&raw).map_err(|e| format!("decode: {}", e))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
