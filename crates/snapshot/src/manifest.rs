//! Snapshot manifest model

use codesnap_core::ContentNode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One uploaded file of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRevision {
    pub relative_path: String,
    /// Remote location the bytes were written to
    pub blob_location: String,
    pub size_bytes: u64,
}

/// Document committed to the remote service to create a snapshot
///
/// `snapshot_id` is derived from `root_tree.digest`, so resubmitting the same
/// manifest is idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub snapshot_id: String,
    pub parent_snapshot_id: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub root_tree: ContentNode,
    #[serde(default)]
    pub file_revisions: Vec<FileRevision>,
}

impl SnapshotManifest {
    pub fn uploaded_bytes(&self) -> u64 {
        self.file_revisions.iter().map(|r| r.size_bytes).sum()
    }
}
