//! Snapshot publishing seam used during run preparation

use crate::error::RunError;
use async_trait::async_trait;
use codesnap_snapshot::{SnapshotOptions, SnapshotService};
use std::path::Path;

#[async_trait]
pub trait SnapshotPublisher: Send + Sync {
    /// Publish `folder` under `project_key`; returns the snapshot id
    async fn publish(&self, folder: &Path, project_key: &str) -> Result<String, RunError>;
}

#[async_trait]
impl SnapshotPublisher for SnapshotService {
    async fn publish(&self, folder: &Path, project_key: &str) -> Result<String, RunError> {
        let id = self
            .publish_folder(folder, project_key, SnapshotOptions::default())
            .await?;
        Ok(id)
    }
}
