//! Result reporting
//!
//! A [`Reporter`] receives four independent reports per run: the log
//! directory, the produced outputs, the run status and the environment build
//! log. The orchestrator runs them concurrently.

use crate::error::RunError;
use crate::fsutil::{copy_tree, list_files};
use async_trait::async_trait;
use bytes::Bytes;
use codesnap_core::atomic_write;
use codesnap_snapshot::HttpRemote;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// Everything reported about one finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub name: String,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub snapshot_id: Option<String>,
    pub working_dir: PathBuf,
    pub log_dir: PathBuf,
    pub output_dir: PathBuf,
    pub env_build_log: Option<PathBuf>,
    /// Infrastructure error that ended the run, if any
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

#[async_trait]
pub trait Reporter: Send + Sync {
    async fn upload_logs(&self, report: &RunReport) -> Result<(), RunError>;
    async fn upload_outputs(&self, report: &RunReport) -> Result<(), RunError>;
    async fn update_status(&self, report: &RunReport) -> Result<(), RunError>;
    /// Upload the environment build log; nothing to do when the run has none
    async fn upload_env_build_log(&self, report: &RunReport) -> Result<(), RunError>;
}

/// Reports to the remote service over HTTP
pub struct HttpReporter {
    remote: Arc<HttpRemote>,
}

impl HttpReporter {
    pub fn new(remote: Arc<HttpRemote>) -> Self {
        Self { remote }
    }

    async fn upload_dir(&self, task: &'static str, run_id: &str, kind: &str, dir: &Path) -> Result<(), RunError> {
        let dir = dir.to_path_buf();
        let files = tokio::task::spawn_blocking(move || list_files(&dir))
            .await
            .map_err(|e| RunError::Task {
                task,
                message: e.to_string(),
            })?
            .map_err(|e| report_error(task, e))?;

        for (rel, path) in files {
            let body = tokio::fs::read(&path).await.map_err(|e| report_error(task, e))?;
            self.remote
                .upload_run_artifact(run_id, kind, &rel, Bytes::from(body))
                .await
                .map_err(|e| report_error(task, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn upload_logs(&self, report: &RunReport) -> Result<(), RunError> {
        self.upload_dir("logs", &report.run_id, "logs", &report.log_dir).await
    }

    async fn upload_outputs(&self, report: &RunReport) -> Result<(), RunError> {
        self.upload_dir("outputs", &report.run_id, "outputs", &report.output_dir)
            .await
    }

    async fn update_status(&self, report: &RunReport) -> Result<(), RunError> {
        self.remote
            .update_run_status(&report.run_id, report)
            .await
            .map_err(|e| report_error("status", e))
    }

    async fn upload_env_build_log(&self, report: &RunReport) -> Result<(), RunError> {
        let Some(log) = report.env_build_log.as_ref().filter(|p| p.is_file()) else {
            return Ok(());
        };
        let body = tokio::fs::read(log).await.map_err(|e| report_error("env_log", e))?;
        self.remote
            .upload_run_artifact(&report.run_id, "env", crate::environment::BUILD_LOG, Bytes::from(body))
            .await
            .map_err(|e| report_error("env_log", e))
    }
}

/// Copies reports under `<results_root>/<run_id>/`
pub struct LocalReporter {
    results_root: PathBuf,
}

impl LocalReporter {
    pub fn new(results_root: impl Into<PathBuf>) -> Self {
        Self {
            results_root: results_root.into(),
        }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.results_root.join(run_id)
    }

    async fn copy(&self, task: &'static str, source: &Path, dest: PathBuf) -> Result<(), RunError> {
        let source = source.to_path_buf();
        let copied = tokio::task::spawn_blocking(move || copy_tree(&source, &dest))
            .await
            .map_err(|e| RunError::Task {
                task,
                message: e.to_string(),
            })?
            .map_err(|e| report_error(task, e))?;
        debug!(task, files = copied, "copied run results");
        Ok(())
    }
}

#[async_trait]
impl Reporter for LocalReporter {
    async fn upload_logs(&self, report: &RunReport) -> Result<(), RunError> {
        self.copy("logs", &report.log_dir, self.run_dir(&report.run_id).join("logs"))
            .await
    }

    async fn upload_outputs(&self, report: &RunReport) -> Result<(), RunError> {
        self.copy("outputs", &report.output_dir, self.run_dir(&report.run_id).join("outputs"))
            .await
    }

    async fn update_status(&self, report: &RunReport) -> Result<(), RunError> {
        let body = serde_json::to_vec_pretty(report).map_err(|e| report_error("status", e))?;
        let target = self.run_dir(&report.run_id).join("status.json");
        tokio::task::spawn_blocking(move || atomic_write(&target, &body))
            .await
            .map_err(|e| RunError::Task {
                task: "status",
                message: e.to_string(),
            })?
            .map_err(|e| report_error("status", format!("{:#}", e)))
    }

    async fn upload_env_build_log(&self, report: &RunReport) -> Result<(), RunError> {
        let Some(log) = report.env_build_log.clone().filter(|p| p.is_file()) else {
            return Ok(());
        };
        let dest = self
            .run_dir(&report.run_id)
            .join(crate::environment::BUILD_LOG);
        tokio::fs::create_dir_all(self.run_dir(&report.run_id))
            .await
            .map_err(|e| report_error("env_log", e))?;
        tokio::fs::copy(&log, &dest)
            .await
            .map_err(|e| report_error("env_log", e))?;
        Ok(())
    }
}

fn report_error(task: &'static str, err: impl std::fmt::Display) -> RunError {
    RunError::Report {
        task,
        message: err.to_string(),
    }
}
