//! Run error taxonomy

use codesnap_snapshot::SnapshotError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while running a unit
#[derive(Debug, Error)]
pub enum RunError {
    /// The unit's own command failed; carries diagnostics for the caller
    #[error(
        "run {run_id} failed (exit code {exit_code:?}); log: {log_path}, working directory: {working_dir}, outputs: {output_dir}"
    )]
    UserCodeFailed {
        run_id: String,
        exit_code: Option<i32>,
        log_path: PathBuf,
        working_dir: PathBuf,
        output_dir: PathBuf,
    },

    /// Host-level failure: process spawn, missing docker, disk I/O
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),

    #[error("environment {key} failed to build: {message} (log: {log_path})")]
    EnvironmentBuild {
        key: String,
        message: String,
        log_path: PathBuf,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("input resolution failed: {0}")]
    Input(String),

    #[error("{task} report failed: {message}")]
    Report { task: &'static str, message: String },

    #[error("background task {task} did not complete: {message}")]
    Task { task: &'static str, message: String },

    /// Failure of a build shared with other callers of the environment registry
    #[error(transparent)]
    Shared(Arc<RunError>),

    #[error("invalid run definition {path}: {message}")]
    Definition { path: PathBuf, message: String },
}

impl RunError {
    pub fn is_user_failure(&self) -> bool {
        matches!(self, RunError::UserCodeFailed { .. })
    }

    pub(crate) fn infra(context: &str, err: impl std::fmt::Display) -> Self {
        RunError::Infrastructure(format!("{}: {}", context, err))
    }
}
