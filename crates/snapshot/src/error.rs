//! Snapshot error taxonomy

use codesnap_cache::CacheError;
use codesnap_core::TreeError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the snapshot subsystem
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Oversize snapshot or too many files
    #[error("snapshot validation failed: {0}")]
    Validation(String),

    /// Non-success status from the remote service
    #[error("{operation} failed with status {status}: {message}")]
    Remote {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// The remote service rejected a manifest commit
    #[error("snapshot commit rejected with status {status}: {message}")]
    CommitRejected { status: u16, message: String },

    /// Commit still rejected after the single retry
    #[error("snapshot commit failed after retry: {0}")]
    CommitFailed(#[source] Box<SnapshotError>),

    #[error("malformed response from {operation}: {reason}")]
    MalformedResponse {
        operation: &'static str,
        reason: String,
    },

    #[error(
        "upload of {path} timed out after {timeout_ms} ms; set {env_var} to a larger number of seconds to raise the limit"
    )]
    UploadTimeout {
        path: String,
        timeout_ms: u64,
        env_var: &'static str,
    },

    /// A batch upload failed; the counts cover every file scheduled so far
    #[error("snapshot upload aborted ({scheduled_files} files, {scheduled_bytes} bytes scheduled): {source}")]
    Upload {
        scheduled_files: usize,
        scheduled_bytes: u64,
        source: Box<SnapshotError>,
    },

    /// Connection-level failure talking to the remote service
    #[error("{operation} transport error: {message}")]
    Transport {
        operation: &'static str,
        message: String,
        timeout: bool,
    },

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("failed to load exclusion rules for {path}: {message}")]
    Exclusion { path: PathBuf, message: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot task failed: {0}")]
    Task(String),
}

impl SnapshotError {
    /// Whether another attempt of the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SnapshotError::Transport { .. } | SnapshotError::UploadTimeout { .. } => true,
            SnapshotError::Remote { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }

    pub fn is_commit_rejection(&self) -> bool {
        matches!(self, SnapshotError::CommitRejected { .. })
    }

    pub(crate) fn from_reqwest(operation: &'static str, err: reqwest::Error) -> Self {
        SnapshotError::Transport {
            operation,
            timeout: err.is_timeout(),
            message: err.to_string(),
        }
    }
}

/// 408, 429 and 5xx responses are worth retrying
pub fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let remote = |status| SnapshotError::Remote {
            operation: "upload",
            status,
            message: String::new(),
        };
        assert!(remote(503).is_retryable());
        assert!(remote(429).is_retryable());
        assert!(!remote(404).is_retryable());
        assert!(!SnapshotError::Validation("too big".into()).is_retryable());
    }

    #[test]
    fn test_timeout_message_names_override() {
        let err = SnapshotError::UploadTimeout {
            path: "a.txt".into(),
            timeout_ms: 1500,
            env_var: crate::config::ENV_UPLOAD_TIMEOUT_SECS,
        };
        let message = err.to_string();
        assert!(message.contains("a.txt"));
        assert!(message.contains(crate::config::ENV_UPLOAD_TIMEOUT_SECS));
    }
}
