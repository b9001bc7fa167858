//! Snapshot configuration
//!
//! Values come from defaults, an optional TOML file, then environment
//! overrides, and are validated before use.

use anyhow::{Context, Result};
use codesnap_core::IgnoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Disables the snapshot size limit when set to a truthy value
pub const ENV_DISABLE_SIZE_LIMIT: &str = "SNAPSHOT_DISABLE_SIZE_LIMIT";
/// Disables the snapshot file-count limit when set to a truthy value
pub const ENV_DISABLE_FILE_COUNT_LIMIT: &str = "SNAPSHOT_DISABLE_FILE_COUNT_LIMIT";
/// Replaces the per-request upload timeout (seconds)
pub const ENV_UPLOAD_TIMEOUT_SECS: &str = "SNAPSHOT_UPLOAD_TIMEOUT_SECS";
pub const ENV_SERVICE_URL: &str = "SNAPSHOT_SERVICE_URL";
pub const ENV_SERVICE_TOKEN: &str = "SNAPSHOT_SERVICE_TOKEN";
pub const ENV_CACHE_DIR: &str = "SNAPSHOT_CACHE_DIR";

/// Upload tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Files uploaded concurrently per batch
    pub batch_size: usize,
    /// Retries after the first attempt of one file
    pub max_retries: u32,
    /// First backoff delay; doubles per retry
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Per-request timeout
    pub timeout_ms: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            timeout_ms: 600_000,
        }
    }
}

impl UploadSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Backoff before retry number `attempt` (0-based), with up to 25% jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .backoff_base_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.backoff_max_ms);
        let jitter = if exp >= 4 {
            rand::Rng::gen_range(&mut rand::thread_rng(), 0..exp / 4)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }
}

/// Snapshot subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Maximum snapshot size in bytes (default: 300 MiB)
    pub max_snapshot_bytes: u64,
    /// Maximum number of files uploaded by one snapshot (default: 2000)
    pub max_file_count: usize,
    pub enforce_size_limit: bool,
    pub enforce_file_count_limit: bool,
    /// Gather git branch/commit tags into snapshot properties
    pub collect_scm_tags: bool,
    pub upload: UploadSettings,
    pub cache_dir: Option<PathBuf>,
    pub service_url: Option<String>,
    #[serde(skip_serializing)]
    pub service_token: Option<String>,
    pub ignore: IgnoreConfig,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_snapshot_bytes: 300 * 1024 * 1024,
            max_file_count: 2000,
            enforce_size_limit: true,
            enforce_file_count_limit: true,
            collect_scm_tags: true,
            upload: UploadSettings::default(),
            cache_dir: None,
            service_url: None,
            service_token: None,
            ignore: IgnoreConfig::default(),
        }
    }
}

impl SnapshotConfig {
    /// Load from an optional TOML file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if lookup(ENV_DISABLE_SIZE_LIMIT).map_or(false, |v| is_truthy(&v)) {
            self.enforce_size_limit = false;
        }
        if lookup(ENV_DISABLE_FILE_COUNT_LIMIT).map_or(false, |v| is_truthy(&v)) {
            self.enforce_file_count_limit = false;
        }
        if let Some(value) = lookup(ENV_UPLOAD_TIMEOUT_SECS) {
            let secs: u64 = value
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of seconds", ENV_UPLOAD_TIMEOUT_SECS))?;
            self.upload.timeout_ms = secs.saturating_mul(1000);
        }
        if let Some(url) = lookup(ENV_SERVICE_URL) {
            self.service_url = Some(url);
        }
        if let Some(token) = lookup(ENV_SERVICE_TOKEN) {
            self.service_token = Some(token);
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.upload.batch_size == 0 || self.upload.batch_size > 1000 {
            anyhow::bail!("upload.batch_size must be between 1 and 1000");
        }
        if self.upload.max_retries > 10 {
            anyhow::bail!("upload.max_retries must be at most 10");
        }
        if self.upload.timeout_ms == 0 {
            anyhow::bail!("upload.timeout_ms must be positive");
        }
        if self.upload.backoff_max_ms < self.upload.backoff_base_ms {
            anyhow::bail!("upload.backoff_max_ms must not be below upload.backoff_base_ms");
        }
        Ok(())
    }

    /// Cache directory, defaulting to the user cache dir
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("codesnap")
                .join("snapshots")
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
