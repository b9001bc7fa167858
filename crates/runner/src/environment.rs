//! Execution environment builders

use crate::definition::{EnvironmentSpec, ExecutionMode};
use crate::error::RunError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info};

/// File name of the build log inside an environment directory
pub const BUILD_LOG: &str = "env-build.log";
const READY_MARKER: &str = ".ready";

/// A built environment, shared by every unit with the same identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub key: String,
    pub mode: ExecutionMode,
    /// Environment directory; `<root>/bin` is prepended to `PATH` in isolated mode
    pub root: PathBuf,
    pub image: Option<String>,
    /// Build log, when a build ran or left one behind
    pub build_log: Option<PathBuf>,
}

impl Environment {
    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }
}

#[async_trait]
pub trait EnvironmentBuilder: Send + Sync {
    async fn build(&self, key: &str, spec: &EnvironmentSpec, mode: ExecutionMode) -> Result<Environment, RunError>;
}

/// Builds environments by running their `build` shell command
///
/// Each environment lives in `<envs_root>/<key>`; a `.ready` marker written
/// after a successful build lets later processes reuse it without rebuilding.
pub struct CommandEnvironmentBuilder {
    envs_root: PathBuf,
}

impl CommandEnvironmentBuilder {
    pub fn new(envs_root: impl Into<PathBuf>) -> Self {
        Self {
            envs_root: envs_root.into(),
        }
    }

    pub fn envs_root(&self) -> &Path {
        &self.envs_root
    }
}

#[async_trait]
impl EnvironmentBuilder for CommandEnvironmentBuilder {
    async fn build(&self, key: &str, spec: &EnvironmentSpec, mode: ExecutionMode) -> Result<Environment, RunError> {
        let root = self.envs_root.join(key);
        let log_path = root.join(BUILD_LOG);
        let mut environment = Environment {
            key: key.to_string(),
            mode,
            root: root.clone(),
            image: spec.image.clone(),
            build_log: log_path.is_file().then(|| log_path.clone()),
        };

        if root.join(READY_MARKER).is_file() {
            debug!(key, root = %root.display(), "reusing built environment");
            return Ok(environment);
        }

        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| RunError::infra(&format!("creating {}", root.display()), e))?;

        if let Some(template) = &spec.build {
            let command = template.replace("{env_dir}", &root.to_string_lossy());
            info!(key, %command, "building environment");

            let log = std::fs::File::create(&log_path)
                .map_err(|e| RunError::infra(&format!("creating {}", log_path.display()), e))?;
            let log_err = log
                .try_clone()
                .map_err(|e| RunError::infra("duplicating build log handle", e))?;

            let status = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&command)
                .current_dir(&root)
                .stdin(Stdio::null())
                .stdout(Stdio::from(log))
                .stderr(Stdio::from(log_err))
                .status()
                .await
                .map_err(|e| RunError::infra("spawning environment build", e))?;

            environment.build_log = Some(log_path.clone());
            if !status.success() {
                return Err(RunError::EnvironmentBuild {
                    key: key.to_string(),
                    message: format!("build command exited with {}", status),
                    log_path,
                });
            }
        }

        tokio::fs::write(root.join(READY_MARKER), b"")
            .await
            .map_err(|e| RunError::infra("marking environment ready", e))?;
        info!(key, "environment ready");
        Ok(environment)
    }
}
