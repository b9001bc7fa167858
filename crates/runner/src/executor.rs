//! Process execution of run units

use crate::definition::{ExecutionMode, RunUnit, CONTAINER_WORKDIR};
use crate::environment::Environment;
use crate::error::RunError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Outcome of the unit's command
///
/// A non-zero exit is a normal, unsuccessful result; only failures to run the
/// command at all are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub log_path: PathBuf,
    pub duration: Duration,
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        unit: &RunUnit,
        command: &str,
        environment: Option<&Environment>,
    ) -> Result<ExecutionResult, RunError>;
}

/// Exit status `docker run` uses when the container could not be started
const CONTAINER_RUN_FAILURE: i32 = 125;

/// Runs commands as child processes, directly or via `docker run`
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    docker: String,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self {
            docker: "docker".to_string(),
        }
    }
}

impl ProcessExecutor {
    /// Use a different container CLI (e.g. `podman`)
    pub fn with_container_cli(mut self, cli: impl Into<String>) -> Self {
        self.docker = cli.into();
        self
    }

    fn command(
        &self,
        unit: &RunUnit,
        command: &str,
        environment: Option<&Environment>,
    ) -> Result<tokio::process::Command, RunError> {
        let run_id = unit.run_id.to_string();

        let cmd = match unit.mode() {
            ExecutionMode::Direct | ExecutionMode::IsolatedEnvironment => {
                let mut cmd = tokio::process::Command::new("sh");
                cmd.arg("-c")
                    .arg(command)
                    .current_dir(&unit.working_dir)
                    .env("RUN_ID", &run_id)
                    .env("RUN_OUTPUT_DIR", unit.output_dir());

                if unit.mode() == ExecutionMode::IsolatedEnvironment {
                    let env = environment.ok_or_else(|| {
                        RunError::Infrastructure("isolated mode requires a built environment".to_string())
                    })?;
                    let path = match std::env::var_os("PATH") {
                        Some(existing) => {
                            let mut paths = vec![env.bin_dir()];
                            paths.extend(std::env::split_paths(&existing));
                            std::env::join_paths(paths).map_err(|e| RunError::infra("building PATH", e))?
                        }
                        None => env.bin_dir().into_os_string(),
                    };
                    cmd.env("PATH", path).env("VIRTUAL_ENV", &env.root);
                }
                cmd
            }
            ExecutionMode::Containerized => {
                let image = environment
                    .and_then(|env| env.image.clone())
                    .or_else(|| unit.definition.environment.image.clone())
                    .ok_or_else(|| RunError::Infrastructure("containerized mode requires an image".to_string()))?;

                let mount = format!("{}:{}", unit.working_dir.display(), CONTAINER_WORKDIR);
                let run_id_env = format!("RUN_ID={}", run_id);
                let output_env = format!("RUN_OUTPUT_DIR={}", unit.command_path(&unit.output_dir()).display());
                let mut cmd = tokio::process::Command::new(&self.docker);
                cmd.args(["run", "--rm", "-v", mount.as_str()])
                    .args(["-w", CONTAINER_WORKDIR])
                    .args(["-e", run_id_env.as_str(), "-e", output_env.as_str()])
                    .arg(&image)
                    .args(["sh", "-c", command])
                    .current_dir(&unit.working_dir);
                cmd
            }
        };
        Ok(cmd)
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(
        &self,
        unit: &RunUnit,
        command: &str,
        environment: Option<&Environment>,
    ) -> Result<ExecutionResult, RunError> {
        let log_path = unit.user_log();
        let log = std::fs::File::create(&log_path)
            .map_err(|e| RunError::infra(&format!("creating {}", log_path.display()), e))?;
        let log_err = log
            .try_clone()
            .map_err(|e| RunError::infra("duplicating log handle", e))?;

        let mut cmd = self.command(unit, command, environment)?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true);

        info!(run_id = %unit.run_id, mode = ?unit.mode(), %command, "running unit");
        let started = Instant::now();
        let status = cmd
            .status()
            .await
            .map_err(|e| RunError::infra(&format!("spawning command in {:?} mode", unit.mode()), e))?;
        let duration = started.elapsed();

        if unit.mode() == ExecutionMode::Containerized && status.code() == Some(CONTAINER_RUN_FAILURE) {
            return Err(RunError::Infrastructure(format!(
                "{} could not start the container (exit code {}); see {}",
                self.docker,
                CONTAINER_RUN_FAILURE,
                log_path.display()
            )));
        }

        let result = ExecutionResult {
            success: status.success(),
            exit_code: status.code(),
            log_path,
            duration,
        };
        if result.success {
            info!(run_id = %unit.run_id, duration_ms = duration.as_millis() as u64, "unit succeeded");
        } else {
            warn!(
                run_id = %unit.run_id,
                exit_code = ?result.exit_code,
                log = %result.log_path.display(),
                "unit failed"
            );
        }
        Ok(result)
    }
}
