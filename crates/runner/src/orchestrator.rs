//! Run orchestration
//!
//! ```text
//! Created -> Preparing -> EnvironmentReady -> Running -> Succeeded -> Reporting -> Finished
//!                                                     -> Failed    -> Reporting -> Finished
//! ```
//! Preparation publishes the unit's source snapshot and resolves its inputs
//! concurrently. Reporting launches four background tasks (logs, outputs,
//! status, environment build log) and `run` returns only after all of them
//! have been joined, on every path including infrastructure failures.

use crate::definition::{ExecutionMode, RunUnit};
use crate::environment::{Environment, EnvironmentBuilder};
use crate::error::RunError;
use crate::executor::{ExecutionResult, Executor};
use crate::inputs::{InputResolver, ResolvedInputs};
use crate::publish::SnapshotPublisher;
use crate::registry::EnvironmentRegistry;
use crate::report::{Reporter, RunReport, RunStatus};
use crate::tasks::BackgroundTasks;
use codesnap_snapshot::WorkerPool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Preparing,
    EnvironmentReady,
    Running,
    Succeeded,
    Failed,
    Reporting,
    Finished,
}

/// Collaborators shared by every run of a process
///
/// The registry in particular must be the same instance for all units so
/// that concurrent runs needing one environment build it once.
#[derive(Clone)]
pub struct RunServices {
    pub publisher: Arc<dyn SnapshotPublisher>,
    pub inputs: Arc<dyn InputResolver>,
    pub builder: Arc<dyn EnvironmentBuilder>,
    pub registry: Arc<EnvironmentRegistry>,
    pub executor: Arc<dyn Executor>,
    pub reporter: Arc<dyn Reporter>,
    pub pool: WorkerPool,
}

/// Terminal result of a run, with the diagnostics of a failed one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub snapshot_id: Option<String>,
    pub log_path: PathBuf,
    pub working_dir: PathBuf,
    pub output_dir: PathBuf,
    /// False once a successful run's working directory has been removed
    pub workdir_retained: bool,
    pub duration: Duration,
    /// Number of report tasks joined before returning
    pub reports_joined: usize,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Drives one [`RunUnit`] from preparation to reported result
pub struct RunOrchestrator {
    unit: RunUnit,
    services: RunServices,
    state: RunState,
    snapshot_id: Option<String>,
    env_build_log: Option<PathBuf>,
}

impl RunOrchestrator {
    pub fn new(unit: RunUnit, services: RunServices) -> Self {
        Self {
            unit,
            services,
            state: RunState::Created,
            snapshot_id: None,
            env_build_log: None,
        }
    }

    pub fn unit(&self) -> &RunUnit {
        &self.unit
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run the unit end to end
    ///
    /// A non-zero exit of the unit's command is a user failure: it is returned
    /// as [`RunError::UserCodeFailed`] when `raise_on_error` is set and as a
    /// failed [`RunOutcome`] otherwise. Infrastructure errors are always
    /// returned, after a best-effort failure report.
    pub async fn run(&mut self, raise_on_error: bool) -> Result<RunOutcome, RunError> {
        let started = Instant::now();

        let execution = match self.drive().await {
            Ok(execution) => execution,
            Err(err) => {
                self.transition(RunState::Failed);
                warn!(run_id = %self.unit.run_id, error = %err, "run aborted by infrastructure failure");

                let report = self.report(RunStatus::Failed, None, started.elapsed(), Some(err.to_string()));
                if let Err(report_err) = self.report_result(report).await {
                    warn!(run_id = %self.unit.run_id, error = %report_err, "failure report incomplete");
                }
                self.transition(RunState::Finished);
                return Err(err);
            }
        };

        let status = if execution.success {
            self.transition(RunState::Succeeded);
            RunStatus::Succeeded
        } else {
            self.transition(RunState::Failed);
            RunStatus::Failed
        };

        let report = self.report(status, execution.exit_code, started.elapsed(), None);
        let reported = self.report_result(report).await;
        self.transition(RunState::Finished);

        if !execution.success && raise_on_error {
            if let Err(report_err) = &reported {
                warn!(run_id = %self.unit.run_id, error = %report_err, "failure report incomplete");
            }
            return Err(self.user_failure(&execution));
        }
        let reports_joined = reported?;

        let workdir_retained = !execution.success || self.unit.definition.keep_workdir || !self.remove_workdir().await;
        let outcome = RunOutcome {
            run_id: self.unit.run_id.to_string(),
            status,
            exit_code: execution.exit_code,
            snapshot_id: self.snapshot_id.clone(),
            log_path: execution.log_path,
            working_dir: self.unit.working_dir.clone(),
            output_dir: self.unit.output_dir(),
            workdir_retained,
            duration: started.elapsed(),
            reports_joined,
        };

        if outcome.succeeded() {
            info!(run_id = %outcome.run_id, duration_ms = outcome.duration.as_millis() as u64, "run succeeded");
        } else {
            warn!(
                run_id = %outcome.run_id,
                exit_code = ?outcome.exit_code,
                log = %outcome.log_path.display(),
                working_dir = %outcome.working_dir.display(),
                outputs = %outcome.output_dir.display(),
                "run failed"
            );
        }
        Ok(outcome)
    }

    async fn drive(&mut self) -> Result<ExecutionResult, RunError> {
        self.transition(RunState::Preparing);
        let (snapshot_id, resolved) = self.prepare().await?;
        self.snapshot_id = Some(snapshot_id);

        let environment = self.ensure_environment().await?;
        self.transition(RunState::EnvironmentReady);

        self.transition(RunState::Running);
        self.services
            .executor
            .execute(&self.unit, &resolved.command, environment.as_deref())
            .await
    }

    /// Publish the source snapshot and resolve inputs concurrently
    async fn prepare(&self) -> Result<(String, ResolvedInputs), RunError> {
        let project_key = self.unit.project_key();
        let publish = self.services.publisher.publish(self.unit.source_dir(), &project_key);
        let (snapshot_id, resolved) = tokio::try_join!(publish, self.resolve_inputs())?;
        debug!(run_id = %self.unit.run_id, %snapshot_id, inputs = resolved.inputs.len(), "run prepared");
        Ok((snapshot_id, resolved))
    }

    async fn resolve_inputs(&self) -> Result<ResolvedInputs, RunError> {
        self.services
            .pool
            .run(self.services.inputs.resolve(&self.unit))
            .await
            .map_err(|e| RunError::infra("resolving inputs", e))?
    }

    /// Build or join the build of the unit's environment; direct runs need none
    async fn ensure_environment(&mut self) -> Result<Option<Arc<Environment>>, RunError> {
        let mode = self.unit.mode();
        if mode == ExecutionMode::Direct {
            return Ok(None);
        }

        let spec = self.unit.definition.environment.clone();
        let key = spec.identity(mode);
        let builder = Arc::clone(&self.services.builder);
        let pool = self.services.pool.clone();
        let build_key = key.clone();

        let built = self
            .services
            .registry
            .get_or_create(&key, move || async move {
                match pool.run(builder.build(&build_key, &spec, mode)).await {
                    Ok(result) => result,
                    Err(closed) => Err(RunError::infra("building environment", closed)),
                }
            })
            .await;

        match built {
            Ok(environment) => {
                self.env_build_log = environment.build_log.clone();
                debug!(run_id = %self.unit.run_id, env = %key, "environment ready");
                Ok(Some(environment))
            }
            Err(err) => {
                self.env_build_log = build_log_of(&err);
                Err(err)
            }
        }
    }

    /// Launch the four report tasks and join every one of them
    async fn report_result(&mut self, report: RunReport) -> Result<usize, RunError> {
        self.transition(RunState::Reporting);
        let report = Arc::new(report);
        let mut tasks = BackgroundTasks::new();

        let (reporter, r) = (Arc::clone(&self.services.reporter), Arc::clone(&report));
        tasks.spawn("logs", async move { reporter.upload_logs(&r).await });

        let (reporter, r) = (Arc::clone(&self.services.reporter), Arc::clone(&report));
        tasks.spawn("outputs", async move { reporter.upload_outputs(&r).await });

        let (reporter, r) = (Arc::clone(&self.services.reporter), Arc::clone(&report));
        tasks.spawn("status", async move { reporter.update_status(&r).await });

        let (reporter, r) = (Arc::clone(&self.services.reporter), Arc::clone(&report));
        tasks.spawn("env_log", async move { reporter.upload_env_build_log(&r).await });

        tasks.join_all().await
    }

    fn report(&self, status: RunStatus, exit_code: Option<i32>, elapsed: Duration, error: Option<String>) -> RunReport {
        RunReport {
            run_id: self.unit.run_id.to_string(),
            name: self.unit.definition.name.clone(),
            status,
            exit_code,
            snapshot_id: self.snapshot_id.clone(),
            working_dir: self.unit.working_dir.clone(),
            log_dir: self.unit.log_dir(),
            output_dir: self.unit.output_dir(),
            env_build_log: self.env_build_log.clone(),
            error,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    fn user_failure(&self, execution: &ExecutionResult) -> RunError {
        RunError::UserCodeFailed {
            run_id: self.unit.run_id.to_string(),
            exit_code: execution.exit_code,
            log_path: execution.log_path.clone(),
            working_dir: self.unit.working_dir.clone(),
            output_dir: self.unit.output_dir(),
        }
    }

    /// Returns whether the working directory is gone
    async fn remove_workdir(&self) -> bool {
        match tokio::fs::remove_dir_all(&self.unit.working_dir).await {
            Ok(()) => true,
            Err(err) => {
                warn!(dir = %self.unit.working_dir.display(), error = %err, "could not remove working directory");
                false
            }
        }
    }

    fn transition(&mut self, next: RunState) {
        debug!(run_id = %self.unit.run_id, from = ?self.state, to = ?next, "run state");
        self.state = next;
    }
}

fn build_log_of(err: &RunError) -> Option<PathBuf> {
    match err {
        RunError::EnvironmentBuild { log_path, .. } => Some(log_path.clone()),
        RunError::Shared(inner) => build_log_of(inner),
        _ => None,
    }
}
