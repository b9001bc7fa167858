//! Fakes shared by the runner integration tests
//!
//! `CountingReporter` is the join counter: each report task sleeps before
//! recording itself, so a count of four after `run` returns means every task
//! was awaited.

#![allow(dead_code)]

use async_trait::async_trait;
use codesnap_runner::{
    Environment, EnvironmentBuilder, EnvironmentRegistry, EnvironmentSpec, ExecutionMode, ExecutionResult,
    Executor, LocalInputResolver, Reporter, RunDefinition, RunError, RunReport, RunServices, RunUnit,
    SnapshotPublisher,
};
use codesnap_snapshot::WorkerPool;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct FakePublisher {
    pub calls: AtomicUsize,
    fail: Mutex<Option<String>>,
}

impl FakePublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(message: &str) -> Arc<Self> {
        let publisher = Self::default();
        *publisher.fail.lock() = Some(message.to_string());
        Arc::new(publisher)
    }
}

#[async_trait]
impl SnapshotPublisher for FakePublisher {
    async fn publish(&self, _folder: &Path, _project_key: &str) -> Result<String, RunError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        match self.fail.lock().clone() {
            Some(message) => Err(RunError::Infrastructure(message)),
            None => Ok("snap-0001".to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Exit(i32),
    Infrastructure(String),
}

pub struct FakeExecutor {
    behavior: Behavior,
    pub commands: Mutex<Vec<String>>,
    pub environments: Mutex<Vec<Option<String>>>,
}

impl FakeExecutor {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            commands: Mutex::new(Vec::new()),
            environments: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(
        &self,
        unit: &RunUnit,
        command: &str,
        environment: Option<&Environment>,
    ) -> Result<ExecutionResult, RunError> {
        self.commands.lock().push(command.to_string());
        self.environments.lock().push(environment.map(|e| e.key.clone()));

        let (success, exit_code) = match &self.behavior {
            Behavior::Succeed => (true, Some(0)),
            Behavior::Exit(code) => (false, Some(*code)),
            Behavior::Infrastructure(message) => return Err(RunError::Infrastructure(message.clone())),
        };
        std::fs::write(unit.user_log(), "fake run\n").unwrap();
        Ok(ExecutionResult {
            success,
            exit_code,
            log_path: unit.user_log(),
            duration: Duration::from_millis(1),
        })
    }
}

pub struct FakeBuilder {
    pub builds: AtomicUsize,
    delay: Duration,
    root: PathBuf,
}

impl FakeBuilder {
    pub fn new(root: &Path, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            builds: AtomicUsize::new(0),
            delay,
            root: root.to_path_buf(),
        })
    }
}

#[async_trait]
impl EnvironmentBuilder for FakeBuilder {
    async fn build(&self, key: &str, spec: &EnvironmentSpec, mode: ExecutionMode) -> Result<Environment, RunError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(Environment {
            key: key.to_string(),
            mode,
            root: self.root.join(key),
            image: spec.image.clone(),
            build_log: None,
        })
    }
}

#[derive(Default)]
pub struct CountingReporter {
    pub joined: AtomicUsize,
    pub statuses: Mutex<Vec<RunReport>>,
    pub tasks: Mutex<Vec<&'static str>>,
    fail_task: Mutex<Option<&'static str>>,
}

impl CountingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the named report task fail after it has been counted
    pub fn failing(task: &'static str) -> Arc<Self> {
        let reporter = Self::default();
        *reporter.fail_task.lock() = Some(task);
        Arc::new(reporter)
    }

    pub fn joined(&self) -> usize {
        self.joined.load(Ordering::SeqCst)
    }

    pub fn last_status(&self) -> Option<RunReport> {
        self.statuses.lock().last().cloned()
    }

    async fn record(&self, task: &'static str, delay_ms: u64) -> Result<(), RunError> {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        self.tasks.lock().push(task);
        self.joined.fetch_add(1, Ordering::SeqCst);
        if *self.fail_task.lock() == Some(task) {
            return Err(RunError::Report {
                task,
                message: "remote unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Reporter for CountingReporter {
    async fn upload_logs(&self, _report: &RunReport) -> Result<(), RunError> {
        self.record("logs", 30).await
    }

    async fn upload_outputs(&self, _report: &RunReport) -> Result<(), RunError> {
        self.record("outputs", 20).await
    }

    async fn update_status(&self, report: &RunReport) -> Result<(), RunError> {
        self.statuses.lock().push(report.clone());
        self.record("status", 10).await
    }

    async fn upload_env_build_log(&self, _report: &RunReport) -> Result<(), RunError> {
        self.record("env_log", 40).await
    }
}

pub struct Fakes {
    pub publisher: Arc<FakePublisher>,
    pub executor: Arc<FakeExecutor>,
    pub builder: Arc<FakeBuilder>,
    pub reporter: Arc<CountingReporter>,
    pub registry: Arc<EnvironmentRegistry>,
}

impl Fakes {
    pub fn new(root: &Path, behavior: Behavior) -> Self {
        Self {
            publisher: FakePublisher::new(),
            executor: FakeExecutor::new(behavior),
            builder: FakeBuilder::new(&root.join("envs"), Duration::from_millis(30)),
            reporter: CountingReporter::new(),
            registry: Arc::new(EnvironmentRegistry::new()),
        }
    }

    pub fn services(&self) -> RunServices {
        RunServices {
            publisher: self.publisher.clone(),
            inputs: Arc::new(LocalInputResolver),
            builder: self.builder.clone(),
            registry: Arc::clone(&self.registry),
            executor: self.executor.clone(),
            reporter: self.reporter.clone(),
            pool: WorkerPool::new(4),
        }
    }
}

pub fn definition(source: &Path, mode: ExecutionMode) -> RunDefinition {
    RunDefinition {
        name: "train".to_string(),
        command: "train --lr {params.lr}".to_string(),
        source: source.to_path_buf(),
        mode,
        environment: EnvironmentSpec {
            key: None,
            build: Some("setup {env_dir}".to_string()),
            image: (mode == ExecutionMode::Containerized).then(|| "alpine:3".to_string()),
        },
        inputs: Default::default(),
        params: [("lr".to_string(), "0.1".to_string())].into_iter().collect(),
        output_dir: "outputs".to_string(),
        keep_workdir: false,
    }
}

pub fn unit(root: &Path, mode: ExecutionMode) -> RunUnit {
    let source = root.join("src");
    std::fs::create_dir_all(&source).unwrap();
    RunUnit::create(definition(&source, mode), &root.join("runs")).unwrap()
}
