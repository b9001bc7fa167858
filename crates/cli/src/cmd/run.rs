//! Execute a run definition through the run orchestrator

use crate::setup::{self, Remote};
use crate::util;
use anyhow::{Context, Result};
use codesnap_runner::{
    CommandEnvironmentBuilder, EnvironmentRegistry, HttpReporter, LocalInputResolver, LocalReporter,
    ProcessExecutor, Reporter, RunDefinition, RunError, RunOrchestrator, RunOutcome, RunServices, RunUnit,
};
use codesnap_snapshot::WorkerPool;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub struct RunOptions {
    pub local: bool,
    pub workspace: Option<PathBuf>,
    pub results: Option<PathBuf>,
    pub remote_dir: Option<PathBuf>,
    pub params: Vec<String>,
    pub keep_workdir: bool,
    pub raise_on_error: bool,
}

pub async fn run(config_path: Option<&Path>, definition_path: &Path, options: RunOptions) -> Result<()> {
    // 1. Load the definition and apply overrides
    let mut definition = RunDefinition::load(definition_path)?;
    for raw in &options.params {
        let (key, value) = util::parse_param(raw)?;
        definition.params.insert(key, value);
    }
    definition.keep_workdir |= options.keep_workdir;

    // 2. Wire collaborators
    let workspace = options.workspace.clone().unwrap_or_else(setup::default_workspace);
    let workspace = if workspace.is_absolute() {
        workspace
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(workspace)
    };
    let config = setup::load_config(config_path)?;
    let cache = setup::open_cache(&config)?;
    let pool = WorkerPool::default();
    debug!(workspace = %workspace.display(), local = options.local, workers = pool.size(), "run workspace");

    let (remote, reporter): (Remote, Arc<dyn Reporter>) = if options.local {
        let remote_dir = options.remote_dir.clone().unwrap_or_else(|| workspace.join("remote"));
        let results = options.results.clone().unwrap_or_else(|| workspace.join("results"));
        (
            Remote::select(&config, Some(remote_dir))?,
            Arc::new(LocalReporter::new(results)),
        )
    } else {
        let remote = Remote::select(&config, None)?;
        let reporter: Arc<dyn Reporter> = match &remote {
            Remote::Http(http) => Arc::new(HttpReporter::new(Arc::clone(http))),
            Remote::Directory(_) => anyhow::bail!("Remote runs need the snapshot service"),
        };
        (remote, reporter)
    };

    let services = RunServices {
        publisher: Arc::new(setup::snapshot_service(config, cache, &remote, pool.clone())),
        inputs: Arc::new(LocalInputResolver),
        builder: Arc::new(CommandEnvironmentBuilder::new(workspace.join("envs"))),
        registry: Arc::new(EnvironmentRegistry::new()),
        executor: Arc::new(ProcessExecutor::default()),
        reporter,
        pool,
    };

    let unit = RunUnit::create(definition, &workspace.join("runs"))
        .context("Failed to create run working directory")?;
    println!(
        "{} {} {}",
        "Running".bold(),
        unit.definition.name.cyan(),
        format!("({}, {:?})", unit.run_id, unit.mode()).dimmed()
    );

    // 3. Run and display the outcome
    let mut orchestrator = RunOrchestrator::new(unit, services);
    match orchestrator.run(options.raise_on_error).await {
        Ok(outcome) => {
            display_outcome(&outcome);
            Ok(())
        }
        Err(err @ RunError::UserCodeFailed { .. }) => {
            println!("{}", "Run failed".red().bold());
            Err(err.into())
        }
        Err(err) => Err(anyhow::Error::new(err).context("Run aborted")),
    }
}

fn display_outcome(outcome: &RunOutcome) {
    if outcome.succeeded() {
        println!(
            "{} in {}",
            "Run succeeded".green().bold(),
            util::format_duration(outcome.duration)
        );
    } else {
        println!("{} (exit code {:?})", "Run failed".red().bold(), outcome.exit_code);
    }

    if let Some(snapshot_id) = &outcome.snapshot_id {
        println!("  Snapshot:    {}", snapshot_id.yellow());
    }
    println!("  Run ID:      {}", outcome.run_id);
    if outcome.workdir_retained {
        println!("  Log:         {}", outcome.log_path.display());
        println!("  Working dir: {}", outcome.working_dir.display());
        println!("  Outputs:     {}", outcome.output_dir.display());
    } else {
        println!("  {}", "Working directory removed".dimmed());
    }
}
