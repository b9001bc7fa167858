//! Codesnap CLI - snap command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;
mod setup;
mod util;

/// Codesnap - incremental content-addressed snapshots and local runs
#[derive(Parser)]
#[command(name = "snap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Snapshot configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a folder as a snapshot and print its id
    Create {
        /// Folder to snapshot
        folder: PathBuf,
        /// Project key (default: canonical folder path)
        #[arg(long)]
        key: Option<String>,
        /// Store snapshots in this directory instead of the remote service
        #[arg(long)]
        remote_dir: Option<PathBuf>,
        /// Do not retry a rejected commit
        #[arg(long)]
        no_retry: bool,
        /// Log size/file-count limit violations instead of failing
        #[arg(long)]
        warn_only: bool,
    },
    /// Execute a run definition
    Run {
        /// Run definition file (TOML)
        definition: PathBuf,
        /// Publish and report to local directories instead of the remote service
        #[arg(long)]
        local: bool,
        /// Root for working directories and built environments
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Results directory for --local (default: <workspace>/results)
        #[arg(long)]
        results: Option<PathBuf>,
        /// Snapshot directory for --local (default: <workspace>/remote)
        #[arg(long)]
        remote_dir: Option<PathBuf>,
        /// Override a parameter (repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Keep the working directory after a successful run
        #[arg(long)]
        keep_workdir: bool,
        /// Report a failed run without exiting non-zero
        #[arg(long)]
        no_raise: bool,
    },
    /// Inspect or clear the snapshot cache
    #[command(subcommand)]
    Cache(CacheCommands),
    /// Show the effective configuration
    Config,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List retained snapshots of a project
    Show {
        /// Project key
        key: String,
    },
    /// Forget everything cached for a project
    Clear {
        /// Project key
        key: String,
    },
    /// Print the cache directory
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Create { folder, key, remote_dir, no_retry, warn_only } => {
            cmd::create::run(config, &folder, key, remote_dir, no_retry, warn_only).await
        }
        Commands::Run {
            definition,
            local,
            workspace,
            results,
            remote_dir,
            params,
            keep_workdir,
            no_raise,
        } => {
            let options = cmd::run::RunOptions {
                local,
                workspace,
                results,
                remote_dir,
                params,
                keep_workdir,
                raise_on_error: !no_raise,
            };
            cmd::run::run(config, &definition, options).await
        }
        Commands::Cache(cache_cmd) => match cache_cmd {
            CacheCommands::Show { key } => cmd::cache::show(config, &key),
            CacheCommands::Clear { key } => cmd::cache::clear(config, &key),
            CacheCommands::Path => cmd::cache::path(config),
        },
        Commands::Config => cmd::config::run(config),
    }
}
