//! Publish a folder as a snapshot

use crate::setup::{self, Remote};
use crate::util;
use anyhow::{Context, Result};
use codesnap_snapshot::{SnapshotOptions, WorkerPool};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub async fn run(
    config_path: Option<&Path>,
    folder: &Path,
    key: Option<String>,
    remote_dir: Option<PathBuf>,
    no_retry: bool,
    warn_only: bool,
) -> Result<()> {
    if !folder.is_dir() {
        anyhow::bail!("Not a directory: {}", folder.display());
    }

    // 1. Configuration, cache and remote
    let config = setup::load_config(config_path)?;
    let cache = setup::open_cache(&config)?;
    let remote = Remote::select(&config, remote_dir)?;
    let key = match key {
        Some(key) => key,
        None => util::default_project_key(folder)?,
    };

    let previous = cache.get_latest(&key).ok().filter(|latest| latest.has_snapshot());
    let service = setup::snapshot_service(config, cache, &remote, WorkerPool::default());

    // 2. Publish
    let options = SnapshotOptions {
        retry_on_failure: !no_retry,
        raise_on_validation_failure: !warn_only,
    };
    let started = Instant::now();
    let snapshot_id = service
        .publish_folder(folder, &key, options)
        .await
        .with_context(|| format!("Failed to snapshot {}", folder.display()))?;
    let elapsed = started.elapsed();

    // 3. Display output
    let unchanged = previous.map_or(false, |latest| latest.snapshot_id == snapshot_id);
    println!("{}", snapshot_id);
    eprintln!(
        "{} {} {}",
        if unchanged { "Unchanged".dimmed().to_string() } else { "Published".green().to_string() },
        key.cyan(),
        format!("-> {} ({})", remote.describe(), util::format_duration(elapsed)).dimmed()
    );

    Ok(())
}
