//! Snapshot cache inspection

use crate::setup;
use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;

/// List retained snapshots of a project, latest first
pub fn show(config_path: Option<&Path>, key: &str) -> Result<()> {
    let config = setup::load_config(config_path)?;
    let cache = setup::open_cache(&config)?;
    let history = cache
        .history(key)
        .with_context(|| format!("Failed to read cache history of {}", key))?;

    println!("{} {}", "Project".bold(), key.cyan());
    println!("{}: {}", "Cache".dimmed(), cache.project_dir(key).display().dimmed());
    println!();

    if history.is_empty() {
        println!("{}", "No cached snapshots".dimmed());
        return Ok(());
    }

    for entry in history {
        let marker = if entry.is_latest { "latest".green().to_string() } else { String::new() };
        println!(
            "{}  {} files  {}  {}",
            entry.snapshot_id.yellow(),
            entry.file_count,
            util::format_size(entry.total_bytes),
            marker
        );
    }

    Ok(())
}

/// Remove every cached record of a project
pub fn clear(config_path: Option<&Path>, key: &str) -> Result<()> {
    let config = setup::load_config(config_path)?;
    let cache = setup::open_cache(&config)?;
    cache
        .remove(key)
        .with_context(|| format!("Failed to clear cache of {}", key))?;

    println!("{} {}", "Cleared".green(), key.cyan());
    Ok(())
}

pub fn path(config_path: Option<&Path>) -> Result<()> {
    let config = setup::load_config(config_path)?;
    println!("{}", config.resolved_cache_dir().display());
    Ok(())
}
