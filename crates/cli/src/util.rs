//! Small helpers shared by the `snap` subcommands

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

/// Project key of a folder: its canonical path
pub fn default_project_key(folder: &Path) -> Result<String> {
    let canonical = std::fs::canonicalize(folder)
        .with_context(|| format!("Failed to resolve folder {}", folder.display()))?;
    Ok(canonical.display().to_string())
}

/// Parse a `KEY=VALUE` parameter override
pub fn parse_param(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => anyhow::bail!("Invalid parameter '{}': expected KEY=VALUE", raw),
    }
}

/// Render a byte count with a binary unit suffix
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a duration as "850ms" / "2.4s" / "3m 12s"
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m {}s", secs / 60, secs % 60)
    }
}
