//! Show the effective snapshot configuration
//!
//! Values come from the optional config file with environment overrides
//! applied. The service token is never printed.

use crate::setup;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;

pub fn run(config_path: Option<&Path>) -> Result<()> {
    let config = setup::load_config(config_path)?;
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;

    println!("{}", "Snapshot Configuration".bold());
    match config_path {
        Some(path) => println!("{}: {}\n", "Location".dimmed(), path.display().dimmed()),
        None => println!("{}\n", "(defaults and environment)".dimmed()),
    }
    println!("{}", rendered.trim_end());
    println!(
        "\n{}: {}",
        "cache directory".cyan(),
        config.resolved_cache_dir().display()
    );
    if config.service_token.is_some() {
        println!("{}: {}", "service token".cyan(), "set".dimmed());
    }

    Ok(())
}
