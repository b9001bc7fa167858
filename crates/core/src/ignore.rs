//! Exclusion rules for snapshot folders
//!
//! Sources, in order of precedence:
//! 1. Built-in names (`.git/`, `.snapshots/`, editor temp files) - always active
//! 2. `.snapignore` if present, otherwise `.gitignore`
//! 3. Config-based patterns (gitignore syntax)

use anyhow::Result;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the snapshot-specific ignore file
pub const SNAPIGNORE_FILE: &str = ".snapignore";

/// Directory names that never belong in a snapshot
const BUILTIN_DIRS: &[&str] = &[".git", ".snapshots", ".jj"];

/// Exclusion rule set for one snapshot root
pub struct ExclusionRules {
    root: PathBuf,
    /// `.snapignore`, or `.gitignore` when no `.snapignore` exists
    file_rules: Option<Gitignore>,
    /// Patterns from configuration
    extra_rules: Option<Gitignore>,
    config: IgnoreConfig,
}

impl ExclusionRules {
    /// Load rules for `root`
    pub fn load(root: &Path, config: IgnoreConfig) -> Result<Self> {
        let mut rules = Self {
            root: root.to_path_buf(),
            file_rules: None,
            extra_rules: None,
            config,
        };
        rules.reload()?;
        Ok(rules)
    }

    /// Re-read ignore files from disk
    fn reload(&mut self) -> Result<()> {
        let snapignore = self.root.join(SNAPIGNORE_FILE);
        let gitignore = self.root.join(".gitignore");

        self.file_rules = if snapignore.is_file() {
            Some(build_from_file(&self.root, &snapignore)?)
        } else if self.config.use_gitignore && gitignore.is_file() {
            Some(build_from_file(&self.root, &gitignore)?)
        } else {
            None
        };

        self.extra_rules = if self.config.additional_patterns.is_empty() {
            None
        } else {
            let mut builder = GitignoreBuilder::new(&self.root);
            for pattern in &self.config.additional_patterns {
                builder.add_line(None, pattern)?;
            }
            Some(builder.build()?)
        };

        Ok(())
    }

    /// Check if a path relative to the root should be excluded
    pub fn should_exclude(&self, rel_path: &Path, is_dir: bool) -> bool {
        if is_builtin_excluded(rel_path) {
            return true;
        }

        for rules in [&self.file_rules, &self.extra_rules].into_iter().flatten() {
            if rules
                .matched_path_or_any_parents(rel_path, is_dir)
                .is_ignore()
            {
                return true;
            }
        }

        false
    }
}

fn build_from_file(root: &Path, file: &Path) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(root);
    if let Some(err) = builder.add(file) {
        return Err(err.into());
    }
    Ok(builder.build()?)
}

fn is_builtin_excluded(rel_path: &Path) -> bool {
    let in_builtin_dir = rel_path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map_or(false, |name| BUILTIN_DIRS.contains(&name))
    });
    if in_builtin_dir {
        return true;
    }

    let filename = rel_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    // Vim swap, backup and Emacs lock/auto-save files
    filename.ends_with(".swp")
        || filename.ends_with(".swo")
        || filename.ends_with('~')
        || filename.starts_with(".#")
        || (filename.len() > 1 && filename.starts_with('#') && filename.ends_with('#'))
        || filename == ".DS_Store"
        || filename == "Thumbs.db"
}

/// Ignore configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Fall back to .gitignore when no .snapignore exists (default: true)
    #[serde(default = "default_true")]
    pub use_gitignore: bool,

    /// Additional gitignore-syntax patterns
    #[serde(default)]
    pub additional_patterns: Vec<String>,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            use_gitignore: true,
            additional_patterns: vec![],
        }
    }
}

fn default_true() -> bool {
    true
}
