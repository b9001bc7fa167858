//! Helpers around the `snap` binary
//!
//! Every invocation gets a cache directory under its working directory and
//! no remote service, so tests never touch the user's cache or network.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

pub struct Snap {
    cwd: PathBuf,
    args: Vec<String>,
    vars: Vec<(String, String)>,
}

impl Snap {
    pub fn in_dir(cwd: impl AsRef<Path>) -> Self {
        let cwd = cwd.as_ref().to_path_buf();
        let cache = cwd.join(".cache").display().to_string();
        Self {
            cwd,
            args: Vec::new(),
            vars: vec![("SNAPSHOT_CACHE_DIR".to_string(), cache)],
        }
    }

    pub fn arg_list(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(ToString::to_string));
        self
    }

    pub fn var(&mut self, key: &str, value: &str) -> &mut Self {
        self.vars.push((key.to_string(), value.to_string()));
        self
    }

    pub fn output(&self) -> Result<SnapOutput> {
        let started = Instant::now();
        let mut command = Command::new(env!("CARGO_BIN_EXE_snap"));
        command
            .args(&self.args)
            .current_dir(&self.cwd)
            .env_remove("SNAPSHOT_SERVICE_URL")
            .env_remove("SNAPSHOT_SERVICE_TOKEN");
        for (key, value) in &self.vars {
            command.env(key, value);
        }
        let output = command
            .output()
            .with_context(|| format!("spawning snap {:?}", self.args))?;

        Ok(SnapOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
            elapsed: started.elapsed(),
        })
    }

    pub fn succeeds(&self) -> Result<SnapOutput> {
        let out = self.output()?;
        if out.code != Some(0) {
            bail!("snap {:?} exited with {:?}\n--- stdout\n{}\n--- stderr\n{}", self.args, out.code, out.stdout, out.stderr);
        }
        Ok(out)
    }

    pub fn fails(&self) -> Result<SnapOutput> {
        let out = self.output()?;
        if out.code == Some(0) {
            bail!("snap {:?} unexpectedly succeeded\n--- stdout\n{}", self.args, out.stdout);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct SnapOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<i32>,
    pub elapsed: Duration,
}

impl SnapOutput {
    pub fn stdout_has(&self, text: &str) -> bool {
        self.stdout.contains(text)
    }

    pub fn stderr_has(&self, text: &str) -> bool {
        self.stderr.contains(text)
    }

    /// First snapshot id (hyphenated UUID) printed on stdout
    pub fn snapshot_id(&self) -> Option<String> {
        self.stdout.lines().find_map(find_snapshot_id)
    }
}

/// Find a hyphenated UUID among the words of `line`
pub fn find_snapshot_id(line: &str) -> Option<String> {
    line.split_whitespace()
        .find(|word| {
            word.len() == 36
                && word.char_indices().all(|(i, c)| match i {
                    8 | 13 | 18 | 23 => c == '-',
                    _ => c.is_ascii_hexdigit(),
                })
        })
        .map(str::to_string)
}

/// `snap!(dir, "create", "project")` builds a [`Snap`] invocation
#[macro_export]
macro_rules! snap {
    ($dir:expr, $($arg:expr),*) => {{
        let mut snap = $crate::common::cli::Snap::in_dir($dir);
        snap.arg_list(&[$($arg),*]);
        snap
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_snapshot_id() {
        let line = "Snapshot 3f2a9c1e-0b7d-4e55-9a1c-7d2e4f6a8b90 published";
        assert_eq!(
            find_snapshot_id(line).as_deref(),
            Some("3f2a9c1e-0b7d-4e55-9a1c-7d2e4f6a8b90")
        );
        assert_eq!(find_snapshot_id("no id here"), None);
    }
}
