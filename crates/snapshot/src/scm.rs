//! Source-control tags attached to snapshot properties

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

pub const TAG_TYPE: &str = "scm.type";
pub const TAG_BRANCH: &str = "scm.branch";
pub const TAG_COMMIT: &str = "scm.commit";
pub const TAG_DIRTY: &str = "scm.dirty";
pub const TAG_REMOTE: &str = "scm.remote";

/// Gather git metadata for `folder`
///
/// Returns no tags when `folder` is not inside a git work tree or git is not
/// installed.
pub fn collect_tags(folder: &Path) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();

    if git(folder, &["rev-parse", "--is-inside-work-tree"]).as_deref() != Some("true") {
        debug!(folder = %folder.display(), "no git work tree, skipping scm tags");
        return tags;
    }
    tags.insert(TAG_TYPE.to_string(), "git".to_string());

    if let Some(branch) = git(folder, &["rev-parse", "--abbrev-ref", "HEAD"]) {
        tags.insert(TAG_BRANCH.to_string(), branch);
    }
    if let Some(commit) = git(folder, &["rev-parse", "HEAD"]) {
        tags.insert(TAG_COMMIT.to_string(), commit);
    }
    if let Some(status) = git_raw(folder, &["status", "--porcelain"]) {
        tags.insert(TAG_DIRTY.to_string(), (!status.trim().is_empty()).to_string());
    }
    if let Some(remote) = git(folder, &["config", "--get", "remote.origin.url"]) {
        tags.insert(TAG_REMOTE.to_string(), remote);
    }

    tags
}

fn git(folder: &Path, args: &[&str]) -> Option<String> {
    git_raw(folder, args)
        .map(|out| out.trim().to_string())
        .filter(|out| !out.is_empty())
}

fn git_raw(folder: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(folder)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_no_tags_outside_work_tree() {
        let dir = TempDir::new().unwrap();
        let tags = collect_tags(dir.path());
        // The temp dir may sit inside a checkout on some hosts
        if !tags.is_empty() {
            assert_eq!(tags.get(TAG_TYPE).map(String::as_str), Some("git"));
        }
    }

    #[test]
    fn test_missing_folder_yields_nothing() {
        assert!(collect_tags(Path::new("/definitely/not/a/real/folder")).is_empty());
    }
}
