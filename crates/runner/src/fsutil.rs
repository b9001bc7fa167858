//! Directory copy helpers for inputs and reporters

use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Regular files under `root` as (`/`-separated relative path, absolute path)
///
/// A missing `root` yields nothing.
pub fn list_files(root: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((rel, entry.into_path()));
    }
    Ok(files)
}

/// Copy the tree under `source` into `target`; returns the number of files
pub fn copy_tree(source: &Path, target: &Path) -> io::Result<usize> {
    std::fs::create_dir_all(target)?;
    let mut copied = 0;
    for (rel, path) in list_files(source)? {
        let dest = target.join(&rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&path, &dest)?;
        copied += 1;
    }
    Ok(copied)
}
