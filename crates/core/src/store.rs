//! Filesystem helpers shared by the cache and the snapshot service

use crate::tree::ExcludeFn;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use walkdir::WalkDir;

/// Atomic write helper
///
/// Writes data to a temporary file beside `target`, fsyncs it, then renames it
/// over the target, so readers see either the old or the new bytes.
pub fn atomic_write(target: &Path, data: &[u8]) -> Result<()> {
    replace_with(target, |tmp| tmp.write_all(data))
}

/// Like [`atomic_write`], streaming the bytes of `source` instead of a buffer
pub fn atomic_copy(source: &Path, target: &Path) -> Result<u64> {
    let mut reader =
        std::fs::File::open(source).with_context(|| format!("Failed to open {}", source.display()))?;
    let mut copied = 0;
    replace_with(target, |tmp| {
        copied = std::io::copy(&mut reader, tmp)?;
        Ok(())
    })?;
    Ok(copied)
}

fn replace_with<F>(target: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut std::fs::File) -> std::io::Result<()>,
{
    let parent = target
        .parent()
        .with_context(|| format!("No parent directory for {}", target.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    fill(tmp.as_file_mut()).with_context(|| format!("Failed to write {}", target.display()))?;
    tmp.as_file().sync_all()?;
    tmp.persist(target)
        .with_context(|| format!("Failed to rename into {}", target.display()))?;

    #[cfg(unix)]
    if let Ok(dir) = std::fs::File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

/// Size summary of a folder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderStats {
    pub total_bytes: u64,
    pub file_count: usize,
}

/// Sum the size and count of non-excluded files under `root`
pub fn measure_folder(root: &Path, exclude: &ExcludeFn<'_>) -> Result<FolderStats> {
    let mut stats = FolderStats::default();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| match e.path().strip_prefix(root) {
            Ok(rel) => !exclude(rel, e.file_type().is_dir()),
            Err(_) => true,
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            // A dangling link errors before filter_entry sees it
            Err(err) if is_excluded_error(&err, root, exclude) => continue,
            Err(err) => {
                return Err(anyhow::Error::new(err).context(format!("Failed to walk {}", root.display())))
            }
        };
        if entry.file_type().is_file() {
            stats.total_bytes += entry.metadata()?.len();
            stats.file_count += 1;
        }
    }

    Ok(stats)
}

fn is_excluded_error(err: &walkdir::Error, root: &Path, exclude: &ExcludeFn<'_>) -> bool {
    err.path()
        .and_then(|path| path.strip_prefix(root).ok())
        .map_or(false, |rel| exclude(rel, false))
}
