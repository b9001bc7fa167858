//! Content tree (Merkle tree) over a directory
//!
//! Every file node carries the BLAKE3 digest of its bytes. Every directory
//! node carries a digest folded from its children's `(kind, name, digest)`
//! triples in byte-wise name order, so two builds of identical content always
//! produce identical root digests regardless of walk order.

use crate::hash::{self, Digest, IncrementalHasher};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors raised while building a content tree
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),
    #[error("snapshot root is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("symbolic link cycle at {0}")]
    SymlinkCycle(PathBuf),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> TreeError + '_ {
    move |source| TreeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Type of tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Directory,
}

impl NodeKind {
    fn tag(self) -> u8 {
        match self {
            NodeKind::File => 0,
            NodeKind::Directory => 1,
        }
    }
}

/// A node of the content tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentNode {
    /// Path segment relative to the parent (empty for the root)
    pub name: String,
    pub kind: NodeKind,
    pub digest: Digest,
    /// Byte length for files, sum of descendant file sizes for directories
    pub size: u64,
    /// Children sorted byte-wise by name (directories only)
    pub children: Vec<ContentNode>,
}

impl ContentNode {
    /// Create a file node
    pub fn file(name: impl Into<String>, digest: Digest, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::File,
            digest,
            size,
            children: Vec::new(),
        }
    }

    /// Create a directory node, sorting children and folding their digests
    pub fn directory(name: impl Into<String>, mut children: Vec<ContentNode>) -> Self {
        children.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));

        let mut hasher = IncrementalHasher::new();
        let mut size = 0u64;
        for child in &children {
            hasher.update(&[child.kind.tag()]);
            hasher.update(&(child.name.len() as u64).to_le_bytes());
            hasher.update(child.name.as_bytes());
            hasher.update(child.digest.as_bytes());
            size = size.saturating_add(child.size);
        }

        Self {
            name: name.into(),
            kind: NodeKind::Directory,
            digest: hasher.finalize(),
            size,
            children,
        }
    }

    /// The tree used when no prior snapshot exists
    pub fn empty_root() -> Self {
        Self::directory("", Vec::new())
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// Number of files in this subtree
    pub fn file_count(&self) -> usize {
        match self.kind {
            NodeKind::File => 1,
            NodeKind::Directory => self.children.iter().map(ContentNode::file_count).sum(),
        }
    }
}

/// Join a `/`-separated relative prefix with a segment
pub fn join_relative(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Exclusion predicate: `(relative_path, is_dir) -> skip`
pub type ExcludeFn<'a> = dyn Fn(&Path, bool) -> bool + Send + Sync + 'a;

/// Predicate that excludes nothing
pub fn include_all(_path: &Path, _is_dir: bool) -> bool {
    false
}

/// Build the content tree of `root`
///
/// Excluded entries contribute nothing to any digest. Unreadable entries that
/// are not excluded fail the whole build.
pub fn build(root: &Path, exclude: &ExcludeFn<'_>) -> Result<ContentNode, TreeError> {
    let meta = fs::metadata(root).map_err(io_error(root))?;
    if !meta.is_dir() {
        return Err(TreeError::NotADirectory(root.to_path_buf()));
    }

    let canonical = fs::canonicalize(root).map_err(io_error(root))?;
    let mut ancestors = vec![canonical];
    let tree = build_dir(root, Path::new(""), String::new(), exclude, &mut ancestors)?;
    debug!(
        root = %root.display(),
        files = tree.file_count(),
        bytes = tree.size,
        digest = %tree.digest,
        "built content tree"
    );
    Ok(tree)
}

fn build_dir(
    abs: &Path,
    rel: &Path,
    name: String,
    exclude: &ExcludeFn<'_>,
    ancestors: &mut Vec<PathBuf>,
) -> Result<ContentNode, TreeError> {
    let mut children = Vec::new();

    for entry in fs::read_dir(abs).map_err(io_error(abs))? {
        let entry = entry.map_err(io_error(abs))?;
        let child_abs = entry.path();
        let child_rel = rel.join(entry.file_name());

        let file_type = entry.file_type().map_err(io_error(&child_abs))?;
        // Links are followed; one that cannot be resolved is judged as a file
        let is_dir = file_type.is_dir()
            || (file_type.is_symlink() && fs::metadata(&child_abs).map(|m| m.is_dir()).unwrap_or(false));
        if exclude(&child_rel, is_dir) {
            continue;
        }

        // Only entries that are kept must resolve; a dangling link surfaces here
        let meta = fs::metadata(&child_abs).map_err(io_error(&child_abs))?;

        let child_name = entry
            .file_name()
            .into_string()
            .map_err(|_| TreeError::NonUtf8Path(child_rel.clone()))?;

        if meta.is_dir() {
            if file_type.is_symlink() {
                let target = fs::canonicalize(&child_abs).map_err(io_error(&child_abs))?;
                if ancestors.contains(&target) {
                    return Err(TreeError::SymlinkCycle(child_abs));
                }
                ancestors.push(target);
                let node = build_dir(&child_abs, &child_rel, child_name, exclude, ancestors);
                ancestors.pop();
                children.push(node?);
            } else {
                children.push(build_dir(&child_abs, &child_rel, child_name, exclude, ancestors)?);
            }
        } else if meta.is_file() {
            let digest = hash::hash_file(&child_abs, meta.len()).map_err(io_error(&child_abs))?;
            children.push(ContentNode::file(child_name, digest, meta.len()));
        } else {
            debug!(path = %child_abs.display(), "skipping special file");
        }
    }

    Ok(ContentNode::directory(name, children))
}
