//! Minimal edit set between two content trees

use crate::tree::{join_relative, ContentNode, NodeKind};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Kind of change recorded for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiffOp {
    Added,
    Modified,
    Deleted,
    Unchanged,
}

/// One change between a previous and a current tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub relative_path: String,
    pub operation: DiffOp,
    pub is_file: bool,
    /// Current byte length for added/modified files, `None` otherwise
    pub size: Option<u64>,
}

impl DiffEntry {
    fn added(path: String, node: &ContentNode) -> Self {
        Self {
            relative_path: path,
            operation: DiffOp::Added,
            is_file: node.is_file(),
            size: node.is_file().then_some(node.size),
        }
    }

    fn deleted(path: String, node: &ContentNode) -> Self {
        Self {
            relative_path: path,
            operation: DiffOp::Deleted,
            is_file: node.is_file(),
            size: None,
        }
    }

    /// Whether this entry names file bytes that must be uploaded
    pub fn needs_upload(&self) -> bool {
        self.is_file && matches!(self.operation, DiffOp::Added | DiffOp::Modified)
    }
}

/// Compute the ordered change list from `previous` to `current`
///
/// Subtrees with equal digests are pruned without descending. Entries come
/// out in byte-wise path order; a kind change yields `Deleted` then `Added`
/// for the same path.
pub fn diff(previous: &ContentNode, current: &ContentNode) -> Vec<DiffEntry> {
    let mut out = Vec::new();
    if previous.digest != current.digest {
        diff_children(previous, current, "", &mut out);
    }
    out
}

fn diff_children(previous: &ContentNode, current: &ContentNode, prefix: &str, out: &mut Vec<DiffEntry>) {
    let mut old = previous.children.iter().peekable();
    let mut new = current.children.iter().peekable();

    loop {
        let order = match (old.peek(), new.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(o), Some(n)) => o.name.as_bytes().cmp(n.name.as_bytes()),
        };

        match order {
            Ordering::Less => {
                if let Some(o) = old.next() {
                    out.push(DiffEntry::deleted(join_relative(prefix, &o.name), o));
                }
            }
            Ordering::Greater => {
                if let Some(n) = new.next() {
                    emit_added(n, &join_relative(prefix, &n.name), out);
                }
            }
            Ordering::Equal => {
                let (Some(o), Some(n)) = (old.next(), new.next()) else {
                    break;
                };
                if o.kind == n.kind && o.digest == n.digest {
                    continue;
                }
                let path = join_relative(prefix, &n.name);
                match (o.kind, n.kind) {
                    (NodeKind::File, NodeKind::File) => out.push(DiffEntry {
                        relative_path: path,
                        operation: DiffOp::Modified,
                        is_file: true,
                        size: Some(n.size),
                    }),
                    (NodeKind::Directory, NodeKind::Directory) => diff_children(o, n, &path, out),
                    _ => {
                        out.push(DiffEntry::deleted(path.clone(), o));
                        emit_added(n, &path, out);
                    }
                }
            }
        }
    }
}

/// Added files are listed leaf by leaf; an added empty directory is one entry
fn emit_added(node: &ContentNode, path: &str, out: &mut Vec<DiffEntry>) {
    if node.is_file() || node.children.is_empty() {
        out.push(DiffEntry::added(path.to_string(), node));
        return;
    }
    for child in &node.children {
        emit_added(child, &join_relative(path, &child.name), out);
    }
}

/// Total bytes of the entries that carry a size
pub fn total_size(entries: &[DiffEntry]) -> u64 {
    entries.iter().filter_map(|e| e.size).sum()
}
