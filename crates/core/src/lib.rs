//! Content-addressed snapshot primitives
//!
//! This crate provides:
//! - BLAKE3 digests and deterministic snapshot ids
//! - Content trees (Merkle trees) built from a directory
//! - Minimal diffs between two content trees
//! - Exclusion rules (.snapignore / .gitignore)
//! - Atomic file writes and folder measurement

pub mod diff;
pub mod hash;
pub mod ignore;
pub mod store;
pub mod tree;

// Re-exports
pub use diff::{diff, total_size, DiffEntry, DiffOp};
pub use hash::Digest;
pub use ignore::{ExclusionRules, IgnoreConfig};
pub use store::{atomic_copy, atomic_write, measure_folder, FolderStats};
pub use tree::{build, include_all, ContentNode, ExcludeFn, NodeKind, TreeError};
