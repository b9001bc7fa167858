//! Snapshot cache
//!
//! This crate provides:
//! - The per-project latest (tree, snapshot id) record
//! - Corruption detection for unreadable records
//! - Bounded tree history with a retention policy

pub mod cache;
pub mod retention;

// Re-exports
pub use cache::{CacheError, HistoryEntry, LatestSnapshot, SnapshotCache, EMPTY_SNAPSHOT_ID};
pub use retention::RetentionPolicy;
