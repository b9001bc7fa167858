//! Retention policy for cached tree history

use serde::{Deserialize, Serialize};

/// Retention policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Number of tree records kept per project, latest included (default: 8)
    pub retain_trees: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { retain_trees: 8 }
    }
}
