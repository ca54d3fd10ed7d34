//! Snapshot, index, and summary models emitted at end-of-run.

use crate::models::tree::Tree;
use crate::SCHEMA_VERSION;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Counters accumulated over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub copied: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub moved_to_safety_net: u64,
    pub deleted: u64,
    pub bytes_transferred: u64,
    pub scan_warnings: u64,
}

impl Counters {
    /// True when every operation committed.
    pub fn is_clean(&self) -> bool {
        self.skipped == 0 && self.failed == 0
    }
}

/// Serialized destination tree after a successful run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema: u32,
    pub id: String,
    pub job: String,
    pub started_at: String,
    pub finished_at: String,
    pub counters: Counters,
    pub tree: Tree,
}

/// One line in the snapshot index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotIndexEntry {
    pub id: String,
    pub path: PathBuf,
    pub timestamp: String,
    pub file_count: usize,
    pub counters: Counters,
}

/// Append-then-atomic-replace index of all snapshots for a destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotIndex {
    pub schema: u32,
    pub snapshots: Vec<SnapshotIndexEntry>,
}

impl Default for SnapshotIndex {
    fn default() -> Self {
        Self {
            schema: SCHEMA_VERSION,
            snapshots: Vec::new(),
        }
    }
}

/// End-of-run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub schema: u32,
    pub job: String,
    pub mode: String,
    pub started_at: String,
    pub finished_at: String,
    pub duration_secs: f64,
    pub counters: Counters,
    /// Retention hint for external pruning tools.
    pub safety_net_days: u32,
}
