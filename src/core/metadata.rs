//! End-of-run metadata emission.
//!
//! On successful completion the engine emits three artifacts: a snapshot of
//! the final destination tree, an updated snapshot index (append entry,
//! atomic replace), and a run summary. Each is written via
//! write-temp-then-rename to both sinks: the project log area and
//! `<dest_root>/.DiskSyncPro/`.

use crate::models::snapshot::{Snapshot, SnapshotIndex, SnapshotIndexEntry, Summary};
use crate::utils::fs::write_json_atomic;
use crate::Result;
use std::path::{Path, PathBuf};

/// The two persistence roots for non-checkpoint artifacts.
#[derive(Debug, Clone)]
pub struct MetadataSinks {
    pub log_dir: PathBuf,
    pub app_dir: PathBuf,
}

impl MetadataSinks {
    pub fn new(log_dir: &Path, app_dir: &Path) -> Self {
        Self {
            log_dir: log_dir.to_path_buf(),
            app_dir: app_dir.to_path_buf(),
        }
    }

    fn write_both(&self, rel_name: &str, write: impl Fn(&Path) -> Result<()>) -> Result<()> {
        let mut last_err = None;
        let mut written = 0;
        for root in [&self.log_dir, &self.app_dir] {
            match write(&root.join(rel_name)) {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::warn!(
                        "Failed to write {rel_name} under {}: {e}",
                        root.display()
                    );
                    last_err = Some(e);
                }
            }
        }
        match (written, last_err) {
            (0, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }
}

/// Write the snapshot, append it to the index, and write the summary.
/// `stamp` is the run's `YYYYMMDD_HHMMSS` identifier.
pub fn write_run_artifacts(
    sinks: &MetadataSinks,
    stamp: &str,
    snapshot: &Snapshot,
    summary: &Summary,
) -> Result<()> {
    let snapshot_rel = format!("snapshots/snapshot_{stamp}.json");
    sinks.write_both(&snapshot_rel, |path| write_json_atomic(path, snapshot))?;

    sinks.write_both("snapshots/index.json", |path| {
        let mut index = match SnapshotIndex::load(path) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!("Rebuilding snapshot index {}: {e}", path.display());
                SnapshotIndex::default()
            }
        };
        index.snapshots.push(SnapshotIndexEntry {
            id: snapshot.id.clone(),
            path: PathBuf::from(&snapshot_rel),
            timestamp: snapshot.finished_at.clone(),
            file_count: snapshot.tree.len(),
            counters: snapshot.counters,
        });
        write_json_atomic(path, &index)
    })?;

    sinks.write_both(&format!("summary_{stamp}.json"), |path| {
        write_json_atomic(path, summary)
    })?;

    tracing::info!("Run artifacts written (snapshot {})", snapshot.id);
    Ok(())
}

impl SnapshotIndex {
    /// Load an existing index, or an empty one if the file doesn't exist.
    pub fn load(path: &Path) -> Result<SnapshotIndex> {
        if !path.exists() {
            return Ok(SnapshotIndex::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::snapshot::Counters;
    use crate::models::tree::Tree;
    use crate::SCHEMA_VERSION;

    fn snapshot(id: &str) -> Snapshot {
        Snapshot {
            schema: SCHEMA_VERSION,
            id: id.to_string(),
            job: "job".to_string(),
            started_at: "2025-01-15T00:00:00Z".to_string(),
            finished_at: "2025-01-15T00:01:00Z".to_string(),
            counters: Counters::default(),
            tree: Tree::new(),
        }
    }

    fn summary() -> Summary {
        Summary {
            schema: SCHEMA_VERSION,
            job: "job".to_string(),
            mode: "clone".to_string(),
            started_at: "2025-01-15T00:00:00Z".to_string(),
            finished_at: "2025-01-15T00:01:00Z".to_string(),
            duration_secs: 60.0,
            counters: Counters::default(),
            safety_net_days: 30,
        }
    }

    #[test]
    fn test_artifacts_land_in_both_sinks() {
        let dir = tempfile::TempDir::new().unwrap();
        let sinks = MetadataSinks::new(&dir.path().join("logs"), &dir.path().join("app"));
        write_run_artifacts(&sinks, "20250115_000100", &snapshot("s1"), &summary()).unwrap();

        for root in ["logs", "app"] {
            let root = dir.path().join(root);
            assert!(root.join("snapshots/snapshot_20250115_000100.json").exists());
            assert!(root.join("snapshots/index.json").exists());
            assert!(root.join("summary_20250115_000100.json").exists());
        }
    }

    #[test]
    fn test_index_appends_across_runs() {
        let dir = tempfile::TempDir::new().unwrap();
        let sinks = MetadataSinks::new(&dir.path().join("logs"), &dir.path().join("app"));
        write_run_artifacts(&sinks, "20250115_000100", &snapshot("s1"), &summary()).unwrap();
        write_run_artifacts(&sinks, "20250115_000200", &snapshot("s2"), &summary()).unwrap();

        let index = SnapshotIndex::load(&dir.path().join("app/snapshots/index.json")).unwrap();
        assert_eq!(index.snapshots.len(), 2);
        assert_eq!(index.snapshots[0].id, "s1");
        assert_eq!(index.snapshots[1].id, "s2");
    }
}
