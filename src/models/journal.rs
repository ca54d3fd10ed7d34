//! Journal data model.
//!
//! During a run the journal is newline-delimited JSON: a header line
//! followed by one line per entry, appended and fsynced as operations
//! progress. After a rollback the file is rewritten as a single JSON object
//! with an `entries` array. The loader accepts both forms.

use crate::{Error, Result, SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Lifecycle phase of a journaled operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpPhase {
    Planned,
    Started,
    Committed,
    Failed,
    Skipped,
}

/// A single journal record. One operation may produce several records
/// (started/failed per attempt, then committed or skipped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub op_id: u64,
    /// Operation kind tag (`copy`, `update_file`, ...).
    pub kind: String,
    pub rel: String,
    pub phase: OpPhase,
    /// RFC 3339 timestamp.
    pub at: String,
    /// Where the pre-existing destination content was preserved, for
    /// reversible operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
    /// Previous permission bits, recorded by chmod operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_mode: Option<u32>,
    /// Failure or skip reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Set once rollback has undone this entry.
    #[serde(default)]
    pub rolled_back: bool,
}

/// Header record, first line of the NDJSON form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalHeader {
    pub schema: u32,
    pub run_id: String,
    pub job: String,
    pub mode: String,
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
    /// Root of the retained pre-image area for this run.
    pub backup_root: PathBuf,
    pub started_at: String,
}

/// A fully loaded journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalFile {
    #[serde(flatten)]
    pub header: JournalHeader,
    pub entries: Vec<JournalEntry>,
}

impl JournalFile {
    /// Load a journal from disk, accepting the NDJSON form written during
    /// a run and the object form written after rollback.
    pub fn load(path: &Path) -> Result<JournalFile> {
        let content = std::fs::read_to_string(path)?;
        let trimmed = content.trim_start();
        if trimmed.is_empty() {
            return Err(Error::InvalidJournalFile(format!(
                "{}: empty file",
                path.display()
            )));
        }

        // Object form first: a single JSON document with an entries array.
        if let Ok(journal) = serde_json::from_str::<JournalFile>(&content) {
            return Ok(journal);
        }

        // NDJSON form: header line, then entry lines.
        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header_line = lines
            .next()
            .ok_or_else(|| Error::InvalidJournalFile(path.display().to_string()))?;
        let header: JournalHeader = serde_json::from_str(header_line)
            .map_err(|e| Error::InvalidJournalFile(format!("{}: {}", path.display(), e)))?;

        let mut entries = Vec::new();
        for line in lines {
            let entry: JournalEntry = serde_json::from_str(line)
                .map_err(|e| Error::InvalidJournalFile(format!("{}: {}", path.display(), e)))?;
            entries.push(entry);
        }
        Ok(JournalFile { header, entries })
    }

    /// Fold per-attempt records down to the final state of each operation,
    /// in op_id order. Later records for the same op win; `rolled_back`
    /// sticks once set.
    pub fn folded(&self) -> Vec<JournalEntry> {
        let mut by_id: BTreeMap<u64, JournalEntry> = BTreeMap::new();
        for entry in &self.entries {
            match by_id.get_mut(&entry.op_id) {
                None => {
                    by_id.insert(entry.op_id, entry.clone());
                }
                Some(existing) => {
                    let rolled_back = existing.rolled_back || entry.rolled_back;
                    *existing = entry.clone();
                    existing.rolled_back = rolled_back;
                }
            }
        }
        by_id.into_values().collect()
    }
}

impl JournalHeader {
    pub fn new(
        run_id: String,
        job: &str,
        mode: &str,
        source_root: &Path,
        dest_root: &Path,
        backup_root: &Path,
        started_at: String,
    ) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            run_id,
            job: job.to_string(),
            mode: mode.to_string(),
            source_root: source_root.to_path_buf(),
            dest_root: dest_root.to_path_buf(),
            backup_root: backup_root.to_path_buf(),
            started_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> JournalHeader {
        JournalHeader::new(
            "run".to_string(),
            "job",
            "clone",
            Path::new("/src"),
            Path::new("/dst"),
            Path::new("/dst/.DiskSyncPro/rollback_job_x"),
            "2025-01-15T00:00:00Z".to_string(),
        )
    }

    fn entry(op_id: u64, phase: OpPhase) -> JournalEntry {
        JournalEntry {
            op_id,
            kind: "copy".to_string(),
            rel: "a.txt".to_string(),
            phase,
            at: "2025-01-15T00:00:01Z".to_string(),
            backup: None,
            prev_mode: None,
            reason: None,
            rolled_back: false,
        }
    }

    #[test]
    fn test_folded_keeps_last_phase() {
        let journal = JournalFile {
            header: header(),
            entries: vec![
                entry(1, OpPhase::Started),
                entry(1, OpPhase::Failed),
                entry(1, OpPhase::Started),
                entry(1, OpPhase::Committed),
                entry(2, OpPhase::Started),
            ],
        };
        let folded = journal.folded();
        assert_eq!(folded.len(), 2);
        assert_eq!(folded[0].phase, OpPhase::Committed);
        assert_eq!(folded[1].phase, OpPhase::Started);
    }

    #[test]
    fn test_load_ndjson_form() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("journal.json");
        let mut content = serde_json::to_string(&header()).unwrap();
        content.push('\n');
        content.push_str(&serde_json::to_string(&entry(1, OpPhase::Committed)).unwrap());
        content.push('\n');
        std::fs::write(&path, content).unwrap();

        let journal = JournalFile::load(&path).unwrap();
        assert_eq!(journal.header.job, "job");
        assert_eq!(journal.entries.len(), 1);
    }

    #[test]
    fn test_load_object_form() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("journal.json");
        let journal = JournalFile {
            header: header(),
            entries: vec![entry(1, OpPhase::Committed)],
        };
        std::fs::write(&path, serde_json::to_string_pretty(&journal).unwrap()).unwrap();

        let loaded = JournalFile::load(&path).unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.header.run_id, "run");
    }
}
