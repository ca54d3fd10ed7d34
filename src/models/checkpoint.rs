//! Checkpoint data model.
//!
//! The checkpoint is the resume index: relative paths whose operations have
//! committed, plus directories known to be fully processed. It exists only
//! while a run is in progress or paused and is deleted on success.

use crate::{Result, SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub schema: u32,
    pub job: String,
    /// Relative paths of committed file operations.
    pub completed_files: BTreeSet<String>,
    /// Directories whose planned operations have all committed. The scanner
    /// prunes these on the destination side during a resume.
    pub completed_dirs: BTreeSet<String>,
}

impl Checkpoint {
    pub fn new(job: &str) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            job: job.to_string(),
            completed_files: BTreeSet::new(),
            completed_dirs: BTreeSet::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Checkpoint> {
        let content = std::fs::read_to_string(path)?;
        let checkpoint = serde_json::from_str(&content)?;
        Ok(checkpoint)
    }

    /// Atomically persist (write-temp-then-rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        crate::utils::fs::write_json_atomic(path, self)?;
        Ok(())
    }

    pub fn is_completed(&self, rel: &str) -> bool {
        self.completed_files.contains(rel)
    }
}
