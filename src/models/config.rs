//! Job configuration model.
//!
//! Jobs are normally supplied by a JSON config file with a top-level
//! `jobs` array. Unknown fields are ignored; an unknown `mode` string is a
//! fatal configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Deletion policy for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Mirror the source exactly; destination-only files are deleted.
    Clone,
    /// Additive update; destination-only files are left alone.
    Sync,
    /// Destination-only files are quarantined under `.SafetyNet/<date>/`.
    SafetyNet,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Clone => write!(f, "clone"),
            Mode::Sync => write!(f, "sync"),
            Mode::SafetyNet => write!(f, "safety_net"),
        }
    }
}

/// A single backup job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job name, used in journal/checkpoint file names.
    pub name: String,
    /// Source directory root.
    pub source: PathBuf,
    /// Destination directory root.
    pub destination: PathBuf,
    /// Deletion policy.
    #[serde(default = "default_mode")]
    pub mode: Mode,
    /// Exclude patterns, glob-style, matched against basename and rel path.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Retention hint for external SafetyNet pruning tools. Days.
    #[serde(default = "default_safety_net_days")]
    pub safety_net_days: u32,
    /// Recompute sha256 of each written file and compare to the source.
    #[serde(default)]
    pub verify: bool,
    /// Per-operation retry budget.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Copy worker count.
    #[serde(default = "default_threads")]
    pub threads: usize,
}

fn default_mode() -> Mode {
    Mode::SafetyNet
}

fn default_safety_net_days() -> u32 {
    30
}

fn default_retries() -> u32 {
    3
}

pub(crate) fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(8)
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    jobs: Vec<Job>,
}

/// Load all jobs from a JSON config file.
pub fn load_config(path: &Path) -> Result<Vec<Job>> {
    if !path.exists() {
        return Err(Error::PathNotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    let config: ConfigFile = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

    for job in &config.jobs {
        if job.name.is_empty() {
            return Err(Error::Config("job with empty name".to_string()));
        }
        if job.threads == 0 {
            return Err(Error::Config(format!(
                "job '{}': threads must be >= 1",
                job.name
            )));
        }
    }
    Ok(config.jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_minimal_job() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"jobs":[{"name":"docs","source":"/a","destination":"/b"}]}"#,
        )
        .unwrap();

        let jobs = load_config(&path).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].mode, Mode::SafetyNet);
        assert_eq!(jobs[0].retries, 3);
        assert_eq!(jobs[0].safety_net_days, 30);
        assert!(!jobs[0].verify);
        assert!(jobs[0].threads >= 1);
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"jobs":[{"name":"x","source":"/a","destination":"/b","mode":"clone","color":"blue"}]}"#,
        )
        .unwrap();

        let jobs = load_config(&path).unwrap();
        assert_eq!(jobs[0].mode, Mode::Clone);
    }

    #[test]
    fn test_unknown_mode_is_fatal() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"jobs":[{"name":"x","source":"/a","destination":"/b","mode":"mirror"}]}"#,
        )
        .unwrap();

        assert!(matches!(load_config(&path), Err(Error::Config(_))));
    }
}
