//! Directory scanner module.
//!
//! Walks a root iteratively and produces a relative-path-keyed Tree of
//! everything the planner needs: kind, size, mtime, mode, symlink target.
//! Symlinks are recorded, never followed. Excluded directories are pruned
//! before descent, as are the engine's own `.DiskSyncPro` and `.SafetyNet`
//! areas.

use crate::models::tree::{FileKind, FileRecord, MTime, Tree};
use crate::utils::filter::{normalize_rel, ExcludeSet};
use crate::{Result, APP_DIR, SAFETY_NET_DIR};
use std::collections::BTreeSet;
use std::path::Path;
use walkdir::WalkDir;

/// A per-entry problem encountered while scanning. The entry is omitted
/// from the tree and the warning surfaces in the run summary.
#[derive(Debug, Clone)]
pub struct ScanWarning {
    pub rel: String,
    pub reason: String,
}

/// Result of scanning a root.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub tree: Tree,
    pub warnings: Vec<ScanWarning>,
}

/// Scan a directory tree.
///
/// `skip_dirs` holds relative paths of directories that are already fully
/// processed (from a resume checkpoint); they are not descended into and
/// their contents are assumed unchanged. Failure to open the root itself is
/// fatal; any per-entry error becomes a `ScanWarning`.
pub fn scan_tree(
    root: &Path,
    excludes: &ExcludeSet,
    skip_dirs: Option<&BTreeSet<String>>,
) -> Result<ScanOutcome> {
    crate::utils::fs::ensure_directory(root)?;

    let mut outcome = ScanOutcome::default();
    let root = root.to_path_buf();

    let walker = WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if name == APP_DIR || name == SAFETY_NET_DIR {
                return false;
            }
            let rel = match entry.path().strip_prefix(&root) {
                Ok(rel) => rel,
                Err(_) => return false,
            };
            let rel = match normalize_rel(rel) {
                Ok(rel) => rel,
                Err(_) => return false,
            };
            if excludes.matches(&rel) {
                return false;
            }
            if let Some(skip) = skip_dirs {
                if entry.file_type().is_dir() && skip.contains(&rel) {
                    tracing::debug!("Pruning completed directory: {rel}");
                    return false;
                }
            }
            true
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let rel = e
                    .path()
                    .and_then(|p| p.strip_prefix(&root).ok())
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default();
                tracing::warn!("Scan error at '{rel}': {e}");
                outcome.warnings.push(ScanWarning {
                    rel,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let rel = match entry
            .path()
            .strip_prefix(&root)
            .map_err(|e| e.to_string())
            .and_then(|p| normalize_rel(p).map_err(|e| e.to_string()))
        {
            Ok(rel) => rel,
            Err(reason) => {
                outcome.warnings.push(ScanWarning {
                    rel: entry.path().display().to_string(),
                    reason,
                });
                continue;
            }
        };

        match record_for(&entry, &rel) {
            Ok(record) => outcome.tree.insert(record),
            Err(e) => {
                tracing::warn!("Failed to stat '{rel}': {e}");
                outcome.warnings.push(ScanWarning {
                    rel,
                    reason: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        "Scanned {} entries under {} ({} warnings)",
        outcome.tree.len(),
        root.display(),
        outcome.warnings.len()
    );
    Ok(outcome)
}

fn record_for(entry: &walkdir::DirEntry, rel: &str) -> std::io::Result<FileRecord> {
    let file_type = entry.file_type();
    let metadata = entry.metadata().map_err(std::io::Error::other)?;

    let kind = if file_type.is_symlink() {
        FileKind::Symlink
    } else if file_type.is_dir() {
        FileKind::Dir
    } else {
        FileKind::File
    };

    let symlink_target = if kind == FileKind::Symlink {
        Some(std::fs::read_link(entry.path())?)
    } else {
        None
    };

    let mtime = metadata
        .modified()
        .map(MTime::from_system_time)
        .unwrap_or(MTime { secs: 0, nanos: 0 });

    Ok(FileRecord {
        rel: rel.to_string(),
        kind,
        size: if kind == FileKind::File {
            metadata.len()
        } else {
            0
        },
        mtime,
        mode: mode_bits(&metadata),
        symlink_target,
    })
}

#[cfg(unix)]
fn mode_bits(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    metadata.mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_bits(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}
