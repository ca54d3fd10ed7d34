//! Rollback execution module.
//!
//! Reverses the committed entries of a journal in reverse operation order:
//! created files are removed, overwritten and deleted files are restored
//! from their retained backups, safety-net relocations are moved back,
//! created directories are removed when empty.
//!
//! Rollback is idempotent: undone entries are flagged `rolled_back` and the
//! journal is rewritten, so replaying it skips them.

use crate::models::journal::{JournalEntry, JournalFile, OpPhase};
use crate::Result;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Result of a rollback pass.
#[derive(Debug, Default)]
pub struct RollbackReport {
    pub undone: usize,
    pub skipped: usize,
    pub unrecoverable: usize,
    pub errors: Vec<String>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.unrecoverable == 0 && self.errors.is_empty()
    }
}

/// Undo every committed, not-yet-rolled-back entry of a loaded journal,
/// newest first. With `dry_run` nothing is touched and nothing is marked.
pub fn rollback_journal(journal: &mut JournalFile, dry_run: bool) -> Result<RollbackReport> {
    let dest_root = journal.header.dest_root.clone();
    let mut report = RollbackReport::default();

    let folded = journal.folded();
    let mut undone_ids: Vec<u64> = Vec::new();

    for entry in folded.iter().rev() {
        if entry.phase != OpPhase::Committed || entry.rolled_back {
            report.skipped += 1;
            continue;
        }

        if dry_run {
            tracing::info!(
                "[DRY RUN] would undo {} '{}'",
                entry.kind,
                entry.rel
            );
            report.undone += 1;
            continue;
        }

        match undo_entry(entry, &dest_root) {
            Ok(UndoOutcome::Undone) => {
                report.undone += 1;
                undone_ids.push(entry.op_id);
            }
            Ok(UndoOutcome::NothingToDo) => {
                report.skipped += 1;
                undone_ids.push(entry.op_id);
            }
            Ok(UndoOutcome::Unrecoverable(reason)) => {
                tracing::error!("Cannot undo '{}': {reason}", entry.rel);
                report.unrecoverable += 1;
            }
            Err(e) => {
                let msg = format!("{}: {e}", entry.rel);
                tracing::error!("Rollback step failed: {msg}");
                report.errors.push(msg);
            }
        }
    }

    if !dry_run && !undone_ids.is_empty() {
        mark_rolled_back(journal, &undone_ids);
    }

    tracing::info!(
        "Rollback finished: {} undone, {} skipped, {} unrecoverable, {} errors",
        report.undone,
        report.skipped,
        report.unrecoverable,
        report.errors.len()
    );
    Ok(report)
}

/// Load, roll back, and rewrite a journal file in place.
pub fn rollback_journal_file(path: &Path, dry_run: bool) -> Result<RollbackReport> {
    let mut journal = JournalFile::load(path)?;
    let report = rollback_journal(&mut journal, dry_run)?;
    if !dry_run {
        crate::utils::fs::write_json_atomic(path, &journal)?;
    }
    Ok(report)
}

enum UndoOutcome {
    Undone,
    NothingToDo,
    Unrecoverable(String),
}

fn undo_entry(entry: &JournalEntry, dest_root: &Path) -> std::io::Result<UndoOutcome> {
    let target = dest_root.join(&entry.rel);
    match entry.kind.as_str() {
        "copy" => {
            // A created file: remove it.
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)?;
                tracing::info!("[ROLLBACK] removed created file {}", entry.rel);
                Ok(UndoOutcome::Undone)
            } else {
                Ok(UndoOutcome::NothingToDo)
            }
        }
        "update_file" | "delete" | "move_to_safety_net" => {
            restore_from_backup(entry, &target)
        }
        "mkdir" => {
            let removed = if target.is_dir() {
                match fs::remove_dir(&target) {
                    Ok(()) => {
                        tracing::info!("[ROLLBACK] removed directory {}", entry.rel);
                        true
                    }
                    // Not empty: leave it.
                    Err(_) => false,
                }
            } else {
                false
            };
            // The directory may have displaced a file; put it back.
            if let Some(backup) = entry.backup.as_ref() {
                if backup.symlink_metadata().is_ok() && target.symlink_metadata().is_err() {
                    crate::utils::fs::move_entry(backup, &target)?;
                    tracing::info!(
                        "[ROLLBACK] restored {} from {}",
                        entry.rel,
                        backup.display()
                    );
                    return Ok(UndoOutcome::Undone);
                }
            }
            if removed {
                Ok(UndoOutcome::Undone)
            } else {
                Ok(UndoOutcome::NothingToDo)
            }
        }
        "symlink_create" => {
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)?;
            }
            if let Some(backup) = entry.backup.as_ref() {
                if backup.exists() || backup.symlink_metadata().is_ok() {
                    crate::utils::fs::move_entry(backup, &target)?;
                }
            }
            tracing::info!("[ROLLBACK] removed symlink {}", entry.rel);
            Ok(UndoOutcome::Undone)
        }
        "chmod" => match entry.prev_mode {
            Some(mode) => {
                set_mode(&target, mode)?;
                Ok(UndoOutcome::Undone)
            }
            None => Ok(UndoOutcome::Unrecoverable(
                "no previous mode recorded".to_string(),
            )),
        },
        other => Ok(UndoOutcome::Unrecoverable(format!(
            "unknown journal kind '{other}'"
        ))),
    }
}

fn restore_from_backup(entry: &JournalEntry, target: &Path) -> std::io::Result<UndoOutcome> {
    match entry.backup.as_ref() {
        Some(backup) if backup.symlink_metadata().is_ok() => {
            if target.symlink_metadata().is_ok() {
                remove_any(target)?;
            }
            crate::utils::fs::move_entry(backup, target)?;
            tracing::info!(
                "[ROLLBACK] restored {} from {}",
                entry.rel,
                backup.display()
            );
            Ok(UndoOutcome::Undone)
        }
        Some(backup) => Ok(UndoOutcome::Unrecoverable(format!(
            "backup missing: {}",
            backup.display()
        ))),
        None if entry.kind == "delete" => {
            // Directory deletions journal without a backup; recreate empty.
            fs::create_dir_all(target)?;
            Ok(UndoOutcome::Undone)
        }
        None => Ok(UndoOutcome::Unrecoverable("no backup recorded".to_string())),
    }
}

fn remove_any(path: &Path) -> std::io::Result<()> {
    let metadata = path.symlink_metadata()?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn mark_rolled_back(journal: &mut JournalFile, op_ids: &[u64]) {
    let ids: HashMap<u64, ()> = op_ids.iter().map(|id| (*id, ())).collect();
    for entry in &mut journal.entries {
        if ids.contains_key(&entry.op_id) {
            entry.rolled_back = true;
        }
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::journal::JournalHeader;
    use std::path::PathBuf;

    fn journal_for(dir: &Path, entries: Vec<JournalEntry>) -> JournalFile {
        JournalFile {
            header: JournalHeader::new(
                "run".to_string(),
                "job",
                "clone",
                &dir.join("src"),
                dir,
                &dir.join(".DiskSyncPro/rollback_job_x"),
                "2025-01-15T00:00:00Z".to_string(),
            ),
            entries,
        }
    }

    fn committed(op_id: u64, kind: &str, rel: &str, backup: Option<PathBuf>) -> JournalEntry {
        JournalEntry {
            op_id,
            kind: kind.to_string(),
            rel: rel.to_string(),
            phase: OpPhase::Committed,
            at: "2025-01-15T00:00:01Z".to_string(),
            backup,
            prev_mode: None,
            reason: None,
            rolled_back: false,
        }
    }

    #[test]
    fn test_rollback_removes_created_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("new.txt"), "x").unwrap();
        let mut journal = journal_for(
            dir.path(),
            vec![committed(0, "copy", "new.txt", None)],
        );

        let report = rollback_journal(&mut journal, false).unwrap();
        assert_eq!(report.undone, 1);
        assert!(!dir.path().join("new.txt").exists());
        assert!(journal.entries[0].rolled_back);
    }

    #[test]
    fn test_rollback_restores_overwritten_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let backup = dir.path().join(".DiskSyncPro/rollback_job_x/a.txt");
        std::fs::create_dir_all(backup.parent().unwrap()).unwrap();
        std::fs::write(&backup, "old").unwrap();
        std::fs::write(dir.path().join("a.txt"), "new").unwrap();

        let mut journal = journal_for(
            dir.path(),
            vec![committed(0, "update_file", "a.txt", Some(backup))],
        );
        let report = rollback_journal(&mut journal, false).unwrap();
        assert_eq!(report.undone, 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "old"
        );
    }

    #[test]
    fn test_rollback_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("new.txt"), "x").unwrap();
        let mut journal = journal_for(
            dir.path(),
            vec![committed(0, "copy", "new.txt", None)],
        );

        rollback_journal(&mut journal, false).unwrap();
        // Recreate the file out-of-band; a second pass must not touch it.
        std::fs::write(dir.path().join("new.txt"), "fresh").unwrap();
        let report = rollback_journal(&mut journal, false).unwrap();
        assert_eq!(report.undone, 0);
        assert!(dir.path().join("new.txt").exists());
    }

    #[test]
    fn test_rollback_dry_run_touches_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("new.txt"), "x").unwrap();
        let mut journal = journal_for(
            dir.path(),
            vec![committed(0, "copy", "new.txt", None)],
        );

        let report = rollback_journal(&mut journal, true).unwrap();
        assert_eq!(report.undone, 1);
        assert!(dir.path().join("new.txt").exists());
        assert!(!journal.entries[0].rolled_back);
    }

    #[test]
    fn test_missing_backup_is_unrecoverable() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut journal = journal_for(
            dir.path(),
            vec![committed(
                0,
                "update_file",
                "a.txt",
                Some(dir.path().join("gone/backup.txt")),
            )],
        );
        let report = rollback_journal(&mut journal, false).unwrap();
        assert_eq!(report.unrecoverable, 1);
        assert!(!report.is_clean());
    }
}
