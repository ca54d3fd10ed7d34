//! Rollback command.

use crate::core::rollback::rollback_journal_file;
use crate::models::journal::JournalFile;
use crate::{Error, Result};
use colored::Colorize;
use std::path::Path;

/// Roll a journal back. Returns the process exit code.
pub async fn rollback(journal_path: &Path, dry_run: bool) -> Result<i32> {
    if !journal_path.exists() {
        return Err(Error::PathNotFound(journal_path.display().to_string()));
    }

    let journal = JournalFile::load(journal_path)?;
    println!(
        "{} job '{}' from {} ({} entries)",
        if dry_run {
            "[DRY RUN] Rolling back".bold().yellow()
        } else {
            "[ROLLBACK]".bold().cyan()
        },
        journal.header.job,
        journal.header.started_at,
        journal.entries.len()
    );

    let report = rollback_journal_file(journal_path, dry_run)?;

    println!("{}", "[Rollback Summary]".bold().green());
    println!("  {} {}", "Undone:".bold(), report.undone);
    println!("  {} {}", "Skipped:".bold(), report.skipped);
    println!("  {} {}", "Unrecoverable:".bold(), report.unrecoverable);
    for error in &report.errors {
        println!("  {} {}", "-".red(), error);
    }

    Ok(if report.is_clean() { 0 } else { 1 })
}
