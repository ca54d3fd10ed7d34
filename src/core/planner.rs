//! Plan generation module.
//!
//! Diffs the source and destination trees and emits the minimal ordered
//! operation list for the job's mode. Change detection is Smart Update:
//! a destination entry is up-to-date iff kind, size, and mtime all match
//! at stored precision; mode-bits drift alone schedules a chmod.
//!
//! Ordering: directory creations come first (parents before children),
//! then file-level work, then symlinks, then removals (children before
//! parents). Ties break lexicographically on relative path.

use crate::models::checkpoint::Checkpoint;
use crate::models::config::Mode;
use crate::models::plan::{parent_rel, OpKind, Operation, Plan};
use crate::models::tree::{FileKind, Tree};
use crate::utils::filter::validate_rel;
use crate::{Error, Result};
use std::collections::HashSet;

/// Build the operation list for one run.
///
/// `bucket_date` is the `YYYY-MM-DD` SafetyNet bucket for this run. On a
/// resume, `checkpoint` elides operations whose files already committed.
pub fn build_plan(
    source: &Tree,
    dest: &Tree,
    mode: Mode,
    bucket_date: &str,
    checkpoint: Option<&Checkpoint>,
) -> Result<Plan> {
    for tree in [source, dest] {
        for rel in tree.iter().map(|(rel, _)| rel) {
            validate_rel(rel)?;
        }
    }

    let completed = |rel: &str| checkpoint.map(|c| c.is_completed(rel)).unwrap_or(false);

    let mut mkdirs: Vec<OpKind> = Vec::new();
    let mut file_ops: Vec<OpKind> = Vec::new();
    let mut symlink_ops: Vec<OpKind> = Vec::new();
    let mut removals: Vec<OpKind> = Vec::new();

    // Source-driven creates and updates. Tree iteration is lexicographic,
    // so parents are visited before their contents.
    for (rel, record) in source.iter() {
        if completed(rel) {
            tracing::debug!("Resume: eliding committed '{rel}'");
            continue;
        }
        let existing = dest.get(rel);
        match record.kind {
            FileKind::Dir => {
                let dest_is_dir = existing.map(|d| d.kind == FileKind::Dir).unwrap_or(false);
                if !dest_is_dir {
                    mkdirs.push(OpKind::MkDir {
                        rel: rel.clone(),
                        mode: record.mode,
                    });
                }
            }
            FileKind::File => match existing {
                None => file_ops.push(OpKind::Copy {
                    rel: rel.clone(),
                    size: record.size,
                }),
                Some(dest_record) if record.is_up_to_date(dest_record) => {
                    if record.mode != dest_record.mode {
                        file_ops.push(OpKind::Chmod {
                            rel: rel.clone(),
                            mode: record.mode,
                        });
                    }
                }
                Some(_) => file_ops.push(OpKind::UpdateFile {
                    rel: rel.clone(),
                    size: record.size,
                }),
            },
            FileKind::Symlink => {
                let up_to_date = existing.map(|d| record.is_up_to_date(d)).unwrap_or(false);
                if !up_to_date {
                    symlink_ops.push(OpKind::SymlinkCreate {
                        rel: rel.clone(),
                        target: record
                            .symlink_target
                            .clone()
                            .ok_or_else(|| Error::Plan(format!("symlink '{rel}' has no target")))?,
                    });
                }
            }
        }
    }

    // Destination-only entries, per mode. Reverse lexicographic order puts
    // children before their parent directories.
    if mode != Mode::Sync {
        for (rel, record) in dest.iter().rev() {
            if source.contains(rel) || completed(rel) {
                continue;
            }
            match (mode, record.kind) {
                (Mode::Clone, _) => removals.push(OpKind::Delete { rel: rel.clone() }),
                (Mode::SafetyNet, FileKind::Dir) => {
                    // Relocation empties the directory; the shell is kept.
                }
                (Mode::SafetyNet, _) => removals.push(OpKind::MoveToSafetyNet {
                    rel: rel.clone(),
                    bucket_date: bucket_date.to_string(),
                }),
                (Mode::Sync, _) => unreachable!(),
            }
        }
    }

    let mut plan = Plan::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut op_id = 0u64;
    for kind in mkdirs
        .into_iter()
        .chain(file_ops)
        .chain(symlink_ops)
        .chain(removals)
    {
        if !seen.insert(kind.rel().to_string()) {
            return Err(Error::Plan(format!(
                "duplicate operation for path '{}'",
                kind.rel()
            )));
        }
        plan.bytes_total += kind.bytes();
        *plan
            .dir_op_counts
            .entry(parent_rel(kind.rel()))
            .or_insert(0) += 1;
        plan.ops.push(Operation { op_id, kind });
        op_id += 1;
    }

    tracing::info!(
        "Planned {} operations ({} bytes) in mode {mode}",
        plan.ops.len(),
        plan.bytes_total
    );
    Ok(plan)
}
