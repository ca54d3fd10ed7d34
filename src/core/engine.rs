//! Per-job orchestration.
//!
//! scan → plan → open journal → execute → write metadata → delete
//! checkpoint. On cancellation the checkpoint is persisted and the journal
//! flushed; on a fatal executor-layer error (journal sinks gone) an
//! automatic rollback is attempted.

use crate::core::executor::{self, ExecContext, ExecStatus, ProgressTracker};
use crate::core::journal::spawn_writer;
use crate::core::metadata::{self, MetadataSinks};
use crate::core::planner::build_plan;
use crate::core::rollback;
use crate::core::scanner::scan_tree;
use crate::models::checkpoint::Checkpoint;
use crate::models::config::Job;
use crate::models::journal::JournalHeader;
use crate::models::plan::Plan;
use crate::models::progress::{ProgressEvent, RunPhase};
use crate::models::snapshot::{Counters, Snapshot, Summary};
use crate::utils::filter::ExcludeSet;
use crate::{Error, Result, APP_DIR, SCHEMA_VERSION};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// Per-run inputs from the CLI collaborator.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dry_run: bool,
    pub resume: bool,
    /// Allow a fresh start even though a checkpoint exists.
    pub force: bool,
    /// Force verification on regardless of the job's setting.
    pub verify: bool,
    pub log_dir: PathBuf,
    pub progress: Option<mpsc::Sender<ProgressEvent>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            resume: false,
            force: false,
            verify: false,
            log_dir: PathBuf::from("logs"),
            progress: None,
        }
    }
}

/// Final disposition of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// Completed, but some operations were skipped.
    Partial,
    /// Cancelled; the checkpoint is on disk for a later --resume.
    Cancelled,
    /// A fatal error occurred and an automatic rollback was attempted.
    RolledBack,
}

impl RunStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Partial => 1,
            RunStatus::RolledBack => 2,
            RunStatus::Cancelled => 3,
        }
    }
}

/// What the engine hands back to the CLI.
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    pub counters: Counters,
    pub planned_ops: usize,
    pub journal_path: Option<PathBuf>,
    /// Populated for dry runs so the caller can print the plan.
    pub plan: Option<Plan>,
    pub duration_secs: f64,
}

/// Run one job to completion (or cancellation).
pub async fn run_job(
    job: &Job,
    opts: &RunOptions,
    cancel: Arc<AtomicBool>,
) -> Result<RunReport> {
    let started = Instant::now();
    let started_at = chrono::Utc::now().to_rfc3339();
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let bucket_date = chrono::Local::now().format("%Y-%m-%d").to_string();

    tracing::info!(
        "=== Job '{}': {} -> {} (mode {}) ===",
        job.name,
        job.source.display(),
        job.destination.display(),
        job.mode
    );

    crate::utils::fs::ensure_directory(&job.source)
        .map_err(|e| Error::Config(format!("source root: {e}")))?;

    let app_dir = job.destination.join(APP_DIR);
    let checkpoint_path = app_dir.join(format!("checkpoint_{}.json", job.name));

    let checkpoint = resolve_checkpoint(job, opts, &checkpoint_path)?;

    if !opts.dry_run {
        std::fs::create_dir_all(&app_dir)?;
    }

    let progress = Arc::new(ProgressTracker::new(&job.name, opts.progress.clone()));
    let excludes = ExcludeSet::new(&job.exclude)?;

    // Scan. Completed directories are pruned on both sides during a
    // resume; their contents are already in their final state.
    progress.set_phase(RunPhase::Scanning);
    let skip_dirs = checkpoint.as_ref().map(|c| &c.completed_dirs);
    let source_scan = scan_tree(&job.source, &excludes, skip_dirs)?;
    let dest_scan = if job.destination.is_dir() {
        scan_tree(&job.destination, &excludes, skip_dirs)?
    } else {
        Default::default()
    };
    let scan_warnings = (source_scan.warnings.len() + dest_scan.warnings.len()) as u64;

    // Plan.
    progress.set_phase(RunPhase::Planning);
    let plan = build_plan(
        &source_scan.tree,
        &dest_scan.tree,
        job.mode,
        &bucket_date,
        checkpoint.as_ref(),
    )?;
    progress.set_totals(plan.len() as u64, plan.bytes_total);

    if opts.dry_run {
        for op in &plan.ops {
            tracing::info!("[DRY RUN] {} {}", op.kind.name(), op.kind.rel());
        }
        return Ok(RunReport {
            status: RunStatus::Success,
            counters: Counters {
                scan_warnings,
                ..Counters::default()
            },
            planned_ops: plan.len(),
            journal_path: None,
            plan: Some(plan),
            duration_secs: started.elapsed().as_secs_f64(),
        });
    }

    // Open the journal (dual-sink) and its single-writer task.
    let journal_name = format!("journal_{}_{stamp}.json", job.name);
    let log_journal_path = opts.log_dir.join(&journal_name);
    let dest_journal_path = app_dir.join(&journal_name);
    let backup_root = app_dir.join(format!("rollback_{}_{stamp}", job.name));

    let header = JournalHeader::new(
        uuid::Uuid::new_v4().to_string(),
        &job.name,
        &job.mode.to_string(),
        &job.source,
        &job.destination,
        &backup_root,
        started_at.clone(),
    );
    let writer = spawn_writer(
        &header,
        &log_journal_path,
        &dest_journal_path,
        &checkpoint_path,
        plan.dir_op_counts.clone(),
        checkpoint.unwrap_or_else(|| Checkpoint::new(&job.name)),
    )?;

    let ctx = Arc::new(ExecContext::new(
        job.source.clone(),
        job.destination.clone(),
        backup_root,
        job.mode,
        job.verify || opts.verify,
        job.retries,
        job.threads,
        bucket_date,
        source_scan.tree,
        writer.tx.clone(),
        Arc::clone(&cancel),
        Arc::clone(&progress),
    ));

    let exec_result = executor::execute_plan(&plan, &ctx).await;
    let counters = ctx.counters.snapshot(scan_warnings);
    drop(ctx); // release the writer sender so the task can drain

    match exec_result {
        Err(e) => {
            tracing::error!("Fatal executor error: {e}; attempting automatic rollback");
            progress.set_phase(RunPhase::RollingBack);
            let _ = writer.finish().await;
            attempt_auto_rollback(&dest_journal_path, &log_journal_path);
            Ok(RunReport {
                status: RunStatus::RolledBack,
                counters,
                planned_ops: plan.len(),
                journal_path: Some(dest_journal_path),
                plan: None,
                duration_secs: started.elapsed().as_secs_f64(),
            })
        }
        Ok(ExecStatus::Cancelled) => {
            // The writer persists the checkpoint as it drains; the journal
            // is already flushed through the last committed entry.
            writer.finish().await?;
            tracing::warn!("Job '{}' cancelled; checkpoint retained", job.name);
            Ok(RunReport {
                status: RunStatus::Cancelled,
                counters,
                planned_ops: plan.len(),
                journal_path: Some(dest_journal_path),
                plan: None,
                duration_secs: started.elapsed().as_secs_f64(),
            })
        }
        Ok(ExecStatus::Completed) => {
            writer.finish().await?;

            progress.set_phase(RunPhase::Finalizing);
            finalize_run(job, opts, &stamp, &started_at, counters)?;

            if checkpoint_path.exists() {
                std::fs::remove_file(&checkpoint_path)?;
            }

            let status = if counters.is_clean() {
                RunStatus::Success
            } else {
                RunStatus::Partial
            };
            tracing::info!("=== Job '{}' finished: {:?} ===", job.name, status);
            Ok(RunReport {
                status,
                counters,
                planned_ops: plan.len(),
                journal_path: Some(dest_journal_path),
                plan: None,
                duration_secs: started.elapsed().as_secs_f64(),
            })
        }
    }
}

/// Decide how an existing checkpoint interacts with --resume / --force.
fn resolve_checkpoint(
    job: &Job,
    opts: &RunOptions,
    checkpoint_path: &std::path::Path,
) -> Result<Option<Checkpoint>> {
    if checkpoint_path.exists() {
        if opts.resume {
            let checkpoint = Checkpoint::load(checkpoint_path)
                .map_err(|e| Error::Checkpoint(format!("cannot resume: {e}")))?;
            tracing::info!(
                "Resuming '{}': {} files, {} dirs already completed",
                job.name,
                checkpoint.completed_files.len(),
                checkpoint.completed_dirs.len()
            );
            Ok(Some(checkpoint))
        } else if opts.force {
            tracing::warn!("Discarding existing checkpoint for '{}'", job.name);
            std::fs::remove_file(checkpoint_path)?;
            Ok(None)
        } else {
            Err(Error::CheckpointExists(job.name.clone()))
        }
    } else {
        if opts.resume {
            tracing::warn!("--resume requested but no checkpoint exists; starting fresh");
        }
        Ok(None)
    }
}

/// Rescan the destination and emit snapshot / index / summary.
fn finalize_run(
    job: &Job,
    opts: &RunOptions,
    stamp: &str,
    started_at: &str,
    counters: Counters,
) -> Result<()> {
    let excludes = ExcludeSet::new(&job.exclude)?;
    let final_scan = scan_tree(&job.destination, &excludes, None)?;
    let finished_at = chrono::Utc::now().to_rfc3339();

    let snapshot = Snapshot {
        schema: SCHEMA_VERSION,
        id: stamp.to_string(),
        job: job.name.clone(),
        started_at: started_at.to_string(),
        finished_at: finished_at.clone(),
        counters,
        tree: final_scan.tree,
    };
    let summary = Summary {
        schema: SCHEMA_VERSION,
        job: job.name.clone(),
        mode: job.mode.to_string(),
        started_at: started_at.to_string(),
        finished_at: finished_at.clone(),
        duration_secs: parse_duration(started_at, &finished_at),
        counters,
        safety_net_days: job.safety_net_days,
    };

    let sinks = MetadataSinks::new(&opts.log_dir, &job.destination.join(APP_DIR));
    metadata::write_run_artifacts(&sinks, stamp, &snapshot, &summary)
}

fn parse_duration(started_at: &str, finished_at: &str) -> f64 {
    let parse = |s: &str| chrono::DateTime::parse_from_rfc3339(s).ok();
    match (parse(started_at), parse(finished_at)) {
        (Some(a), Some(b)) => (b - a).num_milliseconds() as f64 / 1000.0,
        _ => 0.0,
    }
}

fn attempt_auto_rollback(primary: &std::path::Path, fallback: &std::path::Path) {
    let path = if primary.exists() { primary } else { fallback };
    match rollback::rollback_journal_file(path, false) {
        Ok(report) if report.is_clean() => {
            tracing::info!("Automatic rollback completed ({} ops undone)", report.undone);
        }
        Ok(report) => {
            tracing::error!(
                "Automatic rollback incomplete: {} unrecoverable, {} errors",
                report.unrecoverable,
                report.errors.len()
            );
        }
        Err(e) => tracing::error!("Automatic rollback failed: {e}"),
    }
}
