//! Backup command.
//!
//! Loads the config, runs the selected jobs through the engine, renders a
//! progress bar from the engine's event stream, and maps each job's
//! outcome to the process exit code (worst job wins).

use crate::core::engine::{self, RunOptions, RunReport, RunStatus};
use crate::models::config::{self, Job};
use crate::models::progress::ProgressEvent;
use crate::{Error, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Flags for the backup subcommand.
#[derive(Debug, Clone)]
pub struct BackupArgs {
    pub config: PathBuf,
    pub job: Option<String>,
    pub dry_run: bool,
    pub resume: bool,
    pub verify: bool,
    pub force: bool,
    pub log_dir: PathBuf,
}

/// Run the selected jobs. Returns the process exit code.
pub async fn backup(args: &BackupArgs) -> Result<i32> {
    let jobs = select_jobs(&args.config, args.job.as_deref())?;

    // One cancel flag for the whole invocation, set by ctrl-c.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!();
                eprintln!("{}", "Cancelling... draining in-flight copies".yellow());
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let mut exit_code = 0;
    for job in &jobs {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let code = run_one(job, args, Arc::clone(&cancel)).await?;
        exit_code = exit_code.max(code);
    }
    Ok(exit_code)
}

fn select_jobs(config: &Path, job_name: Option<&str>) -> Result<Vec<Job>> {
    let jobs = config::load_config(config)?;
    match job_name {
        None => {
            if jobs.is_empty() {
                return Err(Error::Config("config contains no jobs".to_string()));
            }
            Ok(jobs)
        }
        Some(name) => {
            let selected: Vec<Job> = jobs.into_iter().filter(|j| j.name == name).collect();
            if selected.is_empty() {
                return Err(Error::Config(format!("no job named '{name}'")));
            }
            Ok(selected)
        }
    }
}

async fn run_one(job: &Job, args: &BackupArgs, cancel: Arc<AtomicBool>) -> Result<i32> {
    println!();
    println!(
        "{} {} ({} -> {}, mode {})",
        "[JOB]".bold().cyan(),
        job.name.bold(),
        job.source.display(),
        job.destination.display(),
        job.mode
    );

    let (tx, rx) = mpsc::channel::<ProgressEvent>(64);
    let bar_task = tokio::spawn(drive_progress_bar(rx));

    let opts = RunOptions {
        dry_run: args.dry_run,
        resume: args.resume,
        force: args.force,
        verify: args.verify,
        log_dir: args.log_dir.clone(),
        progress: Some(tx),
    };

    let report = engine::run_job(job, &opts, cancel).await?;
    let _ = bar_task.await;

    print_report(job, &report, args.dry_run);
    Ok(report.status.exit_code())
}

/// Render engine progress events onto one indicatif bar.
async fn drive_progress_bar(mut rx: mpsc::Receiver<ProgressEvent>) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );
    while let Some(event) = rx.recv().await {
        if bar.length() != Some(event.total) {
            bar.set_length(event.total);
        }
        bar.set_position(event.done);
        bar.set_message(format!(
            "[{}] {}",
            event.phase,
            event.current_rel.unwrap_or_default()
        ));
    }
    bar.finish_and_clear();
}

fn print_report(job: &Job, report: &RunReport, dry_run: bool) {
    if dry_run {
        if let Some(plan) = &report.plan {
            println!("{}", "[DRY RUN] planned operations:".bold().yellow());
            for op in &plan.ops {
                println!("  {:>18}  {}", op.kind.name(), op.kind.rel());
            }
            println!(
                "  {} operations, {} bytes",
                plan.ops.len(),
                plan.bytes_total
            );
        }
        return;
    }

    let c = &report.counters;
    let headline = match report.status {
        RunStatus::Success => format!("[OK] Job '{}' completed", job.name).green().bold(),
        RunStatus::Partial => format!("[PARTIAL] Job '{}' completed with skips", job.name)
            .yellow()
            .bold(),
        RunStatus::Cancelled => format!("[CANCELLED] Job '{}' paused with checkpoint", job.name)
            .yellow()
            .bold(),
        RunStatus::RolledBack => format!("[ROLLED BACK] Job '{}' failed", job.name).red().bold(),
    };
    println!("{headline}");
    println!("  {} {}", "Copied:".bold(), c.copied);
    println!("  {} {}", "Updated:".bold(), c.updated);
    println!("  {} {}", "Deleted:".bold(), c.deleted);
    println!("  {} {}", "SafetyNet:".bold(), c.moved_to_safety_net);
    println!("  {} {}", "Skipped:".bold(), c.skipped);
    println!("  {} {}", "Bytes:".bold(), c.bytes_transferred);
    println!("  {} {:.1}s", "Duration:".bold(), report.duration_secs);
    if c.scan_warnings > 0 {
        println!(
            "  {} {}",
            "Scan warnings:".bold().yellow(),
            c.scan_warnings
        );
    }
    if let Some(journal) = &report.journal_path {
        println!("  {} {}", "Journal:".bold(), journal.display());
    }
}
