//! Copy worker pool.
//!
//! Consumes the ordered plan in three waves: directory creations
//! (sequential), file-level operations (concurrent, `threads` workers),
//! then removals (sequential, children before parents). Every mutation is
//! atomic at the file level: content streams to a sibling temp file which
//! is renamed over the target, and any pre-existing target is moved aside
//! to a journal-tracked backup first.
//!
//! Workers never propagate per-operation errors; they retry with
//! exponential backoff, then record the operation as skipped and move on.
//! Only journal/checkpoint persistence failures abort the run.

use crate::core::journal::WriterMsg;
use crate::core::safety_net;
use crate::models::config::Mode;
use crate::models::journal::{JournalEntry, OpPhase};
use crate::models::plan::{OpKind, Operation, Plan};
use crate::models::progress::{ProgressEvent, RunPhase};
use crate::models::snapshot::Counters;
use crate::models::tree::Tree;
use crate::utils::hash;
use crate::{Error, Result};
use futures::stream::{self, StreamExt};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Minimum interval between progress events (10/s).
const EMIT_INTERVAL: Duration = Duration::from_millis(100);

/// Retry backoff base and cap.
const BACKOFF_BASE_MS: u64 = 100;
const BACKOFF_CAP_MS: u64 = 2_000;

/// Shared progress state. `done`/`bytes_done` only ever increase.
pub struct ProgressTracker {
    job: String,
    phase: Mutex<RunPhase>,
    total: AtomicU64,
    bytes_total: AtomicU64,
    done: AtomicU64,
    bytes_done: AtomicU64,
    tx: Option<mpsc::Sender<ProgressEvent>>,
    last_emit: Mutex<Instant>,
}

impl ProgressTracker {
    pub fn new(job: &str, tx: Option<mpsc::Sender<ProgressEvent>>) -> Self {
        Self {
            job: job.to_string(),
            phase: Mutex::new(RunPhase::Scanning),
            total: AtomicU64::new(0),
            bytes_total: AtomicU64::new(0),
            done: AtomicU64::new(0),
            bytes_done: AtomicU64::new(0),
            tx,
            last_emit: Mutex::new(Instant::now() - EMIT_INTERVAL),
        }
    }

    pub fn set_phase(&self, phase: RunPhase) {
        *lock(&self.phase) = phase;
        self.emit(None, true);
    }

    /// Per-file phase change (copying <-> verifying). Published subject to
    /// rate limiting, unlike the forced engine-level transitions.
    pub fn phase_update(&self, phase: RunPhase, current_rel: &str) {
        *lock(&self.phase) = phase;
        self.emit(Some(current_rel), false);
    }

    pub fn set_totals(&self, total: u64, bytes_total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.bytes_total.store(bytes_total, Ordering::Relaxed);
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// Record a finished operation and publish, rate-limited. The final
    /// event (done == total) is always published.
    pub fn op_done(&self, bytes: u64, rel: &str) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
        let force = done == self.total.load(Ordering::Relaxed);
        self.emit(Some(rel), force);
    }

    fn emit(&self, current_rel: Option<&str>, force: bool) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        {
            let mut last = lock(&self.last_emit);
            if !force && last.elapsed() < EMIT_INTERVAL {
                return;
            }
            *last = Instant::now();
        }
        let event = ProgressEvent {
            job: self.job.clone(),
            phase: *lock(&self.phase),
            done: self.done.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
            bytes_done: self.bytes_done.load(Ordering::Relaxed),
            bytes_total: self.bytes_total.load(Ordering::Relaxed),
            current_rel: current_rel.map(|s| s.to_string()),
        };
        // A full channel drops the event rather than stalling a worker.
        let _ = tx.try_send(event);
    }
}

#[derive(Default)]
pub struct RunCounters {
    copied: AtomicU64,
    updated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    deleted: AtomicU64,
    moved_to_safety_net: AtomicU64,
    bytes_transferred: AtomicU64,
}

impl RunCounters {
    pub fn snapshot(&self, scan_warnings: u64) -> Counters {
        Counters {
            copied: self.copied.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            moved_to_safety_net: self.moved_to_safety_net.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            scan_warnings,
        }
    }
}

/// Everything a worker needs, shared behind an Arc.
pub struct ExecContext {
    pub source_root: PathBuf,
    pub dest_root: PathBuf,
    /// Retained pre-image area for this run.
    pub backup_root: PathBuf,
    pub mode: Mode,
    pub verify: bool,
    pub retries: u32,
    pub threads: usize,
    pub bucket_date: String,
    /// Source tree, for permission bits and mtimes.
    pub source: Tree,
    pub writer: mpsc::Sender<WriterMsg>,
    pub cancel: Arc<AtomicBool>,
    pub progress: Arc<ProgressTracker>,
    pub counters: RunCounters,
    created_dirs: Mutex<HashSet<PathBuf>>,
}

impl ExecContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_root: PathBuf,
        dest_root: PathBuf,
        backup_root: PathBuf,
        mode: Mode,
        verify: bool,
        retries: u32,
        threads: usize,
        bucket_date: String,
        source: Tree,
        writer: mpsc::Sender<WriterMsg>,
        cancel: Arc<AtomicBool>,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            source_root,
            dest_root,
            backup_root,
            mode,
            verify,
            retries,
            threads,
            bucket_date,
            source,
            writer,
            cancel,
            progress,
            counters: RunCounters::default(),
            created_dirs: Mutex::new(HashSet::new()),
        }
    }

    /// Create a directory once; the map keeps concurrent workers from
    /// racing duplicate creations.
    fn ensure_dir(&self, path: &Path) -> std::io::Result<()> {
        let mut created = lock(&self.created_dirs);
        if created.contains(path) {
            return Ok(());
        }
        std::fs::create_dir_all(path)?;
        created.insert(path.to_path_buf());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Whether the run was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Completed,
    Cancelled,
}

/// Execute the full plan. Returns Err only on fatal journal failure or a
/// worker panic; per-op errors are recorded and counted instead.
pub async fn execute_plan(plan: &Plan, ctx: &Arc<ExecContext>) -> Result<ExecStatus> {
    let mut mkdirs: Vec<Operation> = Vec::new();
    let mut file_ops: Vec<Operation> = Vec::new();
    let mut removals: Vec<Operation> = Vec::new();
    for op in &plan.ops {
        match op.kind {
            OpKind::MkDir { .. } => mkdirs.push(op.clone()),
            OpKind::Delete { .. } | OpKind::MoveToSafetyNet { .. } => removals.push(op.clone()),
            _ => file_ops.push(op.clone()),
        }
    }

    ctx.progress.set_phase(RunPhase::Copying);

    // Record intent for the whole plan before mutating anything.
    for op in &plan.ops {
        journal_async(ctx, op, OpPhase::Planned, None).await?;
    }

    // Wave 1: directories, in plan order (parents precede children).
    for op in mkdirs {
        run_op(op, ctx).await?;
    }

    // Wave 2: file-level work on the worker pool.
    let results: Vec<Result<()>> = stream::iter(file_ops)
        .map(|op| {
            let ctx = Arc::clone(ctx);
            async move { run_op(op, &ctx).await }
        })
        .buffer_unordered(ctx.threads.max(1))
        .collect()
        .await;
    for result in results {
        result?;
    }

    // Wave 3: removals, in plan order (children precede parents).
    for op in removals {
        run_op(op, ctx).await?;
    }

    if ctx.cancel.load(Ordering::Relaxed) {
        Ok(ExecStatus::Cancelled)
    } else {
        Ok(ExecStatus::Completed)
    }
}

/// Outcome details carried into the committed journal entry.
#[derive(Debug, Default)]
struct OpState {
    backup: Option<PathBuf>,
    prev_mode: Option<u32>,
    bytes: u64,
}

#[derive(Debug)]
enum OpError {
    /// Cancel flag observed mid-operation; temp file already removed.
    Cancelled,
    /// Retry budget exhausted (or non-retriable failure).
    Exhausted(String),
    /// Journal writer gone; fatal.
    Journal,
}

async fn run_op(op: Operation, ctx: &Arc<ExecContext>) -> Result<()> {
    let rel = op.kind.rel().to_string();

    if ctx.cancel.load(Ordering::Relaxed) {
        record_skip(ctx, &op, "cancelled").await?;
        ctx.counters.skipped.fetch_add(1, Ordering::Relaxed);
        ctx.progress.op_done(0, &rel);
        return Ok(());
    }

    let worker_ctx = Arc::clone(ctx);
    let kind = op.kind.clone();
    let op_id = op.op_id;
    let outcome = tokio::task::spawn_blocking(move || perform_with_retry(op_id, &kind, &worker_ctx))
        .await
        .map_err(|e| Error::other(format!("worker panicked on '{rel}': {e}")))?;

    match outcome {
        Ok(state) => {
            let entry = JournalEntry {
                op_id: op.op_id,
                kind: op.kind.name().to_string(),
                rel: rel.clone(),
                phase: OpPhase::Committed,
                at: chrono::Utc::now().to_rfc3339(),
                backup: state.backup,
                prev_mode: state.prev_mode,
                reason: None,
                rolled_back: false,
            };
            ctx.writer
                .send(WriterMsg::Committed(entry))
                .await
                .map_err(|_| Error::Journal("journal writer unavailable".to_string()))?;
            bump_counter(ctx, &op.kind, state.bytes);
            ctx.progress.op_done(state.bytes, &rel);
            Ok(())
        }
        Err(OpError::Cancelled) => {
            record_skip(ctx, &op, "cancelled").await?;
            ctx.counters.skipped.fetch_add(1, Ordering::Relaxed);
            ctx.progress.op_done(0, &rel);
            Ok(())
        }
        Err(OpError::Exhausted(reason)) => {
            tracing::error!("[SKIP] {rel}: {reason}");
            record_skip(ctx, &op, &reason).await?;
            ctx.counters.skipped.fetch_add(1, Ordering::Relaxed);
            ctx.counters.failed.fetch_add(1, Ordering::Relaxed);
            ctx.progress.op_done(0, &rel);
            Ok(())
        }
        Err(OpError::Journal) => Err(Error::Journal("journal writer unavailable".to_string())),
    }
}

async fn record_skip(ctx: &ExecContext, op: &Operation, reason: &str) -> Result<()> {
    journal_async(ctx, op, OpPhase::Skipped, Some(reason)).await
}

async fn journal_async(
    ctx: &ExecContext,
    op: &Operation,
    phase: OpPhase,
    reason: Option<&str>,
) -> Result<()> {
    let entry = JournalEntry {
        op_id: op.op_id,
        kind: op.kind.name().to_string(),
        rel: op.kind.rel().to_string(),
        phase,
        at: chrono::Utc::now().to_rfc3339(),
        backup: None,
        prev_mode: None,
        reason: reason.map(|r| r.to_string()),
        rolled_back: false,
    };
    ctx.writer
        .send(WriterMsg::Entry(entry))
        .await
        .map_err(|_| Error::Journal("journal writer unavailable".to_string()))
}

fn bump_counter(ctx: &ExecContext, kind: &OpKind, bytes: u64) {
    ctx.counters.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    match kind {
        OpKind::Copy { .. } => ctx.counters.copied.fetch_add(1, Ordering::Relaxed),
        OpKind::UpdateFile { .. } => ctx.counters.updated.fetch_add(1, Ordering::Relaxed),
        OpKind::Delete { .. } => ctx.counters.deleted.fetch_add(1, Ordering::Relaxed),
        OpKind::MoveToSafetyNet { .. } => {
            ctx.counters.moved_to_safety_net.fetch_add(1, Ordering::Relaxed)
        }
        _ => 0,
    };
}

/// Blocking attempt loop. Each attempt journals started, then either
/// returns or journals failed and backs off.
fn perform_with_retry(
    op_id: u64,
    kind: &OpKind,
    ctx: &ExecContext,
) -> std::result::Result<OpState, OpError> {
    let mut state = OpState::default();
    for attempt in 0..=ctx.retries {
        journal_blocking(ctx, op_id, kind, OpPhase::Started, None)?;

        match perform(kind, ctx, &mut state) {
            Ok(()) => return Ok(state),
            Err(PerformError::Cancelled) => return Err(OpError::Cancelled),
            Err(PerformError::Io(e)) => {
                let reason = e.to_string();
                tracing::warn!(
                    "{} '{}' failed (attempt {}/{}): {reason}",
                    kind.name(),
                    kind.rel(),
                    attempt + 1,
                    ctx.retries + 1
                );
                journal_blocking(ctx, op_id, kind, OpPhase::Failed, Some(&reason))?;
                if !is_retriable(&e) || attempt == ctx.retries {
                    return Err(OpError::Exhausted(reason));
                }
                std::thread::sleep(backoff_delay(attempt));
            }
        }
    }
    unreachable!("retry loop returns before exhausting attempts")
}

fn journal_blocking(
    ctx: &ExecContext,
    op_id: u64,
    kind: &OpKind,
    phase: OpPhase,
    reason: Option<&str>,
) -> std::result::Result<(), OpError> {
    let entry = JournalEntry {
        op_id,
        kind: kind.name().to_string(),
        rel: kind.rel().to_string(),
        phase,
        at: chrono::Utc::now().to_rfc3339(),
        backup: None,
        prev_mode: None,
        reason: reason.map(|r| r.to_string()),
        rolled_back: false,
    };
    ctx.writer
        .blocking_send(WriterMsg::Entry(entry))
        .map_err(|_| OpError::Journal)
}

/// Exponential backoff with ±20% jitter: 100 ms, 200 ms, ... capped at 2 s.
fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(6));
    let capped = base.min(BACKOFF_CAP_MS);
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

/// Errors a single attempt can produce.
enum PerformError {
    Cancelled,
    Io(std::io::Error),
}

impl From<std::io::Error> for PerformError {
    fn from(e: std::io::Error) -> Self {
        PerformError::Io(e)
    }
}

fn is_retriable(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    // Out of space is hopeless no matter how often we try.
    if e.raw_os_error() == Some(28) {
        return false;
    }
    !matches!(
        e.kind(),
        ErrorKind::PermissionDenied
            | ErrorKind::InvalidInput
            | ErrorKind::Unsupported
            | ErrorKind::NotFound
    )
}

fn perform(
    kind: &OpKind,
    ctx: &ExecContext,
    state: &mut OpState,
) -> std::result::Result<(), PerformError> {
    match kind {
        OpKind::MkDir { rel, mode } => {
            let dst = ctx.dest_root.join(rel);
            // A non-directory occupying the target path is moved aside
            // like any other overwrite before the directory is created.
            if let Ok(metadata) = dst.symlink_metadata() {
                if !metadata.is_dir() && state.backup.is_none() {
                    let backup = match ctx.mode {
                        Mode::SafetyNet => {
                            safety_net::relocation_path(&ctx.dest_root, &ctx.bucket_date, rel)
                        }
                        _ => ctx.backup_root.join(rel),
                    };
                    crate::utils::fs::move_entry(&dst, &backup)?;
                    state.backup = Some(backup);
                }
            }
            ctx.ensure_dir(&dst)?;
            set_mode(&dst, *mode)?;
            Ok(())
        }
        OpKind::Copy { rel, .. } | OpKind::UpdateFile { rel, .. } => copy_file(ctx, rel, state),
        OpKind::Chmod { rel, mode } => {
            let dst = ctx.dest_root.join(rel);
            let metadata = std::fs::metadata(&dst)?;
            state.prev_mode = Some(mode_bits(&metadata));
            set_mode(&dst, *mode)?;
            Ok(())
        }
        OpKind::SymlinkCreate { rel, target } => {
            let dst = ctx.dest_root.join(rel);
            if dst.symlink_metadata().is_ok() && state.backup.is_none() {
                let backup = ctx.backup_root.join(rel);
                crate::utils::fs::move_entry(&dst, &backup)?;
                state.backup = Some(backup);
            }
            make_symlink(target, &dst)?;
            Ok(())
        }
        OpKind::Delete { rel } => {
            let dst = ctx.dest_root.join(rel);
            let Ok(metadata) = dst.symlink_metadata() else {
                return Ok(()); // already gone
            };
            if metadata.is_dir() {
                std::fs::remove_dir(&dst)?;
            } else if state.backup.is_none() {
                let backup = ctx.backup_root.join(rel);
                crate::utils::fs::move_entry(&dst, &backup)?;
                state.backup = Some(backup);
            }
            Ok(())
        }
        OpKind::MoveToSafetyNet { rel, bucket_date } => {
            if state.backup.is_none() {
                let target = safety_net::move_to_safety_net(&ctx.dest_root, bucket_date, rel)?;
                state.backup = Some(target);
            }
            Ok(())
        }
    }
}

/// Atomic copy: stream to a sibling temp file, apply permissions and the
/// source mtime, fsync, move any pre-existing target aside, then rename.
/// With verify enabled, the destination is re-hashed after the rename and
/// compared against the digest streamed from the source.
fn copy_file(
    ctx: &ExecContext,
    rel: &str,
    state: &mut OpState,
) -> std::result::Result<(), PerformError> {
    let src = ctx.source_root.join(rel);
    let dst = ctx.dest_root.join(rel);
    if let Some(parent) = dst.parent() {
        ctx.ensure_dir(parent)?;
    }

    let tmp = crate::utils::fs::temp_sibling(&dst);
    let copy_result = stream_to_temp(&src, &tmp, ctx);
    let (bytes, src_digest) = match copy_result {
        Ok(ok) => ok,
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
    };

    if let Some(record) = ctx.source.get(rel) {
        set_mode(&tmp, record.mode)?;
        let mtime = filetime::FileTime::from_unix_time(record.mtime.secs, record.mtime.nanos);
        filetime::set_file_times(&tmp, mtime, mtime)?;
    }

    // Move the old content aside before the rename so a crash in between
    // cannot silently lose it. The backup survives the run; rollback
    // restores from it. In safety_net mode it lands in the dated bucket.
    if dst.symlink_metadata().is_ok() && state.backup.is_none() {
        let backup = match ctx.mode {
            Mode::SafetyNet => safety_net::relocation_path(&ctx.dest_root, &ctx.bucket_date, rel),
            _ => ctx.backup_root.join(rel),
        };
        crate::utils::fs::move_entry(&dst, &backup)?;
        state.backup = Some(backup);
    }

    if let Err(e) = std::fs::rename(&tmp, &dst) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }

    if let Some(expected) = src_digest {
        ctx.progress.phase_update(RunPhase::Verifying, rel);
        let actual = hash::sha256_file(&dst)?;
        ctx.progress.phase_update(RunPhase::Copying, rel);
        if actual != expected {
            // Remove the corrupt target; the retry loop re-attempts the
            // whole copy and the backup still holds the old content.
            let _ = std::fs::remove_file(&dst);
            return Err(PerformError::Io(std::io::Error::other(format!(
                "verify mismatch for '{rel}': {actual} != {expected}"
            ))));
        }
    }

    state.bytes = bytes;
    Ok(())
}

fn stream_to_temp(
    src: &Path,
    tmp: &Path,
    ctx: &ExecContext,
) -> std::result::Result<(u64, Option<String>), PerformError> {
    let mut reader = std::fs::File::open(src)?;
    let mut writer = std::fs::File::create(tmp)?;
    let mut hasher = ctx.verify.then(Sha256::new);
    let mut buf = vec![0u8; hash::CHUNK_SIZE];
    let mut bytes: u64 = 0;
    loop {
        if ctx.cancel.load(Ordering::Relaxed) {
            drop(writer);
            let _ = std::fs::remove_file(tmp);
            return Err(PerformError::Cancelled);
        }
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        if let Some(hasher) = hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        bytes += n as u64;
    }
    writer.sync_all()?;
    Ok((bytes, hasher.map(hash::hex_digest)))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
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

#[cfg(unix)]
fn make_symlink(target: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, dst)
}

#[cfg(not(unix))]
fn make_symlink(_target: &Path, _dst: &Path) -> std::io::Result<()> {
    Err(std::io::Error::other("symlinks unsupported on this platform"))
}
