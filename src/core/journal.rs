//! Journal and checkpoint persistence.
//!
//! A single writer task owns both artifacts. Workers post messages over a
//! channel, which serializes the on-disk history: a committed journal line
//! is flushed to disk before the checkpoint ever records the operation as
//! complete.
//!
//! The journal is written to two sinks in lockstep (the project log area
//! and `<dest_root>/.DiskSyncPro/`). Losing one sink degrades to
//! single-sink with a warning; losing both is fatal and surfaces to the
//! engine as a closed channel.

use crate::models::checkpoint::Checkpoint;
use crate::models::journal::{JournalEntry, JournalHeader, OpPhase};
use crate::models::plan::parent_rel;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Checkpoint is atomically rewritten every this many committed ops.
const CHECKPOINT_EVERY: usize = 100;

/// Messages accepted by the writer task.
#[derive(Debug)]
pub enum WriterMsg {
    /// A non-committed lifecycle record (started / failed / skipped).
    Entry(JournalEntry),
    /// A committed record; made durable, then reflected in the checkpoint.
    Committed(JournalEntry),
    /// Persist the checkpoint now (used on cancel).
    Persist,
}

/// Handle to the running writer task.
pub struct JournalWriter {
    pub tx: mpsc::Sender<WriterMsg>,
    handle: JoinHandle<Result<Checkpoint>>,
}

impl JournalWriter {
    /// Wait for the writer to drain and return the final checkpoint state.
    /// Callers must drop every `tx` clone first.
    pub async fn finish(self) -> Result<Checkpoint> {
        drop(self.tx);
        self.handle
            .await
            .map_err(|e| Error::Journal(format!("writer task panicked: {e}")))?
    }
}

struct Sink {
    path: PathBuf,
    file: Option<File>,
}

impl Sink {
    fn open(path: &Path) -> Self {
        let file = match path.parent().map(std::fs::create_dir_all) {
            Some(Err(e)) => {
                tracing::warn!("Journal sink '{}' unavailable: {e}", path.display());
                None
            }
            _ => match File::create(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::warn!("Journal sink '{}' unavailable: {e}", path.display());
                    None
                }
            },
        };
        Self {
            path: path.to_path_buf(),
            file,
        }
    }

    fn append_line(&mut self, line: &str) {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = writeln!(file, "{line}") {
                tracing::warn!(
                    "Journal sink '{}' failed, degrading to single sink: {e}",
                    self.path.display()
                );
                self.file = None;
            }
        }
    }

    fn sync(&mut self) {
        if let Some(file) = self.file.as_ref() {
            if let Err(e) = file.sync_data() {
                tracing::warn!(
                    "Journal sink '{}' fsync failed, degrading: {e}",
                    self.path.display()
                );
                self.file = None;
            }
        }
    }

    fn healthy(&self) -> bool {
        self.file.is_some()
    }
}

struct WriterState {
    sinks: [Sink; 2],
    checkpoint: Checkpoint,
    checkpoint_path: PathBuf,
    /// Planned op count per parent directory rel.
    planned: BTreeMap<String, usize>,
    committed: BTreeMap<String, usize>,
    since_persist: usize,
}

impl WriterState {
    fn append(&mut self, entry: &JournalEntry, durable: bool) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        for sink in &mut self.sinks {
            sink.append_line(&line);
        }
        if durable {
            for sink in &mut self.sinks {
                sink.sync();
            }
        }
        if self.sinks.iter().all(|s| !s.healthy()) {
            return Err(Error::Journal("all journal sinks unwritable".to_string()));
        }
        Ok(())
    }

    fn record_committed(&mut self, entry: &JournalEntry) -> Result<()> {
        // Journal line is durable (append + fsync) before the checkpoint
        // learns about the operation.
        self.append(entry, true)?;

        self.checkpoint.completed_files.insert(entry.rel.clone());
        let dir = parent_rel(&entry.rel);
        let done = self.committed.entry(dir.clone()).or_insert(0);
        *done += 1;
        if Some(&*done) == self.planned.get(&dir) && !dir.is_empty() {
            self.checkpoint.completed_dirs.insert(dir);
        }

        self.since_persist += 1;
        if self.since_persist >= CHECKPOINT_EVERY {
            self.persist_checkpoint()?;
        }
        Ok(())
    }

    fn persist_checkpoint(&mut self) -> Result<()> {
        self.since_persist = 0;
        self.checkpoint
            .save(&self.checkpoint_path)
            .map_err(|e| Error::Checkpoint(e.to_string()))
    }
}

/// Spawn the writer task. The header line is written (and fsynced) to both
/// sinks before this returns; failure of both sinks here is immediately
/// fatal.
pub fn spawn_writer(
    header: &JournalHeader,
    log_journal_path: &Path,
    dest_journal_path: &Path,
    checkpoint_path: &Path,
    planned: BTreeMap<String, usize>,
    checkpoint: Checkpoint,
) -> Result<JournalWriter> {
    let mut state = WriterState {
        sinks: [Sink::open(log_journal_path), Sink::open(dest_journal_path)],
        checkpoint,
        checkpoint_path: checkpoint_path.to_path_buf(),
        planned,
        committed: BTreeMap::new(),
        since_persist: 0,
    };

    let header_line = serde_json::to_string(header)?;
    for sink in &mut state.sinks {
        sink.append_line(&header_line);
        sink.sync();
    }
    if state.sinks.iter().all(|s| !s.healthy()) {
        return Err(Error::Journal(
            "unable to open any journal sink".to_string(),
        ));
    }

    let (tx, mut rx) = mpsc::channel::<WriterMsg>(256);
    let handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let result = match msg {
                WriterMsg::Entry(entry) => {
                    let durable = entry.phase == OpPhase::Skipped;
                    state.append(&entry, durable)
                }
                WriterMsg::Committed(entry) => state.record_committed(&entry),
                WriterMsg::Persist => state.persist_checkpoint(),
            };
            if let Err(e) = result {
                tracing::error!("Journal writer failing: {e}");
                // Dropping the receiver makes every pending send fail,
                // which the executor treats as fatal.
                return Err(e);
            }
        }
        state.persist_checkpoint()?;
        Ok(state.checkpoint)
    });

    Ok(JournalWriter { tx, handle })
}
