//! Executor + journal integration: per-attempt journaling, skip-and-
//! continue behavior, and checkpoint contents after a mixed run.

use disk_sync_pro::core::executor::{execute_plan, ExecContext, ExecStatus, ProgressTracker};
use disk_sync_pro::core::journal::spawn_writer;
use disk_sync_pro::core::scanner::scan_tree;
use disk_sync_pro::models::checkpoint::Checkpoint;
use disk_sync_pro::models::config::Mode;
use disk_sync_pro::models::journal::{JournalFile, JournalHeader, OpPhase};
use disk_sync_pro::models::plan::{OpKind, Operation, Plan};
use disk_sync_pro::utils::filter::ExcludeSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tempfile::TempDir;

fn phases_for<'a>(journal: &'a JournalFile, rel: &str) -> Vec<OpPhase> {
    journal
        .entries
        .iter()
        .filter(|e| e.rel == rel)
        .map(|e| e.phase)
        .collect()
}

#[tokio::test]
async fn test_failed_op_is_skipped_and_run_continues() {
    let work = TempDir::new().unwrap();
    let source = work.path().join("src");
    let dest = work.path().join("dst");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(source.join("real.txt"), "payload").unwrap();

    let excludes = ExcludeSet::new(&[]).unwrap();
    let tree = scan_tree(&source, &excludes, None).unwrap().tree;

    // One healthy copy plus one whose source does not exist on disk.
    let plan = Plan {
        ops: vec![
            Operation {
                op_id: 0,
                kind: OpKind::Copy {
                    rel: "real.txt".to_string(),
                    size: 7,
                },
            },
            Operation {
                op_id: 1,
                kind: OpKind::Copy {
                    rel: "ghost.txt".to_string(),
                    size: 1,
                },
            },
        ],
        bytes_total: 8,
        dir_op_counts: Default::default(),
    };

    let app_dir = dest.join(".DiskSyncPro");
    let log_journal = work.path().join("logs/journal_t.json");
    let dest_journal = app_dir.join("journal_t.json");
    let checkpoint_path = app_dir.join("checkpoint_t.json");
    let header = JournalHeader::new(
        "run-t".to_string(),
        "t",
        "clone",
        &source,
        &dest,
        &app_dir.join("rollback_t"),
        "2025-01-15T00:00:00Z".to_string(),
    );
    let writer = spawn_writer(
        &header,
        &log_journal,
        &dest_journal,
        &checkpoint_path,
        plan.dir_op_counts.clone(),
        Checkpoint::new("t"),
    )
    .unwrap();

    let ctx = Arc::new(ExecContext::new(
        source.clone(),
        dest.clone(),
        app_dir.join("rollback_t"),
        Mode::Clone,
        false,
        2,
        2,
        "2025-01-15".to_string(),
        tree,
        writer.tx.clone(),
        Arc::new(AtomicBool::new(false)),
        Arc::new(ProgressTracker::new("t", None)),
    ));

    let status = execute_plan(&plan, &ctx).await.unwrap();
    assert_eq!(status, ExecStatus::Completed);

    let counters = ctx.counters.snapshot(0);
    drop(ctx);
    let checkpoint = writer.finish().await.unwrap();

    // The healthy file landed; the broken one was skipped, not fatal.
    assert_eq!(counters.copied, 1);
    assert_eq!(counters.skipped, 1);
    assert_eq!(counters.failed, 1);
    assert_eq!(
        std::fs::read_to_string(dest.join("real.txt")).unwrap(),
        "payload"
    );
    assert!(!dest.join("ghost.txt").exists());

    // Checkpoint only records the committed file.
    assert!(checkpoint.is_completed("real.txt"));
    assert!(!checkpoint.is_completed("ghost.txt"));

    // Journal shows the full lifecycle in both sinks: a missing source is
    // non-retriable, so one started/failed pair then the skip marker.
    for path in [&log_journal, &dest_journal] {
        let journal = JournalFile::load(path).unwrap();
        assert_eq!(
            phases_for(&journal, "ghost.txt"),
            vec![
                OpPhase::Planned,
                OpPhase::Started,
                OpPhase::Failed,
                OpPhase::Skipped
            ]
        );
        assert_eq!(
            phases_for(&journal, "real.txt"),
            vec![OpPhase::Planned, OpPhase::Started, OpPhase::Committed]
        );
    }
}

#[tokio::test]
async fn test_atomic_overwrite_retains_backup() {
    let work = TempDir::new().unwrap();
    let source = work.path().join("src");
    let dest = work.path().join("dst");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(source.join("a.txt"), "new content").unwrap();
    std::fs::write(dest.join("a.txt"), "old content").unwrap();

    let excludes = ExcludeSet::new(&[]).unwrap();
    let tree = scan_tree(&source, &excludes, None).unwrap().tree;

    let plan = Plan {
        ops: vec![Operation {
            op_id: 0,
            kind: OpKind::UpdateFile {
                rel: "a.txt".to_string(),
                size: 11,
            },
        }],
        bytes_total: 11,
        dir_op_counts: Default::default(),
    };

    let app_dir = dest.join(".DiskSyncPro");
    let backup_root = app_dir.join("rollback_t");
    let header = JournalHeader::new(
        "run-t".to_string(),
        "t",
        "clone",
        &source,
        &dest,
        &backup_root,
        "2025-01-15T00:00:00Z".to_string(),
    );
    let writer = spawn_writer(
        &header,
        &work.path().join("logs/journal_t.json"),
        &app_dir.join("journal_t.json"),
        &app_dir.join("checkpoint_t.json"),
        plan.dir_op_counts.clone(),
        Checkpoint::new("t"),
    )
    .unwrap();

    let ctx = Arc::new(ExecContext::new(
        source.clone(),
        dest.clone(),
        backup_root.clone(),
        Mode::Clone,
        false,
        0,
        1,
        "2025-01-15".to_string(),
        tree,
        writer.tx.clone(),
        Arc::new(AtomicBool::new(false)),
        Arc::new(ProgressTracker::new("t", None)),
    ));

    let status = execute_plan(&plan, &ctx).await.unwrap();
    assert_eq!(status, ExecStatus::Completed);
    drop(ctx);
    writer.finish().await.unwrap();

    // New content is visible; the pre-image survives in the backup area
    // and the journal records where it went.
    assert_eq!(
        std::fs::read_to_string(dest.join("a.txt")).unwrap(),
        "new content"
    );
    assert_eq!(
        std::fs::read_to_string(backup_root.join("a.txt")).unwrap(),
        "old content"
    );
    let journal = JournalFile::load(&app_dir.join("journal_t.json")).unwrap();
    let committed = journal
        .entries
        .iter()
        .find(|e| e.phase == OpPhase::Committed)
        .unwrap();
    assert_eq!(committed.backup.as_deref(), Some(backup_root.join("a.txt").as_path()));

    // No temp files left next to the target.
    let stray: Vec<_> = std::fs::read_dir(&dest)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("dsp-tmp"))
        .collect();
    assert!(stray.is_empty());
}

#[tokio::test]
async fn test_cancelled_ops_drain_as_skipped() {
    let work = TempDir::new().unwrap();
    let source = work.path().join("src");
    let dest = work.path().join("dst");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&dest).unwrap();
    for i in 0..4 {
        std::fs::write(source.join(format!("f{i}.txt")), "data").unwrap();
    }

    let excludes = ExcludeSet::new(&[]).unwrap();
    let tree = scan_tree(&source, &excludes, None).unwrap().tree;
    let ops = (0..4)
        .map(|i| Operation {
            op_id: i,
            kind: OpKind::Copy {
                rel: format!("f{i}.txt"),
                size: 4,
            },
        })
        .collect();
    let plan = Plan {
        ops,
        bytes_total: 16,
        dir_op_counts: Default::default(),
    };

    let app_dir = dest.join(".DiskSyncPro");
    let header = JournalHeader::new(
        "run-t".to_string(),
        "t",
        "clone",
        &source,
        &dest,
        &app_dir.join("rollback_t"),
        "2025-01-15T00:00:00Z".to_string(),
    );
    let writer = spawn_writer(
        &header,
        &work.path().join("logs/journal_t.json"),
        &app_dir.join("journal_t.json"),
        &app_dir.join("checkpoint_t.json"),
        plan.dir_op_counts.clone(),
        Checkpoint::new("t"),
    )
    .unwrap();

    let ctx = Arc::new(ExecContext::new(
        source.clone(),
        dest.clone(),
        app_dir.join("rollback_t"),
        Mode::Clone,
        false,
        0,
        2,
        "2025-01-15".to_string(),
        tree,
        writer.tx.clone(),
        Arc::new(AtomicBool::new(true)), // cancelled before any work
        Arc::new(ProgressTracker::new("t", None)),
    ));

    let status = execute_plan(&plan, &ctx).await.unwrap();
    assert_eq!(status, ExecStatus::Cancelled);
    let counters = ctx.counters.snapshot(0);
    drop(ctx);
    writer.finish().await.unwrap();

    assert_eq!(counters.skipped, 4);
    assert_eq!(counters.copied, 0);
    // No partial destination files were created.
    let created: Vec<_> = std::fs::read_dir(&dest)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".txt"))
        .collect();
    assert!(created.is_empty());

    let journal = JournalFile::load(&app_dir.join("journal_t.json")).unwrap();
    for entry in journal.entries.iter().filter(|e| e.phase == OpPhase::Skipped) {
        assert_eq!(entry.reason.as_deref(), Some("cancelled"));
    }
}
