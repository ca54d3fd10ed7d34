//! Command line argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// DiskSyncPro - Safe, resumable, journaled directory backup
#[derive(Parser, Debug)]
#[command(name = "disk-sync-pro")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run backup jobs from a config file
    Backup {
        /// Path to the config JSON file
        #[arg(short, long, value_name = "CONFIG")]
        config: PathBuf,

        /// Run only the named job (default: all jobs in the file)
        #[arg(short, long, value_name = "JOB")]
        job: Option<String>,

        /// Plan and report without touching the destination
        #[arg(long)]
        dry_run: bool,

        /// Continue from an existing checkpoint
        #[arg(long)]
        resume: bool,

        /// Force sha256 verification on, regardless of job settings
        #[arg(long)]
        verify: bool,

        /// Start fresh even if a checkpoint exists
        #[arg(long)]
        force: bool,

        /// Directory for logs and journal mirrors
        #[arg(long, value_name = "DIR", default_value = "logs")]
        log_dir: PathBuf,
    },

    /// Roll back a previous run from its journal
    Rollback {
        /// Path to the journal file
        #[arg(short = 'f', long = "journal-file", value_name = "JOURNAL")]
        journal_file: PathBuf,

        /// Show what would be undone without doing it
        #[arg(long)]
        dry_run: bool,
    },
}
