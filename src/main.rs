//! DiskSyncPro CLI
//!
//! Safe, resumable, journaled directory backup and synchronization.

use clap::Parser;
use disk_sync_pro::cli::{
    args::{Cli, Commands},
    commands::{backup, rollback},
};
use disk_sync_pro::Error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Backup {
            config,
            job,
            dry_run,
            resume,
            verify,
            force,
            log_dir,
        } => {
            backup::backup(&backup::BackupArgs {
                config,
                job,
                dry_run,
                resume,
                verify,
                force,
                log_dir,
            })
            .await
        }
        Commands::Rollback {
            journal_file,
            dry_run,
        } => rollback::rollback(&journal_file, dry_run).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(exit_code_for(&e));
        }
    }
}

/// Errors that reach main are configuration/argument-class failures unless
/// the journal layer says otherwise.
fn exit_code_for(error: &Error) -> i32 {
    match error {
        Error::Journal(_) | Error::Rollback(_) => 2,
        Error::Cancelled => 3,
        _ => 4,
    }
}

/// Initialize the logging system.
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("disk_sync_pro=debug")
    } else {
        EnvFilter::new("disk_sync_pro=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
