//! DiskSyncPro Library
//!
//! A safe, resumable, journaled directory backup and synchronization engine.

pub mod cli;
pub mod core;
pub mod error;
pub mod models;
pub mod utils;

pub use error::{Error, Result};

/// Working directory created inside every destination root.
pub const APP_DIR: &str = ".DiskSyncPro";

/// Quarantine directory for files that would otherwise be destroyed.
pub const SAFETY_NET_DIR: &str = ".SafetyNet";

/// Schema version stamped into every JSON artifact.
pub const SCHEMA_VERSION: u32 = 1;
