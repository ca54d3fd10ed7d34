//! Progress events published to the UI collaborator.

use serde::{Deserialize, Serialize};

/// Engine phase, as surfaced in progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Scanning,
    Planning,
    Copying,
    Verifying,
    Finalizing,
    RollingBack,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunPhase::Scanning => "scanning",
            RunPhase::Planning => "planning",
            RunPhase::Copying => "copying",
            RunPhase::Verifying => "verifying",
            RunPhase::Finalizing => "finalizing",
            RunPhase::RollingBack => "rolling_back",
        };
        write!(f, "{s}")
    }
}

/// A progress update. `done` never decreases and never exceeds `total`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job: String,
    pub phase: RunPhase,
    pub done: u64,
    pub total: u64,
    pub bytes_done: u64,
    pub bytes_total: u64,
    /// Relative path the engine is currently working on, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_rel: Option<String>,
}
