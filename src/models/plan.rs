//! Plan data model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A planned mutation with its stable id (monotonic within a run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub op_id: u64,
    #[serde(flatten)]
    pub kind: OpKind,
}

/// Operation kinds emitted by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpKind {
    MkDir { rel: String, mode: u32 },
    Copy { rel: String, size: u64 },
    UpdateFile { rel: String, size: u64 },
    Chmod { rel: String, mode: u32 },
    SymlinkCreate { rel: String, target: PathBuf },
    MoveToSafetyNet { rel: String, bucket_date: String },
    Delete { rel: String },
}

impl OpKind {
    /// Relative path this operation targets.
    pub fn rel(&self) -> &str {
        match self {
            OpKind::MkDir { rel, .. }
            | OpKind::Copy { rel, .. }
            | OpKind::UpdateFile { rel, .. }
            | OpKind::Chmod { rel, .. }
            | OpKind::SymlinkCreate { rel, .. }
            | OpKind::MoveToSafetyNet { rel, .. }
            | OpKind::Delete { rel } => rel,
        }
    }

    /// Short tag used in journal entries and log lines.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::MkDir { .. } => "mkdir",
            OpKind::Copy { .. } => "copy",
            OpKind::UpdateFile { .. } => "update_file",
            OpKind::Chmod { .. } => "chmod",
            OpKind::SymlinkCreate { .. } => "symlink_create",
            OpKind::MoveToSafetyNet { .. } => "move_to_safety_net",
            OpKind::Delete { .. } => "delete",
        }
    }

    /// Bytes this operation will transfer.
    pub fn bytes(&self) -> u64 {
        match self {
            OpKind::Copy { size, .. } | OpKind::UpdateFile { size, .. } => *size,
            _ => 0,
        }
    }
}

/// An ordered operation list plus the bookkeeping the executor and the
/// checkpoint writer need.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub ops: Vec<Operation>,
    /// Total bytes across copy/update operations.
    pub bytes_total: u64,
    /// Planned operation count per parent directory rel ("" for the root),
    /// used to decide when a directory is fully processed.
    pub dir_op_counts: BTreeMap<String, usize>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Parent directory rel of a rel path ("" for top-level entries).
pub fn parent_rel(rel: &str) -> String {
    match rel.rfind('/') {
        Some(idx) => rel[..idx].to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_rel() {
        assert_eq!(parent_rel("a.txt"), "");
        assert_eq!(parent_rel("dir/a.txt"), "dir");
        assert_eq!(parent_rel("a/b/c"), "a/b");
    }

    #[test]
    fn test_op_serde_tagging() {
        let op = Operation {
            op_id: 7,
            kind: OpKind::Copy {
                rel: "dir/b.txt".to_string(),
                size: 5,
            },
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains(r#""op":"copy""#));
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}
