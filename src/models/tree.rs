//! Scanned file-tree model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Entry kind. Symlinks are never followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Dir,
    Symlink,
}

/// Modification time at full filesystem precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MTime {
    pub secs: i64,
    pub nanos: u32,
}

impl MTime {
    pub fn from_system_time(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                secs: d.as_secs() as i64,
                nanos: d.subsec_nanos(),
            },
            // Pre-epoch timestamps get negative seconds.
            Err(e) => {
                let d = e.duration();
                Self {
                    secs: -(d.as_secs() as i64),
                    nanos: d.subsec_nanos(),
                }
            }
        }
    }
}

/// A single scanned entry, keyed by its normalized relative path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// POSIX-normalized relative path, no leading separator.
    pub rel: String,
    pub kind: FileKind,
    pub size: u64,
    pub mtime: MTime,
    /// Permission bits (low 12 bits on unix).
    pub mode: u32,
    /// Symlink target, when kind is symlink.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symlink_target: Option<PathBuf>,
}

impl FileRecord {
    /// Smart Update equality: kind, size, and mtime at stored precision.
    pub fn is_up_to_date(&self, other: &FileRecord) -> bool {
        if self.kind != other.kind {
            return false;
        }
        match self.kind {
            FileKind::Symlink => self.symlink_target == other.symlink_target,
            FileKind::Dir => true,
            FileKind::File => self.size == other.size && self.mtime == other.mtime,
        }
    }
}

/// A scanned tree: normalized relative path -> record.
///
/// Iteration order is lexicographic, which puts every directory before its
/// contents (a parent path is a strict prefix of its children).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tree {
    entries: BTreeMap<String, FileRecord>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: FileRecord) {
        self.entries.insert(record.rel.clone(), record);
    }

    pub fn get(&self, rel: &str) -> Option<&FileRecord> {
        self.entries.get(rel)
    }

    pub fn contains(&self, rel: &str) -> bool {
        self.entries.contains_key(rel)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&String, &FileRecord)> {
        self.entries.iter()
    }

    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(rel: &str, size: u64, secs: i64) -> FileRecord {
        FileRecord {
            rel: rel.to_string(),
            kind: FileKind::File,
            size,
            mtime: MTime { secs, nanos: 0 },
            mode: 0o644,
            symlink_target: None,
        }
    }

    #[test]
    fn test_up_to_date_requires_size_and_mtime() {
        let a = file("a.txt", 3, 100);
        assert!(a.is_up_to_date(&file("a.txt", 3, 100)));
        assert!(!a.is_up_to_date(&file("a.txt", 4, 100)));
        assert!(!a.is_up_to_date(&file("a.txt", 3, 101)));
    }

    #[test]
    fn test_up_to_date_is_nanosecond_exact() {
        let a = FileRecord {
            mtime: MTime { secs: 100, nanos: 1 },
            ..file("a.txt", 3, 100)
        };
        assert!(!a.is_up_to_date(&file("a.txt", 3, 100)));
    }

    #[test]
    fn test_kind_mismatch_is_changed() {
        let mut dir = file("a", 0, 100);
        dir.kind = FileKind::Dir;
        assert!(!dir.is_up_to_date(&file("a", 0, 100)));
    }

    #[test]
    fn test_iteration_puts_parents_before_children() {
        let mut tree = Tree::new();
        tree.insert(file("dir/b.txt", 1, 1));
        let mut d = file("dir", 0, 1);
        d.kind = FileKind::Dir;
        tree.insert(d);
        tree.insert(file("a.txt", 1, 1));

        let keys: Vec<_> = tree.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a.txt", "dir", "dir/b.txt"]);
    }
}
