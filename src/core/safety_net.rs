//! SafetyNet relocation.
//!
//! Files doomed by the clone/safety_net policies are moved under
//! `<dest_root>/.SafetyNet/<YYYY-MM-DD>/<rel>` instead of being destroyed,
//! preserving relative structure. The bucket directory is excluded from
//! scanning, so relocated content never feeds back into a plan.

use crate::SAFETY_NET_DIR;
use std::path::{Path, PathBuf};

/// Bucket directory for a run date.
pub fn bucket_dir(dest_root: &Path, bucket_date: &str) -> PathBuf {
    dest_root.join(SAFETY_NET_DIR).join(bucket_date)
}

/// Resolve the relocation target for `rel` within a bucket, appending
/// `(n)` to the final component on collision: `old.txt`, `old.txt(1)`, ...
pub fn relocation_path(dest_root: &Path, bucket_date: &str, rel: &str) -> PathBuf {
    let base = bucket_dir(dest_root, bucket_date).join(rel);
    if !base.exists() {
        return base;
    }
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    for n in 1u32.. {
        let candidate = base.with_file_name(format!("{name}({n})"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

/// Move a destination entry into the bucket. Returns the final resting
/// path for the journal.
pub fn move_to_safety_net(
    dest_root: &Path,
    bucket_date: &str,
    rel: &str,
) -> std::io::Result<PathBuf> {
    let target = relocation_path(dest_root, bucket_date, rel);
    crate::utils::fs::move_entry(&dest_root.join(rel), &target)?;
    tracing::info!("[SafetyNet] {rel} -> {}", target.display());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relocation_preserves_relative_structure() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = relocation_path(dir.path(), "2025-01-15", "a/b/old.txt");
        assert_eq!(
            path,
            dir.path().join(".SafetyNet/2025-01-15/a/b/old.txt")
        );
    }

    #[test]
    fn test_collisions_get_numbered_suffixes() {
        let dir = tempfile::TempDir::new().unwrap();
        let bucket = bucket_dir(dir.path(), "2025-01-15");
        std::fs::create_dir_all(&bucket).unwrap();
        std::fs::write(bucket.join("old.txt"), "first").unwrap();

        let second = relocation_path(dir.path(), "2025-01-15", "old.txt");
        assert_eq!(second.file_name().unwrap().to_str().unwrap(), "old.txt(1)");

        std::fs::write(&second, "second").unwrap();
        let third = relocation_path(dir.path(), "2025-01-15", "old.txt");
        assert_eq!(third.file_name().unwrap().to_str().unwrap(), "old.txt(2)");
    }

    #[test]
    fn test_move_to_safety_net_moves_content() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/doomed.txt"), "payload").unwrap();

        let target = move_to_safety_net(dir.path(), "2025-01-15", "sub/doomed.txt").unwrap();
        assert!(!dir.path().join("sub/doomed.txt").exists());
        assert_eq!(std::fs::read_to_string(target).unwrap(), "payload");
    }
}
