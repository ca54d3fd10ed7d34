//! Relative-path normalization and exclude-pattern matching.

use crate::{Error, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Component, Path};

/// Compiled exclude patterns. A path is excluded when any pattern matches
/// its basename or its full relative path.
#[derive(Debug)]
pub struct ExcludeSet {
    set: GlobSet,
    patterns: Vec<String>,
}

impl ExcludeSet {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(false)
                .build()
                .map_err(|e| Error::Config(format!("bad exclude pattern '{pattern}': {e}")))?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| Error::Config(format!("exclude set: {e}")))?;
        Ok(Self {
            set,
            patterns: patterns.to_vec(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Match against both the basename and the relative path.
    pub fn matches(&self, rel: &str) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        if self.set.is_match(rel) {
            return true;
        }
        let name = rel.rsplit('/').next().unwrap_or(rel);
        self.patterns.iter().any(|p| p == name) || self.set.is_match(name)
    }
}

/// Normalize a path relative to a root into the POSIX form used as a tree
/// key. Rejects absolute paths and any `..` component.
pub fn normalize_rel(path: &Path) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::PathEscapesRoot(path.display().to_string()));
            }
        }
    }
    Ok(parts.join("/"))
}

/// Check that a rel string is already in normalized form and stays within
/// its root.
pub fn validate_rel(rel: &str) -> Result<()> {
    if rel.is_empty() {
        return Err(Error::PathEscapesRoot("<empty>".to_string()));
    }
    if rel.starts_with('/') || rel.contains('\\') {
        return Err(Error::PathEscapesRoot(rel.to_string()));
    }
    if rel.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
        return Err(Error::PathEscapesRoot(rel.to_string()));
    }
    Ok(())
}
