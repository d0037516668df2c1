//! Per-module version index (the `@v/list` file).
//!
//! The list holds unescaped version strings, one per line, sorted ascending
//! by precedence. Lines that are not valid versions are tolerated on read
//! and dropped on the next rewrite. The file is always rewritten whole.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};
use crate::storage::Storage;
use crate::version::{compare_versions, is_valid_version, sort_versions};

/// Name of the version-data directory inside a module directory.
pub const VERSION_DIR: &str = "@v";

/// Name of the list file inside the version-data directory.
pub const LIST_FILE: &str = "list";

/// Relative path of the list file for an escaped module path.
pub fn list_path(escaped_path: &str) -> PathBuf {
    Path::new(escaped_path).join(VERSION_DIR).join(LIST_FILE)
}

pub struct VersionIndex;

impl VersionIndex {
    /// Read the valid versions from a module's list file, ascending.
    ///
    /// A missing list file is an empty index.
    pub fn load(storage: &dyn Storage, escaped_path: &str) -> Result<Vec<String>> {
        let data = match storage.read(&list_path(escaped_path)) {
            Ok(data) => data,
            Err(StoreError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let text = String::from_utf8_lossy(&data);

        let mut versions: Vec<String> = Vec::new();
        let mut skipped = 0usize;
        for line in text.lines() {
            let line = line.trim();
            if !is_valid_version(line) {
                if !line.is_empty() {
                    skipped += 1;
                }
                continue;
            }
            versions.push(line.to_string());
        }
        if skipped > 0 {
            tracing::debug!(module = escaped_path, skipped, "ignored malformed list lines");
        }

        sort_versions(&mut versions);
        versions.dedup_by(|a, b| compare_versions(a, b) == Ordering::Equal);
        Ok(versions)
    }

    /// Add `version` to a sorted index. Returns the new index and whether
    /// the version was already present (in which case it is unchanged).
    pub fn merge(existing: Vec<String>, version: &str) -> (Vec<String>, bool) {
        if existing
            .iter()
            .any(|v| compare_versions(v, version) == Ordering::Equal)
        {
            return (existing, true);
        }
        let mut versions = existing;
        versions.push(version.to_string());
        sort_versions(&mut versions);
        (versions, false)
    }

    /// Rewrite the list file from scratch.
    pub fn persist(storage: &dyn Storage, escaped_path: &str, versions: &[String]) -> Result<()> {
        let mut out = String::with_capacity(versions.len() * 12);
        for version in versions {
            out.push_str(version);
            out.push('\n');
        }
        storage.write_atomic(&list_path(escaped_path), &mut out.as_bytes())?;
        Ok(())
    }
}
