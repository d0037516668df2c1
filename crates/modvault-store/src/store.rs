//! Read side of the module-proxy layout: walk, stat and open.
//!
//! Every call re-derives its answer from storage; nothing is cached between
//! requests.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, StoreError};
use crate::escape::{escape_path, escape_version, unescape_path, unescape_version};
use crate::index::{VersionIndex, VERSION_DIR};
use crate::storage::{LocalDisk, Storage};
use crate::types::{format_mode, FileStat, ModuleVersion, PathNode, WalkResult};
use crate::version::is_valid_version;

/// Read access to the published modules.
#[derive(Clone)]
pub struct ModuleStore {
    storage: Arc<dyn Storage>,
}

impl ModuleStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        ModuleStore { storage }
    }

    /// A store over a local directory.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(LocalDisk::new(root)))
    }

    /// List the children of a path prefix and, if the prefix is a module
    /// root, its published versions. An empty `path` walks the store root.
    pub fn walk(&self, path: &str, cancel: &CancellationToken) -> Result<WalkResult> {
        check_cancel(cancel)?;
        let escaped = if path.is_empty() {
            String::new()
        } else {
            escape_path(path)?
        };

        let entries = self
            .storage
            .list_dir(Path::new(&escaped))
            .map_err(|e| not_found_as(e, || format!("path '{path}'")))?;

        let mut result = WalkResult::default();
        for entry in entries {
            check_cancel(cancel)?;
            if !entry.is_dir {
                continue;
            }
            if entry.name == VERSION_DIR {
                result.is_module = true;
                continue;
            }

            let child = if escaped.is_empty() {
                entry.name.clone()
            } else {
                format!("{escaped}/{}", entry.name)
            };
            let Some(raw) = round_trip_path(&child) else {
                tracing::debug!(entry = %child, "skipping directory that is not a module path");
                continue;
            };
            let name = raw.rsplit('/').next().unwrap_or(&raw).to_string();
            result.paths.push(PathNode { name, path: raw });
        }

        if result.is_module {
            result.modules = VersionIndex::load(self.storage.as_ref(), &escaped)?
                .into_iter()
                .filter(|v| is_valid_version(v))
                .map(|version| ModuleVersion { version })
                .collect();
        }
        Ok(result)
    }

    /// List the canonical files of one module version.
    pub fn stat(
        &self,
        path: &str,
        version: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<FileStat>> {
        check_cancel(cancel)?;
        let escaped = escape_path(path)?;
        let escaped_version = escape_version(version)?;

        let dir = Path::new(&escaped).join(VERSION_DIR);
        let entries = self
            .storage
            .list_dir(&dir)
            .map_err(|e| not_found_as(e, || format!("module '{path}'")))?;

        let files = entries
            .into_iter()
            .filter(|e| !e.is_dir && is_canonical_name(&e.name, &escaped_version))
            .map(|e| FileStat {
                mode: format_mode(e.mode, false),
                name: e.name,
                size: e.size,
                modified_at: e.modified,
            })
            .collect();
        Ok(files)
    }

    /// Open one canonical file by module path and file name, e.g.
    /// `("demo.org/sample", "v1.0.0.zip")`.
    pub fn open(
        &self,
        path: &str,
        filename: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Read + Send>> {
        check_cancel(cancel)?;
        let escaped = escape_path(path)?;
        check_canonical_filename(filename)?;

        let rel = Path::new(&escaped).join(VERSION_DIR).join(filename);
        self.storage
            .open(&rel)
            .map_err(|e| not_found_as(e, || format!("file '{filename}' of module '{path}'")))
    }
}

/// Unescape a directory path, keeping it only if it escapes back exactly.
fn round_trip_path(escaped: &str) -> Option<String> {
    let raw = unescape_path(escaped).ok()?;
    match escape_path(&raw) {
        Ok(again) if again == escaped => Some(raw),
        _ => None,
    }
}

/// `name` is `<escaped_version>.<ext>` with a non-empty, dot-free extension.
fn is_canonical_name(name: &str, escaped_version: &str) -> bool {
    match name
        .strip_prefix(escaped_version)
        .and_then(|rest| rest.strip_prefix('.'))
    {
        Some(ext) => !ext.is_empty() && !ext.contains('.'),
        None => false,
    }
}

/// Reject anything but `<escaped version>.<ext>`, so a crafted name cannot
/// reach outside the version-data directory.
fn check_canonical_filename(filename: &str) -> Result<()> {
    let invalid = |detail: &str| StoreError::InvalidRequest {
        detail: format!("file name '{filename}': {detail}"),
    };
    if filename.contains(['/', '\\']) {
        return Err(invalid("must not contain path separators"));
    }
    let Some((stem, ext)) = filename.rsplit_once('.') else {
        return Err(invalid("missing extension"));
    };
    if ext.is_empty() || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(invalid("invalid extension"));
    }
    match unescape_version(stem) {
        Ok(version) if is_valid_version(&version) => Ok(()),
        _ => Err(invalid("not a version file")),
    }
}

fn not_found_as(err: StoreError, what: impl FnOnce() -> String) -> StoreError {
    match err {
        StoreError::NotFound { .. } => StoreError::not_found(what()),
        other => other,
    }
}

pub(crate) fn check_cancel(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    Ok(())
}
