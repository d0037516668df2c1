//! Response structures handed to the service layer.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One child of a walked path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathNode {
    /// Last path element, unescaped.
    pub name: String,
    /// Full unescaped module path of the child.
    pub path: String,
}

/// One published version of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub version: String,
}

/// Result of [`ModuleStore::walk`](crate::ModuleStore::walk).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkResult {
    /// Child path prefixes, sorted by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<PathNode>,
    /// Whether the walked prefix holds an `@v` directory.
    #[serde(default)]
    pub is_module: bool,
    /// Published versions, ascending. Empty unless `is_module`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<ModuleVersion>,
}

/// One canonical file of a module version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub name: String,
    /// Unix permission string, e.g. `-rw-r--r--`.
    pub mode: String,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
}

/// Best-effort identity guess for an archive. Never authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SniffResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl SniffResult {
    pub fn is_empty(&self) -> bool {
        self.path.is_none() && self.version.is_none()
    }
}

/// Contents of a `<version>.info` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VersionInfo {
    pub version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
}

/// Summary of a committed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub path: String,
    pub version: String,
    /// SHA-256 of the stored archive, lowercase hex.
    pub archive_sha256: String,
    /// Whether a readme was extracted.
    pub has_readme: bool,
    /// Whether the version was already listed before this upload.
    pub replaced: bool,
}

/// Render Unix permission bits the way `ls -l` does.
pub fn format_mode(mode: u32, is_dir: bool) -> String {
    const BITS: [(u32, char); 9] = [
        (0o400, 'r'),
        (0o200, 'w'),
        (0o100, 'x'),
        (0o040, 'r'),
        (0o020, 'w'),
        (0o010, 'x'),
        (0o004, 'r'),
        (0o002, 'w'),
        (0o001, 'x'),
    ];
    let mut out = String::with_capacity(10);
    out.push(if is_dir { 'd' } else { '-' });
    for (bit, c) in BITS {
        out.push(if mode & bit != 0 { c } else { '-' });
    }
    out
}
