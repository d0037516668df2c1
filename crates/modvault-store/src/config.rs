//! Store configuration (`modvault.toml`).
//!
//! ```toml
//! root = "/var/lib/modvault"
//! lock_wait_ms = 5000
//!
//! [limits]
//! max_archive_bytes = 524288000
//! max_unzipped_bytes = 524288000
//! max_manifest_bytes = 16777216
//! max_readme_bytes = 16777216
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Size ceilings applied while ingesting archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestLimits {
    /// Largest accepted archive stream, compressed.
    pub max_archive_bytes: u64,
    /// Largest cumulative uncompressed size of all entries.
    pub max_unzipped_bytes: u64,
    /// Largest accepted manifest entry.
    pub max_manifest_bytes: u64,
    /// Largest readme that is extracted; bigger ones are skipped.
    pub max_readme_bytes: u64,
}

impl Default for IngestLimits {
    fn default() -> Self {
        IngestLimits {
            max_archive_bytes: 500 << 20,
            max_unzipped_bytes: 500 << 20,
            max_manifest_bytes: 16 << 20,
            max_readme_bytes: 16 << 20,
        }
    }
}

/// Top-level store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory of the module-proxy layout.
    pub root: PathBuf,
    /// How long an upload waits for another upload of the same module.
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
    #[serde(default)]
    pub limits: IngestLimits,
}

fn default_lock_wait_ms() -> u64 {
    5000
}

impl StoreConfig {
    /// A configuration with default limits rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StoreConfig {
            root: root.into(),
            lock_wait_ms: default_lock_wait_ms(),
            limits: IngestLimits::default(),
        }
    }

    /// Parse a configuration from a TOML string.
    pub fn parse(input: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(input).map_err(|e| StoreError::InvalidRequest {
            detail: format!("invalid configuration: {}", e.message()),
        })?;
        if config.root.as_os_str().is_empty() {
            return Err(StoreError::InvalidRequest {
                detail: "invalid configuration: root is required".to_string(),
            });
        }
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}
