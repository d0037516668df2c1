//! Module artifact store in the module-proxy directory layout.
//!
//! Published modules live under a single root directory:
//!
//! ```text
//! <root>/<escaped module path>/@v/list
//! <root>/<escaped module path>/@v/<escaped version>.{info,mod,zip,markdown}
//! ```
//!
//! # Architecture
//!
//! - **Read side** ([`ModuleStore`]): walk path prefixes, stat the files of
//!   a version, open a single canonical file.
//! - **Write side** ([`ArchiveIngest`]): sniff an archive's identity,
//!   validate and publish a canonical archive, repackage arbitrary archives
//!   into canonical form.
//!
//! Both sides sit on a [`Storage`] backend; [`LocalDisk`] is the filesystem
//! one. Module paths and versions are validated and case-escaped by
//! [`escape`] before they ever touch storage.

pub mod archive;
pub mod config;
pub mod digest;
pub mod error;
pub mod escape;
pub mod index;
pub mod ingest;
pub mod lock;
pub mod manifest;
pub mod storage;
pub mod store;
pub mod types;
pub mod version;

// Re-exports for convenience.
pub use config::{IngestLimits, StoreConfig};
pub use digest::ContentHash;
pub use error::{ErrorBody, ErrorKind, Result, StoreError};
pub use escape::{check_path, escape_path, escape_version, unescape_path, unescape_version};
pub use index::VersionIndex;
pub use ingest::{ArchiveIngest, PackedModule};
pub use manifest::ModFile;
pub use storage::{LocalDisk, Storage};
pub use store::ModuleStore;
pub use tokio_util::sync::CancellationToken;
pub use types::{FileStat, SniffResult, UploadReceipt, VersionInfo, WalkResult};
pub use version::{parse_version, Version};

use std::sync::Arc;

/// Open both halves of a store over the local root named in `config`,
/// sharing one storage handle.
pub fn open_local(config: &StoreConfig) -> (ModuleStore, ArchiveIngest) {
    let storage: Arc<dyn Storage> = Arc::new(LocalDisk::new(config.root.clone()));
    (
        ModuleStore::new(storage.clone()),
        ArchiveIngest::new(storage, config),
    )
}
