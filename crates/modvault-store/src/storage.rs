//! Storage backend trait and local filesystem implementation.
//!
//! The `Storage` trait abstracts the directory tree the module-proxy layout
//! lives in. Paths handed to it are relative to the store root and already
//! escaped. `LocalDisk` is the filesystem implementation; every write goes
//! through a temporary file and an atomic rename so readers never observe a
//! partially written file.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::error::{Result, StoreError};

/// One entry of a listed directory.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Unix permission bits.
    pub mode: u32,
    pub modified: OffsetDateTime,
}

/// Abstract storage backend.
pub trait Storage: Send + Sync {
    /// List a directory, sorted by name. Fails `NotFound` if it is missing.
    fn list_dir(&self, rel: &Path) -> Result<Vec<DirEntry>>;

    /// Read a whole file. Fails `NotFound` if it is missing.
    fn read(&self, rel: &Path) -> Result<Vec<u8>>;

    /// Open a file for streaming.
    fn open(&self, rel: &Path) -> Result<Box<dyn Read + Send>>;

    /// Replace `rel` with everything `data` yields, creating parent
    /// directories. Returns the number of bytes written.
    fn write_atomic(&self, rel: &Path, data: &mut dyn Read) -> Result<u64>;

    /// Delete a file. Deleting a missing file succeeds.
    fn remove(&self, rel: &Path) -> Result<()>;

    /// An anonymous scratch file for buffering uploads; deleted on drop.
    fn scratch_file(&self) -> Result<File>;
}

/// Filesystem storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalDisk {
    root: PathBuf,
}

impl LocalDisk {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalDisk { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }
}

/// Convert an I/O failure, logging the full path instead of returning it.
fn io_failure(op: &str, rel: &Path, full: &Path, err: io::Error) -> StoreError {
    if err.kind() == io::ErrorKind::NotFound {
        return StoreError::not_found(rel.to_string_lossy());
    }
    tracing::error!(path = %full.display(), error = %err, "{op} failed");
    err.into()
}

impl Storage for LocalDisk {
    fn list_dir(&self, rel: &Path) -> Result<Vec<DirEntry>> {
        let dir = self.full(rel);
        let read_dir = std::fs::read_dir(&dir).map_err(|e| io_failure("list", rel, &dir, e))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| io_failure("list", rel, &dir, e))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            // Entries can vanish between readdir and stat; skip them.
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let modified = meta
                .modified()
                .map(OffsetDateTime::from)
                .unwrap_or(OffsetDateTime::UNIX_EPOCH);
            entries.push(DirEntry {
                name,
                is_dir: meta.is_dir(),
                size: meta.len(),
                mode: permission_bits(&meta),
                modified,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read(&self, rel: &Path) -> Result<Vec<u8>> {
        let full = self.full(rel);
        std::fs::read(&full).map_err(|e| io_failure("read", rel, &full, e))
    }

    fn open(&self, rel: &Path) -> Result<Box<dyn Read + Send>> {
        let full = self.full(rel);
        let file = File::open(&full).map_err(|e| io_failure("open", rel, &full, e))?;
        if file
            .metadata()
            .map_err(|e| io_failure("open", rel, &full, e))?
            .is_dir()
        {
            return Err(StoreError::not_found(rel.to_string_lossy()));
        }
        Ok(Box::new(file))
    }

    fn write_atomic(&self, rel: &Path, data: &mut dyn Read) -> Result<u64> {
        let full = self.full(rel);
        let parent = full.parent().unwrap_or(&self.root).to_path_buf();
        std::fs::create_dir_all(&parent).map_err(|e| io_failure("mkdir", rel, &parent, e))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| io_failure("create temp", rel, &parent, e))?;
        let written = io::copy(data, &mut tmp).map_err(|e| io_failure("write", rel, &full, e))?;
        tmp.flush().map_err(|e| io_failure("flush", rel, &full, e))?;
        set_public_permissions(tmp.as_file()).map_err(|e| io_failure("chmod", rel, &full, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| io_failure("sync", rel, &full, e))?;
        tmp.persist(&full)
            .map_err(|e| io_failure("rename", rel, &full, e.error))?;
        Ok(written)
    }

    fn remove(&self, rel: &Path) -> Result<()> {
        let full = self.full(rel);
        match std::fs::remove_file(&full) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                Err(io_failure("remove", rel, &full, e))
            }
            _ => Ok(()),
        }
    }

    fn scratch_file(&self) -> Result<File> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| io_failure("mkdir", Path::new(""), &self.root, e))?;
        tempfile::tempfile_in(&self.root)
            .map_err(|e| io_failure("create scratch", Path::new(""), &self.root, e))
    }
}

#[cfg(unix)]
fn permission_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permission_bits(meta: &std::fs::Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

// NamedTempFile creates files 0600; published files must be world-readable.
#[cfg(unix)]
fn set_public_permissions(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_public_permissions(_file: &File) -> io::Result<()> {
    Ok(())
}
