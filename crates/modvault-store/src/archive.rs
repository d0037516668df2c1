//! Read-only view over an uploaded zip archive.

use std::io::{Read, Seek};

use zip::ZipArchive;

use crate::error::{Result, StoreError};

/// Metadata of one archive entry, from the central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    /// Declared uncompressed size.
    pub size: u64,
    /// Unix permission bits, 0o644 when the archive does not record them.
    pub mode: u32,
    pub is_dir: bool,
}

/// A zip archive opened over any seekable byte source.
pub struct ModuleArchive<R> {
    zip: ZipArchive<R>,
}

impl<R: Read + Seek> ModuleArchive<R> {
    /// Open an archive; the source's length is found by seeking.
    pub fn new(reader: R) -> Result<Self> {
        let zip = ZipArchive::new(reader)
            .map_err(|e| StoreError::invalid_archive(format!("not a zip archive: {e}")))?;
        Ok(ModuleArchive { zip })
    }

    /// Whether an entry with exactly this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.zip.index_for_name(name).is_some()
    }

    /// Enumerate entries in archive order.
    pub fn entries(&mut self) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::with_capacity(self.zip.len());
        for i in 0..self.zip.len() {
            let file = self.zip.by_index(i)?;
            entries.push(ArchiveEntry {
                name: file.name().to_string(),
                size: file.size(),
                mode: file.unix_mode().map(|m| m & 0o777).unwrap_or(0o644),
                is_dir: file.is_dir(),
            });
        }
        Ok(entries)
    }

    /// Open a decompressing reader for one entry.
    pub fn open(&mut self, name: &str) -> Result<impl Read + '_> {
        self.zip
            .by_name(name)
            .map_err(|_| StoreError::not_found(format!("archive entry '{name}'")))
    }

    /// Read one entry fully, refusing entries larger than `limit` bytes.
    pub fn read_entry(&mut self, name: &str, limit: u64) -> Result<Vec<u8>> {
        let entry = self.open(name)?;
        let mut buf = Vec::new();
        entry.take(limit.saturating_add(1)).read_to_end(&mut buf).map_err(|e| {
            StoreError::invalid_archive(format!("reading archive entry '{name}': {e}"))
        })?;
        if buf.len() as u64 > limit {
            return Err(StoreError::invalid_archive(format!(
                "archive entry '{name}' exceeds {limit} bytes"
            )));
        }
        Ok(buf)
    }

    /// Give back the underlying source.
    pub fn into_inner(self) -> R {
        self.zip.into_inner()
    }
}
