//! Write side of the store: sniff, upload, format and pack.
//!
//! An upload moves through `received -> validated -> persisted`, or stops
//! at `rejected`. All validation happens before the first write. Canonical
//! files are written one by one through atomic renames, and the version
//! only becomes visible when the `list` file is rewritten last.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::archive::ModuleArchive;
use crate::config::{IngestLimits, StoreConfig};
use crate::digest::ContentHash;
use crate::error::{Result, StoreError};
use crate::escape::{check_file_path, check_path, escape_path, escape_version};
use crate::index::{VersionIndex, VERSION_DIR};
use crate::lock::{acquire, ModuleLocks};
use crate::manifest::{extract_manifest, synthesize_manifest, ModFile, MANIFEST_NAME};
use crate::storage::{LocalDisk, Storage};
use crate::store::check_cancel;
use crate::types::{SniffResult, UploadReceipt, VersionInfo};
use crate::version::{is_valid_version, parse_version};

/// Readme names accepted at the module root, compared case-insensitively.
const README_NAMES: &[&str] = &["readme.md", "readme.markdown"];

/// Version-control metadata directories never packed into a module.
const VCS_DIRS: &[&str] = &[".git", ".hg", ".svn", ".bzr"];

/// One file headed for a canonical archive, relative to the module root.
#[derive(Debug, Clone)]
struct SourceFile {
    rel: String,
    data: Vec<u8>,
}

/// A canonical archive built by [`ArchiveIngest::pack_dir`].
#[derive(Debug, Clone)]
pub struct PackedModule {
    pub path: String,
    pub version: String,
    pub archive: Vec<u8>,
}

/// Ingest of module archives into the store.
#[derive(Clone)]
pub struct ArchiveIngest {
    storage: Arc<dyn Storage>,
    locks: Arc<ModuleLocks>,
    limits: IngestLimits,
    lock_wait: Duration,
}

impl ArchiveIngest {
    pub fn new(storage: Arc<dyn Storage>, config: &StoreConfig) -> Self {
        ArchiveIngest {
            storage,
            locks: Arc::new(ModuleLocks::new()),
            limits: config.limits,
            lock_wait: config.lock_wait(),
        }
    }

    /// An ingest over the local directory named by `config.root`.
    pub fn local(config: &StoreConfig) -> Self {
        Self::new(Arc::new(LocalDisk::new(config.root.clone())), config)
    }

    /// Guess the module path and version an archive was built for.
    ///
    /// Scans entry names for `<path>@<version>/`, dropping leading
    /// directories until the path is valid. Returns an empty result when
    /// nothing matches or the archive cannot be read.
    pub fn sniff<R: Read + Seek>(archive: R) -> SniffResult {
        let Ok(mut archive) = ModuleArchive::new(archive) else {
            return SniffResult::default();
        };
        let Ok(entries) = archive.entries() else {
            return SniffResult::default();
        };
        entries
            .iter()
            .find_map(|entry| sniff_name(&entry.name))
            .map(|(path, version)| SniffResult {
                path: Some(path),
                version: Some(version),
            })
            .unwrap_or_default()
    }

    /// Validate an already-canonical archive and publish it.
    pub fn upload(
        &self,
        archive: &mut dyn Read,
        path: &str,
        version: &str,
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt> {
        check_cancel(cancel)?;
        let (escaped_path, escaped_version) = validate_target(path, version)?;
        let prefix = format!("{path}@{version}/");

        let (mut spool, mod_bytes, readme) = match self.inspect(archive, path, &prefix) {
            Ok(checked) => checked,
            Err(e) => {
                tracing::warn!(module = path, version, error = %e, "rejected upload");
                return Err(e);
            }
        };
        spool.seek(SeekFrom::Start(0))?;
        let digest = ContentHash::compute_reader(&mut spool)?;
        spool.seek(SeekFrom::Start(0))?;
        check_cancel(cancel)?;

        let slot = self.locks.slot(&escaped_path);
        let _guard = acquire(&slot, path, self.lock_wait)?;
        check_cancel(cancel)?;

        let existing = VersionIndex::load(self.storage.as_ref(), &escaped_path)?;
        let (versions, already_listed) = VersionIndex::merge(existing, version);

        // A fresh version is invisible until the list is rewritten, so
        // stopping between its files leaves only unreferenced orphans.
        // A listed version is being replaced and must not stop half way.
        let step = || {
            if already_listed {
                Ok(())
            } else {
                check_cancel(cancel)
            }
        };

        let dir = Path::new(&escaped_path).join(VERSION_DIR);
        let file = |ext: &str| dir.join(format!("{escaped_version}.{ext}"));

        self.storage.write_atomic(&file("zip"), &mut spool)?;
        step()?;
        self.storage.write_atomic(&file("mod"), &mut mod_bytes.as_slice())?;
        step()?;
        match &readme {
            Some(readme) => {
                self.storage.write_atomic(&file("markdown"), &mut readme.as_slice())?;
            }
            None => self.storage.remove(&file("markdown"))?,
        }
        step()?;

        let info = VersionInfo {
            version: version.to_string(),
            time: self
                .published_time(&file("info"), version)
                .unwrap_or_else(OffsetDateTime::now_utc),
        };
        let mut info_bytes = serde_json::to_vec(&info)?;
        info_bytes.push(b'\n');
        self.storage.write_atomic(&file("info"), &mut info_bytes.as_slice())?;
        step()?;

        if !already_listed {
            VersionIndex::persist(self.storage.as_ref(), &escaped_path, &versions)?;
        }

        tracing::info!(
            module = path,
            version,
            sha256 = %digest,
            replaced = already_listed,
            "published module version"
        );
        Ok(UploadReceipt {
            path: path.to_string(),
            version: version.to_string(),
            archive_sha256: digest.0,
            has_readme: readme.is_some(),
            replaced: already_listed,
        })
    }

    /// Repackage an arbitrary archive into a canonical one, in memory.
    ///
    /// Entry names are taken relative to the module root; a leading
    /// canonical prefix, if already present, is stripped first.
    pub fn format<R: Read + Seek>(
        &self,
        archive: R,
        path: &str,
        version: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        check_cancel(cancel)?;
        validate_target(path, version)?;
        let prefix = format!("{path}@{version}/");

        let mut zip = ModuleArchive::new(archive)?;
        let mut files = Vec::new();
        let mut total = 0u64;
        for entry in zip.entries()? {
            check_cancel(cancel)?;
            if entry.is_dir {
                continue;
            }
            total = total.saturating_add(entry.size);
            if total > self.limits.max_unzipped_bytes {
                return Err(self.too_large());
            }
            let data = zip.read_entry(&entry.name, self.limits.max_unzipped_bytes)?;
            let rel = entry
                .name
                .strip_prefix(prefix.as_str())
                .unwrap_or(&entry.name)
                .to_string();
            files.push(SourceFile { rel, data });
        }

        self.build_canonical(path, version, files, cancel)
    }

    /// Build a canonical archive from a source directory.
    ///
    /// When `path` is `None` the module path is read from the directory's
    /// own manifest.
    pub fn pack_dir(
        &self,
        dir: &Path,
        path: Option<&str>,
        version: &str,
        cancel: &CancellationToken,
    ) -> Result<PackedModule> {
        check_cancel(cancel)?;
        let path = match path {
            Some(path) => path.to_string(),
            None => detect_module_path(dir, self.limits.max_manifest_bytes)?,
        };
        validate_target(&path, version)?;

        let mut files = Vec::new();
        let mut total = 0u64;
        collect_dir(dir, dir, &mut files, &mut total, &self.limits, cancel)?;
        let archive = self.build_canonical(&path, version, files, cancel)?;
        Ok(PackedModule {
            path,
            version: version.to_string(),
            archive,
        })
    }

    /// Spool and check an upload, returning the spooled archive, the
    /// manifest bytes to store and the readme, if any.
    fn inspect(
        &self,
        archive: &mut dyn Read,
        path: &str,
        prefix: &str,
    ) -> Result<(File, Vec<u8>, Option<Vec<u8>>)> {
        let spool = self.spool(archive)?;
        let mut zip = ModuleArchive::new(spool)?;
        self.check_module_zip(&mut zip, prefix)?;

        let manifest = extract_manifest(&mut zip, prefix, self.limits.max_manifest_bytes)?;
        let mod_bytes = match manifest {
            Some(manifest) => match manifest.declared {
                Some(declared) if declared != path => {
                    return Err(StoreError::ModuleIdentityMismatch {
                        requested: path.to_string(),
                        declared,
                    });
                }
                Some(_) => manifest.raw,
                None => synthesize_manifest(path),
            },
            None => synthesize_manifest(path),
        };
        let readme = self.extract_readme(&mut zip, prefix)?;
        Ok((zip.into_inner(), mod_bytes, readme))
    }

    /// Copy the incoming stream into a scratch file, bounded by the limit.
    fn spool(&self, archive: &mut dyn Read) -> Result<File> {
        let limit = self.limits.max_archive_bytes;
        let mut spool = self.storage.scratch_file()?;
        let copied = io::copy(&mut archive.take(limit.saturating_add(1)), &mut spool)?;
        if copied > limit {
            return Err(self.too_large());
        }
        spool.seek(SeekFrom::Start(0))?;
        Ok(spool)
    }

    /// Structural checks on an archive that claims to be canonical.
    fn check_module_zip<R: Read + Seek>(
        &self,
        zip: &mut ModuleArchive<R>,
        prefix: &str,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        let mut total = 0u64;
        let mut file_count = 0usize;
        for entry in zip.entries()? {
            let Some(rel) = entry.name.strip_prefix(prefix) else {
                return Err(StoreError::invalid_archive(format!(
                    "entry '{}' is not under '{prefix}'",
                    entry.name
                )));
            };
            if entry.is_dir {
                let rel = rel.trim_end_matches('/');
                if !rel.is_empty() {
                    check_file_path(rel)?;
                }
                continue;
            }
            check_file_path(rel)?;
            if !seen.insert(rel.to_lowercase()) {
                return Err(StoreError::invalid_archive(format!(
                    "entry '{}' collides with another entry differing only in case",
                    entry.name
                )));
            }
            total = total.saturating_add(entry.size);
            if total > self.limits.max_unzipped_bytes {
                return Err(self.too_large());
            }
            if rel == MANIFEST_NAME && entry.size > self.limits.max_manifest_bytes {
                return Err(StoreError::invalid_archive(format!(
                    "{MANIFEST_NAME} exceeds {} bytes",
                    self.limits.max_manifest_bytes
                )));
            }
            file_count += 1;
        }
        if file_count == 0 {
            return Err(StoreError::invalid_archive("archive contains no files"));
        }
        Ok(())
    }

    /// Pull a readme from the module root, skipping ones over the limit.
    fn extract_readme<R: Read + Seek>(
        &self,
        zip: &mut ModuleArchive<R>,
        prefix: &str,
    ) -> Result<Option<Vec<u8>>> {
        let candidate = zip.entries()?.into_iter().find(|entry| {
            !entry.is_dir
                && entry
                    .name
                    .strip_prefix(prefix)
                    .is_some_and(|rel| README_NAMES.contains(&rel.to_lowercase().as_str()))
        });
        let Some(entry) = candidate else {
            return Ok(None);
        };
        if entry.size > self.limits.max_readme_bytes {
            tracing::debug!(entry = %entry.name, size = entry.size, "readme too large, skipped");
            return Ok(None);
        }
        let data = zip.read_entry(&entry.name, self.limits.max_readme_bytes)?;
        Ok((!data.is_empty()).then_some(data))
    }

    /// Publish time of an earlier upload of the same version, if any.
    fn published_time(&self, info_path: &Path, version: &str) -> Option<OffsetDateTime> {
        let data = self.storage.read(info_path).ok()?;
        let info: VersionInfo = serde_json::from_slice(&data).ok()?;
        (info.version == version).then_some(info.time)
    }

    /// Write the canonical archive for `files`: filtered, validated, sorted
    /// and stamped with a fixed time so equal inputs give equal bytes.
    fn build_canonical(
        &self,
        path: &str,
        version: &str,
        files: Vec<SourceFile>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let nested: Vec<String> = files
            .iter()
            .filter_map(|f| f.rel.strip_suffix(&format!("/{MANIFEST_NAME}")).map(str::to_string))
            .collect();

        let mut kept: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut folded = HashSet::new();
        let mut total = 0u64;
        for file in files {
            if file.rel.split('/').any(|elem| VCS_DIRS.contains(&elem)) {
                continue;
            }
            if nested
                .iter()
                .any(|dir| file.rel.starts_with(&format!("{dir}/")))
            {
                tracing::debug!(file = %file.rel, "dropping file of nested module");
                continue;
            }
            check_file_path(&file.rel)?;
            if !folded.insert(file.rel.to_lowercase()) {
                return Err(StoreError::invalid_archive(format!(
                    "file '{}' collides with another file differing only in case",
                    file.rel
                )));
            }
            total = total.saturating_add(file.data.len() as u64);
            if total > self.limits.max_unzipped_bytes {
                return Err(self.too_large());
            }
            if file.rel == MANIFEST_NAME {
                self.check_manifest_identity(&file.data, path)?;
            }
            kept.insert(file.rel, file.data);
        }
        if kept.is_empty() {
            return Err(StoreError::invalid_archive("no files to package"));
        }

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (rel, data) in &kept {
            check_cancel(cancel)?;
            writer.start_file(format!("{path}@{version}/{rel}"), options)?;
            writer.write_all(data)?;
        }
        Ok(writer.finish()?.into_inner())
    }

    fn check_manifest_identity(&self, data: &[u8], path: &str) -> Result<()> {
        if data.len() as u64 > self.limits.max_manifest_bytes {
            return Err(StoreError::invalid_archive(format!(
                "{MANIFEST_NAME} exceeds {} bytes",
                self.limits.max_manifest_bytes
            )));
        }
        match ModFile::parse(data)?.module {
            Some(declared) if declared != path => Err(StoreError::ModuleIdentityMismatch {
                requested: path.to_string(),
                declared,
            }),
            _ => Ok(()),
        }
    }

    fn too_large(&self) -> StoreError {
        StoreError::invalid_archive(format!(
            "module exceeds size limit ({} bytes archived, {} bytes unpacked)",
            self.limits.max_archive_bytes, self.limits.max_unzipped_bytes
        ))
    }
}

/// Check path and version syntax and return their escaped forms.
fn validate_target(path: &str, version: &str) -> Result<(String, String)> {
    let escaped_path = escape_path(path)?;
    let escaped_version = escape_version(version)?;
    if !parse_version(version)?.build.is_empty() {
        return Err(StoreError::invalid_version(
            version,
            "build metadata is not allowed in module versions",
        ));
    }
    Ok((escaped_path, escaped_version))
}

/// Extract `(path, version)` from an entry name like
/// `wrapper/demo.org/thing@v0.3.1/README`.
fn sniff_name(name: &str) -> Option<(String, String)> {
    let at = name.find("@v")?;
    let (before, after) = (&name[..at], &name[at + 1..]);
    let version = after.split('/').next()?;
    if !is_valid_version(version) {
        return None;
    }
    let elems: Vec<&str> = before.split('/').collect();
    (0..elems.len())
        .map(|start| elems[start..].join("/"))
        .find(|candidate| check_path(candidate).is_ok())
        .map(|path| (path, version.to_string()))
}

/// Read the declared module path from `dir/go.mod`.
fn detect_module_path(dir: &Path, limit: u64) -> Result<String> {
    let manifest = dir.join(MANIFEST_NAME);
    let missing = || {
        StoreError::invalid_path(
            "",
            format!("no module path given and none declared in {MANIFEST_NAME}"),
        )
    };
    let file = File::open(&manifest).map_err(|_| missing())?;
    let mut data = Vec::new();
    file.take(limit).read_to_end(&mut data)?;
    ModFile::parse(&data)?.module.ok_or_else(missing)
}

/// Recursively gather regular files under `dir`, skipping symlinks.
fn collect_dir(
    root: &Path,
    dir: &Path,
    files: &mut Vec<SourceFile>,
    total: &mut u64,
    limits: &IngestLimits,
    cancel: &CancellationToken,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        check_cancel(cancel)?;
        let entry = entry?;
        let file_type = entry.file_type()?;
        let full: PathBuf = entry.path();
        if file_type.is_dir() {
            collect_dir(root, &full, files, total, limits, cancel)?;
            continue;
        }
        if !file_type.is_file() {
            tracing::debug!(path = %full.display(), "skipping non-regular file");
            continue;
        }
        let rel = relative_slash_path(root, &full)?;
        *total = total.saturating_add(entry.metadata()?.len());
        if *total > limits.max_unzipped_bytes {
            return Err(StoreError::invalid_archive(format!(
                "module exceeds size limit ({} bytes unpacked)",
                limits.max_unzipped_bytes
            )));
        }
        files.push(SourceFile {
            rel,
            data: std::fs::read(&full)?,
        });
    }
    Ok(())
}

fn relative_slash_path(root: &Path, full: &Path) -> Result<String> {
    let rel = full.strip_prefix(root).unwrap_or(full);
    let mut parts = Vec::new();
    for part in rel.components() {
        let part = part.as_os_str().to_str().ok_or_else(|| {
            StoreError::invalid_archive(format!("file name is not UTF-8: {}", rel.display()))
        })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::zip_bytes;
    use crate::error::ErrorKind;
    use crate::store::ModuleStore;

    const PREFIX: &str = "demo.org/sample@v1.0.0/";

    fn setup() -> (tempfile::TempDir, ArchiveIngest, ModuleStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(dir.path());
        let storage: Arc<dyn Storage> = Arc::new(LocalDisk::new(dir.path()));
        let ingest = ArchiveIngest::new(storage.clone(), &config);
        (dir, ingest, ModuleStore::new(storage))
    }

    fn canonical(extra: &[(&str, &[u8])]) -> Vec<u8> {
        let mut entries: Vec<(String, &[u8])> = vec![
            (format!("{PREFIX}go.mod"), &b"module demo.org/sample\n"[..]),
            (format!("{PREFIX}main.go"), &b"package main\n"[..]),
        ];
        for (name, data) in extra {
            entries.push((format!("{PREFIX}{name}"), *data));
        }
        let borrowed: Vec<(&str, &[u8])> =
            entries.iter().map(|(n, d)| (n.as_str(), *d)).collect();
        zip_bytes(&borrowed)
    }

    fn upload(
        ingest: &ArchiveIngest,
        bytes: &[u8],
        path: &str,
        version: &str,
    ) -> Result<UploadReceipt> {
        ingest.upload(&mut &bytes[..], path, version, &CancellationToken::new())
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|rd| {
                rd.map(|e| e.unwrap().file_name().into_string().unwrap())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[test]
    fn sniff_plain_and_wrapped() {
        let bytes = zip_bytes(&[("demo.org/thing@v1.2.3/go.mod", b"")]);
        let result = ArchiveIngest::sniff(Cursor::new(bytes));
        assert_eq!(result.path.as_deref(), Some("demo.org/thing"));
        assert_eq!(result.version.as_deref(), Some("v1.2.3"));

        let bytes = zip_bytes(&[("weird-layout/demo.org/thing@v0.3.1-rc.1/README", b"")]);
        let result = ArchiveIngest::sniff(Cursor::new(bytes));
        assert_eq!(result.path.as_deref(), Some("demo.org/thing"));
        assert_eq!(result.version.as_deref(), Some("v0.3.1-rc.1"));
    }

    #[test]
    fn sniff_without_match_is_empty() {
        let bytes = zip_bytes(&[
            ("src/main.go", b""),
            ("nodot@v1.0.0/x", b""),
            ("a.org/b@vx/y", b""),
        ]);
        assert!(ArchiveIngest::sniff(Cursor::new(bytes)).is_empty());
        assert!(ArchiveIngest::sniff(Cursor::new(b"junk".to_vec())).is_empty());
    }

    #[test]
    fn upload_writes_canonical_layout() {
        let (dir, ingest, _) = setup();
        let receipt = upload(&ingest, &canonical(&[]), "demo.org/sample", "v1.0.0").unwrap();
        assert!(!receipt.replaced);
        assert!(!receipt.has_readme);
        assert_eq!(receipt.archive_sha256.len(), 64);

        let vdir = dir.path().join("demo.org/sample/@v");
        assert_eq!(names(&vdir), vec!["list", "v1.0.0.info", "v1.0.0.mod", "v1.0.0.zip"]);
        assert_eq!(std::fs::read_to_string(vdir.join("list")).unwrap(), "v1.0.0\n");
        assert_eq!(
            std::fs::read_to_string(vdir.join("v1.0.0.mod")).unwrap(),
            "module demo.org/sample\n"
        );
        let info: VersionInfo =
            serde_json::from_slice(&std::fs::read(vdir.join("v1.0.0.info")).unwrap()).unwrap();
        assert_eq!(info.version, "v1.0.0");
        assert_eq!(std::fs::read(vdir.join("v1.0.0.zip")).unwrap(), canonical(&[]));
    }

    #[test]
    fn upload_extracts_readme_and_escapes_names() {
        let (dir, ingest, _) = setup();
        let prefix = "demo.org/Big@v1.0.0-RC/";
        let bytes = zip_bytes(&[
            (&format!("{prefix}main.go"), b"package big\n"),
            (&format!("{prefix}README.md"), b"# Big\n"),
            (&format!("{prefix}docs/readme.md"), b"nested, ignored\n"),
        ]);
        let receipt = upload(&ingest, &bytes, "demo.org/Big", "v1.0.0-RC").unwrap();
        assert!(receipt.has_readme);

        let vdir = dir.path().join("demo.org/!big/@v");
        assert_eq!(
            std::fs::read_to_string(vdir.join("v1.0.0-!r!c.markdown")).unwrap(),
            "# Big\n"
        );
        assert_eq!(
            std::fs::read_to_string(vdir.join("v1.0.0-!r!c.mod")).unwrap(),
            "module demo.org/Big\n"
        );
        assert_eq!(std::fs::read_to_string(vdir.join("list")).unwrap(), "v1.0.0-RC\n");
    }

    #[test]
    fn upload_is_idempotent() {
        let (dir, ingest, _) = setup();
        let bytes = canonical(&[]);
        upload(&ingest, &bytes, "demo.org/sample", "v1.0.0").unwrap();
        let vdir = dir.path().join("demo.org/sample/@v");
        let first_info = std::fs::read(vdir.join("v1.0.0.info")).unwrap();

        let receipt = upload(&ingest, &bytes, "demo.org/sample", "v1.0.0").unwrap();
        assert!(receipt.replaced);
        assert_eq!(std::fs::read_to_string(vdir.join("list")).unwrap(), "v1.0.0\n");
        assert_eq!(std::fs::read(vdir.join("v1.0.0.info")).unwrap(), first_info);
        assert_eq!(std::fs::read(vdir.join("v1.0.0.zip")).unwrap(), bytes);
    }

    #[test]
    fn reupload_without_readme_drops_stale_one() {
        let (dir, ingest, _) = setup();
        let with_readme = canonical(&[("README.md", b"old")]);
        upload(&ingest, &with_readme, "demo.org/sample", "v1.0.0").unwrap();
        upload(&ingest, &canonical(&[]), "demo.org/sample", "v1.0.0").unwrap();
        assert!(!dir.path().join("demo.org/sample/@v/v1.0.0.markdown").exists());
    }

    #[test]
    fn upload_keeps_list_sorted() {
        let (dir, ingest, _) = setup();
        for version in ["v1.10.0", "v1.2.0", "v2.0.0", "v2.0.0-alpha"] {
            let prefix = format!("demo.org/sample@{version}/");
            let bytes = zip_bytes(&[(&format!("{prefix}main.go"), b"package main\n")]);
            upload(&ingest, &bytes, "demo.org/sample", version).unwrap();
        }
        assert_eq!(
            std::fs::read_to_string(dir.path().join("demo.org/sample/@v/list")).unwrap(),
            "v1.2.0\nv1.10.0\nv2.0.0-alpha\nv2.0.0\n"
        );
    }

    #[test]
    fn upload_rejects_identity_mismatch_without_writing() {
        let (dir, ingest, _) = setup();
        let bytes = zip_bytes(&[
            ("example.com/bar@v1.0.0/go.mod", b"module example.com/foo\n"),
            ("example.com/bar@v1.0.0/main.go", b"package main\n"),
        ]);
        let err = upload(&ingest, &bytes, "example.com/bar", "v1.0.0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModuleIdentityMismatch);
        assert!(!dir.path().join("example.com").exists());
    }

    #[test]
    fn upload_rejects_structural_violations() {
        let (dir, ingest, _) = setup();
        let cases: Vec<Vec<u8>> = vec![
            zip_bytes(&[("demo.org/other@v1.0.0/main.go", b"x")]),
            zip_bytes(&[(&format!("{PREFIX}main.go"), b"x"), ("stray.txt", b"x")]),
            zip_bytes(&[(&format!("{PREFIX}../escape.go"), b"x")]),
            zip_bytes(&[(&format!("{PREFIX}A.go"), b"x"), (&format!("{PREFIX}a.go"), b"x")]),
            zip_bytes(&[(&format!("{PREFIX}sub/"), b"")]),
            b"not a zip at all".to_vec(),
        ];
        for bytes in cases {
            let err = upload(&ingest, &bytes, "demo.org/sample", "v1.0.0").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArchive);
        }
        assert!(!dir.path().join("demo.org").exists());
    }

    #[test]
    fn upload_rejects_oversize_archives() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::new(dir.path());
        config.limits.max_archive_bytes = 64;
        let ingest = ArchiveIngest::local(&config);
        let err = upload(&ingest, &canonical(&[]), "demo.org/sample", "v1.0.0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArchive);

        let mut config = StoreConfig::new(dir.path());
        config.limits.max_unzipped_bytes = 16;
        let ingest = ArchiveIngest::local(&config);
        let err = upload(&ingest, &canonical(&[]), "demo.org/sample", "v1.0.0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArchive);
    }

    #[test]
    fn upload_validates_identifiers_first() {
        let (_dir, ingest, _) = setup();
        let bytes = canonical(&[]);
        assert_eq!(
            upload(&ingest, &bytes, "not a path", "v1.0.0").unwrap_err().kind(),
            ErrorKind::InvalidPath
        );
        assert_eq!(
            upload(&ingest, &bytes, "demo.org/sample", "1.0.0").unwrap_err().kind(),
            ErrorKind::InvalidVersion
        );
    }

    #[test]
    fn upload_rejects_build_metadata() {
        let (dir, ingest, store) = setup();
        let bytes = zip_bytes(&[("demo.org/sample@v1.0.0+a/main.go", b"package main\n")]);
        let err = upload(&ingest, &bytes, "demo.org/sample", "v1.0.0+a").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidVersion);
        assert!(!dir.path().join("demo.org").exists());

        upload(&ingest, &canonical(&[]), "demo.org/sample", "v1.0.0").unwrap();
        let err = upload(&ingest, &bytes, "demo.org/sample", "v1.0.0+b").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidVersion);
        let walk = store
            .walk("demo.org/sample", &CancellationToken::new())
            .unwrap();
        let versions: Vec<&str> = walk.modules.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, vec!["v1.0.0"]);
        assert_eq!(
            names(&dir.path().join("demo.org/sample/@v")),
            vec!["list", "v1.0.0.info", "v1.0.0.mod", "v1.0.0.zip"]
        );

        let loose = zip_bytes(&[("main.go", b"package main\n")]);
        let err = ingest
            .format(
                Cursor::new(loose),
                "demo.org/sample",
                "v1.0.0+b",
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidVersion);
    }

    #[test]
    fn upload_with_unbounded_limits() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::new(dir.path());
        config.limits = IngestLimits {
            max_archive_bytes: u64::MAX,
            max_unzipped_bytes: u64::MAX,
            max_manifest_bytes: u64::MAX,
            max_readme_bytes: u64::MAX,
        };
        let ingest = ArchiveIngest::local(&config);
        let bytes = canonical(&[("README.md", b"# Sample\n")]);
        let receipt = upload(&ingest, &bytes, "demo.org/sample", "v1.0.0").unwrap();
        assert!(receipt.has_readme);
    }

    /// Collects formatted log output for assertions.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn with_captured_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        let logs = String::from_utf8_lossy(&buffer.0.lock()).into_owned();
        (out, logs)
    }

    #[test]
    fn every_rejected_upload_is_logged() {
        let (dir, ingest, _) = setup();
        let cases: Vec<(Vec<u8>, ErrorKind)> = vec![
            (
                zip_bytes(&[(&format!("{PREFIX}go.mod"), b"module a b\n")]),
                ErrorKind::InvalidArchive,
            ),
            (
                zip_bytes(&[(&format!("{PREFIX}go.mod"), b"module example.com/other\n")]),
                ErrorKind::ModuleIdentityMismatch,
            ),
            (b"not a zip".to_vec(), ErrorKind::InvalidArchive),
            (
                zip_bytes(&[(&format!("{PREFIX}x/../y.go"), b"x")]),
                ErrorKind::InvalidArchive,
            ),
        ];
        for (bytes, kind) in cases {
            let (result, logs) =
                with_captured_logs(|| upload(&ingest, &bytes, "demo.org/sample", "v1.0.0"));
            assert_eq!(result.unwrap_err().kind(), kind);
            assert!(logs.contains("WARN"), "no warning in {logs:?}");
            assert!(logs.contains("rejected upload"), "no warning in {logs:?}");
        }
        assert!(!dir.path().join("demo.org").exists());
    }

    #[test]
    fn upload_conflicts_when_module_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::new(dir.path());
        config.lock_wait_ms = 10;
        let ingest = ArchiveIngest::local(&config);
        let slot = ingest.locks.slot("demo.org/sample");
        let _held = slot.lock();

        let err = upload(&ingest, &canonical(&[]), "demo.org/sample", "v1.0.0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!dir.path().join("demo.org/sample/@v/list").exists());
    }

    #[test]
    fn cancelled_upload_writes_nothing() {
        let (dir, ingest, _) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let bytes = canonical(&[]);
        let err = ingest
            .upload(&mut &bytes[..], "demo.org/sample", "v1.0.0", &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(!dir.path().join("demo.org").exists());
    }

    #[test]
    fn concurrent_uploads_keep_every_version() {
        let (dir, ingest, _) = setup();
        std::thread::scope(|scope| {
            for minor in 0..8 {
                let ingest = ingest.clone();
                scope.spawn(move || {
                    let version = format!("v1.{minor}.0");
                    let prefix = format!("demo.org/sample@{version}/");
                    let bytes = zip_bytes(&[(&format!("{prefix}main.go"), b"package main\n")]);
                    let cancel = CancellationToken::new();
                    // Retry on Conflict, as a caller would.
                    loop {
                        match ingest.upload(&mut &bytes[..], "demo.org/sample", &version, &cancel) {
                            Err(StoreError::Conflict { .. }) => continue,
                            other => break other.unwrap(),
                        };
                    }
                });
            }
        });
        let list = std::fs::read_to_string(dir.path().join("demo.org/sample/@v/list")).unwrap();
        let expected: String = (0..8).map(|m| format!("v1.{m}.0\n")).collect();
        assert_eq!(list, expected);
    }

    #[test]
    fn format_prefixes_entries_deterministically() {
        let (_dir, ingest, _) = setup();
        let input = zip_bytes(&[
            ("main.go", b"package main\n"),
            ("go.mod", b"module demo.org/sample\n"),
            ("pkg/", b""),
            ("pkg/util.go", b"package pkg\n"),
            (".git/HEAD", b"ref: main\n"),
            ("tools/go.mod", b"module demo.org/sample/tools\n"),
            ("tools/main.go", b"package main\n"),
        ]);
        let cancel = CancellationToken::new();
        let first = ingest
            .format(Cursor::new(input.clone()), "demo.org/sample", "v1.0.0", &cancel)
            .unwrap();
        let second = ingest
            .format(Cursor::new(input), "demo.org/sample", "v1.0.0", &cancel)
            .unwrap();
        assert_eq!(first, second);

        let mut out = ModuleArchive::new(Cursor::new(first)).unwrap();
        let names: Vec<String> = out.entries().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(
            names,
            vec![
                format!("{PREFIX}go.mod"),
                format!("{PREFIX}main.go"),
                format!("{PREFIX}pkg/util.go"),
            ]
        );
        assert_eq!(
            out.read_entry(&format!("{PREFIX}pkg/util.go"), 100).unwrap(),
            b"package pkg\n"
        );
    }

    #[test]
    fn format_strips_existing_canonical_prefix() {
        let (_dir, ingest, _) = setup();
        let once = ingest
            .format(
                Cursor::new(zip_bytes(&[("main.go", b"package main\n")])),
                "demo.org/sample",
                "v1.0.0",
                &CancellationToken::new(),
            )
            .unwrap();
        let twice = ingest
            .format(
                Cursor::new(once.clone()),
                "demo.org/sample",
                "v1.0.0",
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn format_rejects_mismatch_and_traversal() {
        let (_dir, ingest, _) = setup();
        let cancel = CancellationToken::new();
        let mismatch = zip_bytes(&[("go.mod", b"module example.com/foo\n")]);
        assert_eq!(
            ingest
                .format(Cursor::new(mismatch), "example.com/bar", "v1.0.0", &cancel)
                .unwrap_err()
                .kind(),
            ErrorKind::ModuleIdentityMismatch
        );
        let traversal = zip_bytes(&[("../evil.go", b"x")]);
        assert_eq!(
            ingest
                .format(Cursor::new(traversal), "demo.org/sample", "v1.0.0", &cancel)
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidArchive
        );
        assert_eq!(
            ingest
                .format(Cursor::new(zip_bytes(&[("a", b"")])), "demo.org/sample", "latest", &cancel)
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidVersion
        );
    }

    #[test]
    fn pack_dir_detects_module_path() {
        let (_dir, ingest, _) = setup();
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("go.mod"), "module demo.org/sample\n\ngo 1.22\n").unwrap();
        std::fs::create_dir_all(src.path().join("internal/x")).unwrap();
        std::fs::write(src.path().join("internal/x/x.go"), "package x\n").unwrap();
        std::fs::create_dir_all(src.path().join(".git")).unwrap();
        std::fs::write(src.path().join(".git/config"), "[core]\n").unwrap();

        let packed = ingest
            .pack_dir(src.path(), None, "v1.0.0", &CancellationToken::new())
            .unwrap();
        assert_eq!(packed.path, "demo.org/sample");
        let mut out = ModuleArchive::new(Cursor::new(packed.archive)).unwrap();
        let names: Vec<String> = out.entries().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(
            names,
            vec![format!("{PREFIX}go.mod"), format!("{PREFIX}internal/x/x.go")]
        );
    }

    #[test]
    fn pack_dir_without_manifest_needs_path() {
        let (_dir, ingest, _) = setup();
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("main.go"), "package main\n").unwrap();
        let cancel = CancellationToken::new();
        assert_eq!(
            ingest
                .pack_dir(src.path(), None, "v1.0.0", &cancel)
                .unwrap_err()
                .kind(),
            ErrorKind::InvalidPath
        );
        let packed = ingest
            .pack_dir(src.path(), Some("demo.org/sample"), "v1.0.0", &cancel)
            .unwrap();
        assert_eq!(packed.version, "v1.0.0");
    }
}
