//! Write-side commands: sniff, upload, format, pack.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use modvault_store::{ArchiveIngest, CancellationToken, StoreConfig};

use super::{print_json, write_output};
use crate::require_root;

fn open_archive(archive: &Path) -> Result<File> {
    File::open(archive).with_context(|| format!("opening {}", archive.display()))
}

/// Run `modvault sniff ARCHIVE`.
pub fn sniff(archive: &Path) -> Result<()> {
    let file = open_archive(archive)?;
    print_json(&ArchiveIngest::sniff(file))
}

/// Run `modvault upload ARCHIVE [--path P] [--version V]`.
///
/// Missing identifiers are filled in from [`ArchiveIngest::sniff`]; the
/// upload itself still validates them.
pub fn upload(
    config: &StoreConfig,
    archive: &Path,
    path: Option<&str>,
    version: Option<&str>,
) -> Result<()> {
    require_root(config)?;
    let mut file = open_archive(archive)?;

    let (path, version) = match (path, version) {
        (Some(p), Some(v)) => (p.to_string(), v.to_string()),
        (path, version) => {
            let guess = ArchiveIngest::sniff(&mut file);
            file.seek(SeekFrom::Start(0))?;
            let path = path.map(str::to_string).or(guess.path);
            let version = version.map(str::to_string).or(guess.version);
            match (path, version) {
                (Some(p), Some(v)) => {
                    tracing::info!(module = %p, version = %v, "using sniffed module identity");
                    (p, v)
                }
                _ => bail!(
                    "cannot tell which module {} holds; pass --path and --version",
                    archive.display()
                ),
            }
        }
    };

    let ingest = ArchiveIngest::local(config);
    let receipt = ingest.upload(&mut file, &path, &version, &CancellationToken::new())?;
    print_json(&receipt)
}

/// Run `modvault format ARCHIVE --path P --version V [-o OUT]`.
pub fn format(
    config: &StoreConfig,
    archive: &Path,
    path: &str,
    version: &str,
    output: Option<&Path>,
) -> Result<()> {
    let file = open_archive(archive)?;
    let ingest = ArchiveIngest::local(config);
    let canonical = ingest.format(file, path, version, &CancellationToken::new())?;
    write_output(output, &canonical)
}

/// Run `modvault pack DIR --version V [--path P] [-o OUT]`.
pub fn pack(
    config: &StoreConfig,
    dir: &Path,
    path: Option<&str>,
    version: &str,
    output: &Path,
) -> Result<()> {
    if !dir.is_dir() {
        bail!("source directory {} does not exist", dir.display());
    }
    let version = normalize_version(version);
    let ingest = ArchiveIngest::local(config);
    let packed = ingest.pack_dir(dir, path, &version, &CancellationToken::new())?;
    if path.is_none() {
        eprintln!("detected module path: {}", packed.path);
    }

    let output = zip_output_name(output);
    write_output(Some(&output), &packed.archive)?;
    eprintln!(
        "packed {}@{} into {}",
        packed.path,
        packed.version,
        output.display()
    );
    Ok(())
}

/// Accept `1.2.3` for `v1.2.3`.
fn normalize_version(version: &str) -> String {
    if version.starts_with('v') {
        version.to_string()
    } else {
        format!("v{version}")
    }
}

/// Give the output a `.zip` extension unless it already has one.
fn zip_output_name(output: &Path) -> PathBuf {
    let is_zip = output
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
    if is_zip {
        output.to_path_buf()
    } else {
        let mut name = output.as_os_str().to_owned();
        name.push(".zip");
        PathBuf::from(name)
    }
}
