//! Read-side commands: walk, stat, open.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use modvault_store::{CancellationToken, ModuleStore, StoreConfig};

use super::print_json;
use crate::require_root;

fn open_store(config: &StoreConfig) -> Result<ModuleStore> {
    require_root(config)?;
    Ok(ModuleStore::local(config.root.clone()))
}

/// Run `modvault walk [PATH]`.
pub fn walk(config: &StoreConfig, path: &str) -> Result<()> {
    let store = open_store(config)?;
    let result = store.walk(path, &CancellationToken::new())?;
    print_json(&result)
}

/// Run `modvault stat PATH VERSION`.
pub fn stat(config: &StoreConfig, path: &str, version: &str) -> Result<()> {
    let store = open_store(config)?;
    let files = store.stat(path, version, &CancellationToken::new())?;
    print_json(&files)
}

/// Run `modvault open PATH FILENAME [-o OUT]`.
pub fn open(config: &StoreConfig, path: &str, filename: &str, output: Option<&Path>) -> Result<()> {
    let store = open_store(config)?;
    let mut reader = store.open(path, filename, &CancellationToken::new())?;
    match output {
        Some(out) => {
            let mut file =
                File::create(out).with_context(|| format!("creating {}", out.display()))?;
            io::copy(&mut reader, &mut file)?;
            file.flush()?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            io::copy(&mut reader, &mut stdout)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
