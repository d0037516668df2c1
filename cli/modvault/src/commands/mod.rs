//! CLI command implementations.

pub mod browse;
pub mod publish;

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

/// Pretty-print a response structure as JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

/// Write bytes to `output`, or to stdout when it is `None`.
pub(crate) fn write_output(output: Option<&Path>, data: &[u8]) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(data)?;
            stdout.flush()?;
            Ok(())
        }
    }
}
