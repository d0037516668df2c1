//! modvault CLI: browse and publish modules in a module-proxy store.

mod commands;

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use modvault_store::{ErrorBody, ErrorKind, StoreConfig, StoreError};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "modvault", version, about = "Module-proxy artifact store")]
struct Cli {
    /// Store configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Store root directory (overrides the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Print errors as JSON objects with a kind and a message
    #[arg(long, global = true)]
    json_errors: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List children of a path prefix, and versions if it is a module
    Walk {
        /// Module path prefix (store root if omitted)
        #[arg(default_value = "")]
        path: String,
    },
    /// List the canonical files of a module version
    Stat {
        /// Module path
        path: String,
        /// Version, e.g. v1.2.3
        version: String,
    },
    /// Copy one canonical file, e.g. v1.2.3.zip, to stdout or a file
    Open {
        /// Module path
        path: String,
        /// Canonical file name
        filename: String,
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Guess the module path and version an archive was built for
    Sniff {
        /// Zip archive
        archive: PathBuf,
    },
    /// Validate and publish a canonical archive
    Upload {
        /// Zip archive
        archive: PathBuf,
        /// Module path (sniffed from the archive if omitted)
        #[arg(long)]
        path: Option<String>,
        /// Version (sniffed from the archive if omitted)
        #[arg(long)]
        version: Option<String>,
    },
    /// Repackage an arbitrary archive into canonical form
    Format {
        /// Zip archive
        archive: PathBuf,
        /// Module path
        #[arg(long)]
        path: String,
        /// Version
        #[arg(long)]
        version: String,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Build a canonical archive from a source directory
    Pack {
        /// Source directory
        dir: PathBuf,
        /// Version; a missing leading `v` is added
        #[arg(long)]
        version: String,
        /// Module path (read from the directory's go.mod if omitted)
        #[arg(long)]
        path: Option<String>,
        /// Output file
        #[arg(short, long, default_value = "go.src.zip")]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let json_errors = cli.json_errors;
    if let Err(e) = run(cli) {
        if json_errors {
            let body = error_body(&e);
            match serde_json::to_string(&body) {
                Ok(json) => eprintln!("{json}"),
                Err(_) => eprintln!("error: {e:#}"),
            }
        } else {
            eprintln!("error: {e:#}");
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref(), cli.root)?;

    match cli.command {
        Commands::Walk { path } => commands::browse::walk(&config, &path),
        Commands::Stat { path, version } => commands::browse::stat(&config, &path, &version),
        Commands::Open {
            path,
            filename,
            output,
        } => commands::browse::open(&config, &path, &filename, output.as_deref()),
        Commands::Sniff { archive } => commands::publish::sniff(&archive),
        Commands::Upload {
            archive,
            path,
            version,
        } => commands::publish::upload(&config, &archive, path.as_deref(), version.as_deref()),
        Commands::Format {
            archive,
            path,
            version,
            output,
        } => commands::publish::format(&config, &archive, &path, &version, output.as_deref()),
        Commands::Pack {
            dir,
            version,
            path,
            output,
        } => commands::publish::pack(&config, &dir, path.as_deref(), &version, &output),
    }
}

/// Log to stderr. `RUST_LOG` wins; otherwise `-v` flags pick the level.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Load `--config` if given, then apply `--root`. Without either the root
/// stays empty and only archive-level commands can run.
fn load_config(path: Option<&Path>, root: Option<PathBuf>) -> anyhow::Result<StoreConfig> {
    let mut config = match path {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::new(PathBuf::new()),
    };
    if let Some(root) = root {
        config.root = root;
    }
    Ok(config)
}

/// Fail unless a store root was configured.
pub(crate) fn require_root(config: &StoreConfig) -> anyhow::Result<()> {
    if config.root.as_os_str().is_empty() {
        bail!("no store root configured: pass --root or --config");
    }
    Ok(())
}

/// Structured form of a CLI failure. Store errors keep their own kind;
/// anything else is a problem with the invocation.
fn error_body(err: &anyhow::Error) -> ErrorBody {
    match err.downcast_ref::<StoreError>() {
        Some(store) => store.to_body(),
        None => ErrorBody {
            kind: ErrorKind::InvalidRequest,
            message: format!("{err:#}"),
        },
    }
}
