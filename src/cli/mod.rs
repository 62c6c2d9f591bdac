//! Command-line interface for boxforge
//!
//! Each command lives in its own module with its own argument struct and an
//! async `execute()`. The top-level [`Cli`] carries the global flags and
//! dispatches.
//!
//! # Usage
//!
//! ```bash
//! # Generate plans for named builds
//! boxforge build 1404-amd64-server 1204-amd64-desktop
//!
//! # Generate a one-off plan from distro defaults
//! boxforge build --distro ubuntu
//!
//! # Override pieces of the distro defaults
//! boxforge build --distro ubuntu --release 12.04 --arch i386
//! ```
//!
//! Exit codes: `0` on success, `1` when any build fails, `-1` when the
//! environment (the `BOXFORGE_*` variables and the files they point at)
//! cannot be set up.

pub mod build;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Top-level CLI for boxforge.
#[derive(Parser)]
#[command(
    name = "boxforge",
    about = "Generate Packer build plans from layered build configurations",
    version,
    author
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output (equivalent to RUST_LOG=debug).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Generate Packer build plans from named builds or distro defaults.
    Build(build::BuildCommand),
}

impl Cli {
    /// Sets up logging and runs the selected command.
    pub async fn execute(self) -> Result<()> {
        let log_dir = match &self.command {
            Commands::Build(cmd) => cmd.log_dir(),
        };
        init_logging(self.verbose, self.quiet, log_dir.as_deref());
        match self.command {
            Commands::Build(cmd) => cmd.execute().await,
        }
    }
}

/// Initializes the process-wide tracing subscriber. The subscriber is the
/// only shared logging sink; it is installed exactly once.
fn init_logging(verbose: bool, quiet: bool, log_dir: Option<&std::path::Path>) {
    use tracing_subscriber::EnvFilter;

    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("boxforge={default_level}")));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match log_dir.and_then(open_log_file) {
        Some(file) => {
            builder
                .with_writer(std::sync::Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            builder.with_writer(std::io::stderr).init();
        }
    }
}

fn open_log_file(dir: &std::path::Path) -> Option<std::fs::File> {
    if std::fs::create_dir_all(dir).is_err() {
        return None;
    }
    let name = format!("boxforge-{}.log", chrono::Local::now().format("%Y%m%d"));
    std::fs::File::options()
        .create(true)
        .append(true)
        .open(dir.join(name))
        .ok()
}

/// Returns the log dir selected by flag or environment, if any.
pub(crate) fn env_log_dir() -> Option<PathBuf> {
    std::env::var(crate::config::ENV_LOG_DIR).ok().map(PathBuf::from)
}
