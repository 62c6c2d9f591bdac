//! The `build` subcommand.
//!
//! Generates Packer build plans. At minimum the command needs either
//! `--distro` or one or more build names. With `--distro`, the plan is
//! generated from the distribution's defaults, selectively overridden by
//! `--arch`, `--image`, and `--release`; named builds come from the builds
//! file, and a name matching a build list expands to every build in the
//! list.

use crate::build::{build_templates, BuildFilter};
use crate::config::AppConfig;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

/// Arguments for `boxforge build`.
#[derive(Args, Debug)]
pub struct BuildCommand {
    /// Generate a plan for this distribution using its defaults.
    ///
    /// The distribution must exist in the supported-distros file. Without
    /// this flag, at least one build name is required.
    #[arg(long)]
    distro: Option<String>,

    /// Architecture override, e.g. "amd64" or "x86_64"; only meaningful
    /// with --distro.
    #[arg(long)]
    arch: Option<String>,

    /// Image-type override, e.g. "server" or "minimal"; only meaningful
    /// with --distro.
    #[arg(long)]
    image: Option<String>,

    /// Release override, e.g. "14.04"; only meaningful with --distro.
    #[arg(long)]
    release: Option<String>,

    /// Example mode: emit plans whose resource references are not checked
    /// against the source tree and schedule no copies.
    #[arg(long)]
    example: bool,

    /// Directory log files are written into; overrides BOXFORGE_LOG_DIR.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Named builds (or build lists) to generate.
    #[arg(value_name = "BUILD")]
    names: Vec<String>,
}

impl BuildCommand {
    /// The log directory selected by flag or environment.
    pub(crate) fn log_dir(&self) -> Option<PathBuf> {
        self.log_dir.clone().or_else(super::env_log_dir)
    }

    /// Runs the selected builds. Environment-setup failures exit with -1;
    /// build failures surface as an error so the process exits 1.
    pub async fn execute(self) -> Result<()> {
        let conf = match AppConfig::from_env() {
            Ok(conf) => conf,
            Err(e) => {
                let ctx = crate::core::error::user_friendly_error(e.into());
                ctx.display();
                std::process::exit(-1);
            }
        };
        let filter = BuildFilter {
            distro: self.distro.clone(),
            arch: self.arch.clone(),
            image: self.image.clone(),
            release: self.release.clone(),
            example: self.example,
        };
        let outcomes = build_templates(&conf, &filter, &self.names).await?;
        let failed: Vec<&crate::build::BuildOutcome> =
            outcomes.iter().filter(|o| o.result.is_err()).collect();
        for outcome in &outcomes {
            match &outcome.result {
                Ok(path) => println!("{}: {}", outcome.name, path.display()),
                Err(e) => eprintln!("{}: failed: {e}", outcome.name),
            }
        }
        if !failed.is_empty() {
            anyhow::bail!("{} of {} builds failed", failed.len(), outcomes.len());
        }
        Ok(())
    }
}
