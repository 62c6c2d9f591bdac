//! Boxforge CLI entry point
//!
//! Parses the command line, sets up logging, and dispatches to the
//! subcommand implementations. Errors are rendered through the
//! user-friendly error context before the process exits nonzero.

use anyhow::Result;
use boxforge::cli;
use boxforge::core::error::user_friendly_error;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            let ctx = user_friendly_error(e);
            ctx.display();
            std::process::exit(1);
        }
    }
}
