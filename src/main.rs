//! patchup CLI entry point
//!
//! Parses the command line, runs the subcommand and renders any error with a
//! suggestion before exiting with status 1.

use anyhow::Result;
use clap::Parser;
use patchup::cli;
use patchup::core::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            user_friendly_error(e).display();
            std::process::exit(1);
        }
    }
}
