//! Command-line interface for patchup.
//!
//! # Available Commands
//!
//! - `check` - Compare the installation against the remote manifest
//! - `apply` - Download and stage an available update
//! - `pending` - Report whether a staged update is waiting
//! - `apply-pending` - Swap a staged update into place (run at startup)
//! - `swap-script` - Write the external swap script for a staged update
//! - `status` - Show the recorded local component state
//!
//! # Typical Flow
//!
//! ```bash
//! # Host application startup
//! patchup apply-pending
//!
//! # Later, in the background
//! patchup check
//! patchup apply --no-progress
//! ```
//!
//! Global flags (`--verbose`, `--quiet`, `--no-progress`, `--config`) work with
//! every subcommand.

mod apply;
mod apply_pending;
mod check;
mod pending;
mod status;
mod swap_script;

use crate::config::PatchConfig;
use crate::utils::progress::NO_PROGRESS_ENV;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Settings derived from the global flags.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter; `None` defers to `RUST_LOG`, then `info`
    pub log_level: Option<String>,
    /// Hide progress bars
    pub no_progress: bool,
    /// Explicit config file
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    /// Empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Export settings read by lower layers through the environment.
    pub fn apply_to_env(&self) {
        if self.no_progress {
            // SAFETY: runs once during startup, before any task reads the
            // environment.
            unsafe {
                std::env::set_var(NO_PROGRESS_ENV, "1");
            }
        }
    }

    /// Install the global tracing subscriber on stderr.
    pub fn init_logging(&self) {
        let filter = match &self.log_level {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}

/// Component patch updater.
#[derive(Parser)]
#[command(
    name = "patchup",
    about = "Component-level patch updates with staged downloads and deferred swaps",
    version,
    long_about = "patchup compares an installation against a remote manifest, downloads \
                  changed components into a staging area, verifies them, and swaps them \
                  into place on the next start."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the config file (default: `<config_dir>/patchup/config.toml`)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Disable progress bars (also `PATCHUP_NO_PROGRESS`)
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the remote manifest for a patch update
    Check(check::CheckCommand),

    /// Download and stage an available patch update
    Apply(apply::ApplyCommand),

    /// Report whether a staged update is waiting for a restart
    Pending(pending::PendingCommand),

    /// Swap a staged update into place
    #[command(name = "apply-pending")]
    ApplyPending(apply_pending::ApplyPendingCommand),

    /// Write the external swap script for a staged update
    #[command(name = "swap-script")]
    SwapScript(swap_script::SwapScriptCommand),

    /// Show the recorded local component state
    Status(status::StatusCommand),
}

impl Cli {
    /// Set up logging, load the config file and run the subcommand.
    pub async fn execute(self) -> Result<()> {
        let cli_config = self.build_config();
        cli_config.init_logging();
        cli_config.apply_to_env();

        let config = PatchConfig::load_with_optional(cli_config.config_path.clone()).await?;

        match self.command {
            Commands::Check(cmd) => cmd.execute(config).await,
            Commands::Apply(cmd) => cmd.execute(config).await,
            Commands::Pending(cmd) => cmd.execute(config).await,
            Commands::ApplyPending(cmd) => cmd.execute(config).await,
            Commands::SwapScript(cmd) => cmd.execute(config).await,
            Commands::Status(cmd) => cmd.execute(config).await,
        }
    }

    /// Translate the global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            Some("error".to_string())
        } else {
            None
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress,
            config_path: self.config.clone(),
        }
    }
}

/// `1536` -> `1.5 KiB`.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
