//! `patchup apply-pending`
//!
//! Meant to run first thing at application startup. A staged update that
//! replaces this very executable is handed to the external swap script, which
//! finishes the job after this process exits. The relaunched process records
//! what the script installed the next time this command runs.

use crate::config::PatchConfig;
use crate::patch::PatchUpdateController;
use anyhow::{Context, Result, bail};
use clap::Parser;
use colored::Colorize;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::info;

/// Swap a staged update into place.
#[derive(Parser, Debug)]
pub struct ApplyPendingCommand {
    /// Always use the external swap script
    #[arg(long)]
    external: bool,
}

impl ApplyPendingCommand {
    pub async fn execute(self, config: PatchConfig) -> Result<()> {
        let controller = PatchUpdateController::new(config)?;

        if controller.record_external_swap().await {
            println!("{}", "Recorded update applied by the swap script".green());
        }

        if !controller.has_pending_updates() {
            println!("No pending update");
            return Ok(());
        }

        if self.external || controller.needs_external_swap().await {
            let Some(script) = controller.create_swap_script().await else {
                bail!("Could not create the swap script");
            };
            spawn_detached(&script)?;
            println!(
                "{}",
                format!("Handing the update to {}; it runs after exit", script.display()).cyan()
            );
            return Ok(());
        }

        if controller.apply_pending_updates().await {
            println!("{}", "Pending update applied".green());
        } else {
            println!("{}", "Pending update could not be applied; it has been discarded".yellow());
        }
        Ok(())
    }
}

fn spawn_detached(script: &Path) -> Result<()> {
    let mut command = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(script);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg(script);
        c
    };
    command.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command
        .spawn()
        .with_context(|| format!("Failed to launch {}", script.display()))?;
    info!("Swap script running as pid {}", child.id());
    Ok(())
}
