//! `patchup pending`

use crate::config::PatchConfig;
use crate::patch::{PatchUpdateController, PendingUpdateLedger};
use anyhow::Result;
use clap::Parser;
use colored::Colorize;

/// Report whether a staged update is waiting for a restart.
#[derive(Parser, Debug)]
pub struct PendingCommand {}

impl PendingCommand {
    pub async fn execute(self, config: PatchConfig) -> Result<()> {
        let ledger = PendingUpdateLedger::new(config.ledger_path());
        let controller = PatchUpdateController::new(config)?;

        if !controller.has_pending_updates() {
            println!("no");
            return Ok(());
        }

        println!("yes");
        match ledger.read().await {
            Ok(pending) => {
                println!(
                    "{}",
                    format!(
                        "Version {} staged at {} ({} component(s))",
                        pending.version,
                        pending.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        pending.updates.len()
                    )
                    .cyan()
                );
                for component in &pending.updates {
                    println!("  {} -> {}", component.name.bold(), component.dest_path.display());
                }
            }
            Err(e) => println!("{}", format!("Pending update is unreadable: {e:#}").yellow()),
        }
        Ok(())
    }
}
