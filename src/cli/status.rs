//! `patchup status`

use crate::cli::format_bytes;
use crate::config::PatchConfig;
use crate::patch::PatchUpdateController;
use anyhow::Result;
use clap::Parser;
use colored::Colorize;

/// Show the recorded local component state.
#[derive(Parser, Debug)]
pub struct StatusCommand {
    /// Print the state as JSON
    #[arg(long)]
    json: bool,
}

impl StatusCommand {
    pub async fn execute(self, config: PatchConfig) -> Result<()> {
        let controller = PatchUpdateController::new(config)?;
        let state = controller.local_state().await;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&state)?);
            return Ok(());
        }

        println!("{} {}", "Version:".bold(), state.version);
        println!("{} {}", "Installed:".bold(), state.installed_at.format("%Y-%m-%d %H:%M:%S UTC"));
        match state.last_update {
            Some(at) => println!("{} {}", "Last update:".bold(), at.format("%Y-%m-%d %H:%M:%S UTC")),
            None => println!("{} never", "Last update:".bold()),
        }
        if controller.has_pending_updates() {
            println!("{}", "A staged update is waiting for a restart".yellow());
        }

        if state.components.is_empty() {
            println!("\nNo components recorded");
            return Ok(());
        }

        println!("\n{:<32} {:<16} {:>10}  {}", "COMPONENT", "VERSION", "SIZE", "DIGEST");
        println!("{}", "─".repeat(80));
        for (name, record) in &state.components {
            let digest = record.digest.get(..12).unwrap_or(&record.digest);
            println!(
                "{:<32} {:<16} {:>10}  {}",
                name,
                record.version.as_deref().unwrap_or("-"),
                format_bytes(record.size),
                digest.dimmed()
            );
        }
        Ok(())
    }
}
