//! `patchup apply`

use crate::cli::check::render_check;
use crate::config::PatchConfig;
use crate::patch::{BatchOutcome, PatchUpdateController};
use crate::utils::progress::spawn_progress_renderer;
use anyhow::{Result, bail};
use clap::Parser;
use colored::Colorize;
use serde::Serialize;

/// Check for an update and, if one is available, download and stage it.
#[derive(Parser, Debug)]
pub struct ApplyCommand {
    /// Print the check and batch results as JSON (implies no progress bar)
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct ApplyReport<'a> {
    check: &'a crate::patch::UpdateCheck,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<&'a BatchOutcome>,
}

impl ApplyCommand {
    pub async fn execute(self, config: PatchConfig) -> Result<()> {
        let controller = PatchUpdateController::new(config)?;
        let check = controller.check_for_patch_update().await;

        if !check.available {
            if self.json {
                let report = ApplyReport {
                    check: &check,
                    outcome: None,
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            return render_check(&check);
        }

        let outcome = if self.json {
            controller.apply_patch_update(&check.updates, None).await
        } else {
            println!(
                "{}",
                format!(
                    "Downloading {} component(s) for {}...",
                    check.updates.len(),
                    check.version.as_deref().unwrap_or("?")
                )
                .cyan()
            );
            let (tx, renderer) = spawn_progress_renderer(check.total_size);
            let outcome = controller.apply_patch_update(&check.updates, Some(tx)).await;
            // The sender went away with the batch, so the renderer is finishing.
            let _ = renderer.await;
            outcome
        };

        if self.json {
            let report = ApplyReport {
                check: &check,
                outcome: Some(&outcome),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            render_outcome(&outcome);
        }

        if !outcome.failed.is_empty() {
            bail!("{} component(s) could not be staged", outcome.failed.len());
        }
        Ok(())
    }
}

fn render_outcome(outcome: &BatchOutcome) {
    for name in &outcome.success {
        println!("  {} {}", "✓".green(), name);
    }
    for failure in &outcome.failed {
        println!("  {} {}: {}", "✗".red(), failure.name, failure.error);
    }
    if outcome.needs_restart {
        println!("{}", "Update staged. Restart the application to apply it.".green());
    } else if !outcome.failed.is_empty() {
        println!("{}", "Nothing was staged; the update will be retried on the next check.".yellow());
    }
}
