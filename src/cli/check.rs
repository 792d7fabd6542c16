//! `patchup check`

use crate::cli::format_bytes;
use crate::config::PatchConfig;
use crate::patch::{PatchUpdateController, UpdateCheck, UpdateReason};
use anyhow::{Result, bail};
use clap::Parser;
use colored::Colorize;

/// Compare the installation against the remote manifest.
#[derive(Parser, Debug)]
pub struct CheckCommand {
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

impl CheckCommand {
    pub async fn execute(self, config: PatchConfig) -> Result<()> {
        let controller = PatchUpdateController::new(config)?;
        let check = controller.check_for_patch_update().await;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&check)?);
            return Ok(());
        }

        render_check(&check)
    }
}

/// Print a human-readable summary; fails for [`UpdateReason::Error`].
pub(crate) fn render_check(check: &UpdateCheck) -> Result<()> {
    if check.available {
        println!(
            "{}",
            format!(
                "Patch update {} available ({} component(s), {})",
                check.version.as_deref().unwrap_or("?"),
                check.updates.len(),
                format_bytes(check.total_size)
            )
            .green()
        );
        for update in &check.updates {
            let marker = if update.is_new { "new" } else { "changed" };
            println!("  {} {} ({})", update.name.bold(), format_bytes(update.size), marker.dimmed());
        }
        if let Some(notes) = &check.release_notes {
            println!("\n{}\n{}", "Release notes:".bold(), notes);
        }
        return Ok(());
    }

    match check.reason {
        Some(UpdateReason::UpToDate) => {
            println!("{}", "Installation is up to date".green());
        }
        Some(UpdateReason::NoChanges) => {
            println!(
                "{}",
                format!(
                    "Version {} changes no installed components",
                    check.version.as_deref().unwrap_or("?")
                )
                .green()
            );
        }
        Some(UpdateReason::VersionTooOld) => {
            println!(
                "{}",
                format!(
                    "Installed version is too old to patch to {}; install the full release instead",
                    check.version.as_deref().unwrap_or("?")
                )
                .yellow()
            );
        }
        Some(UpdateReason::NoManifest) => {
            println!("{}", "The update server does not offer patch updates".yellow());
        }
        Some(UpdateReason::Error) | None => {
            bail!(
                "Patch update check failed: {}",
                check.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    Ok(())
}
