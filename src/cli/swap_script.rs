//! `patchup swap-script`

use crate::config::PatchConfig;
use crate::patch::PatchUpdateController;
use anyhow::Result;
use clap::Parser;

/// Write the external swap script for a staged update and print its path.
#[derive(Parser, Debug)]
pub struct SwapScriptCommand {}

impl SwapScriptCommand {
    pub async fn execute(self, config: PatchConfig) -> Result<()> {
        let controller = PatchUpdateController::new(config)?;
        match controller.create_swap_script().await {
            Some(path) => println!("{}", path.display()),
            None if controller.has_pending_updates() => {
                anyhow::bail!(
                    "Could not write the swap script to {}",
                    controller.swap_script_path().display()
                );
            }
            None => println!("No pending update"),
        }
        Ok(())
    }
}
