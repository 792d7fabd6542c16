//! patchup - component-level patch updates for installed applications
//!
//! patchup keeps an installed application current by replacing only the
//! components whose content changed, instead of shipping a full installer for
//! every release. Updates are downloaded and verified ahead of time and
//! swapped into place at the next start, so a crash or power loss at any point
//! leaves the installation either fully old or fully new per component.
//!
//! # Architecture Overview
//!
//! - A remote JSON **manifest** lists every component with its SHA-256 digest,
//!   size and download URL, plus the oldest version that can be patched
//! - A per-user **local state** file records what is installed
//! - Changed components are **staged** and verified; only a complete batch is
//!   recorded in the **pending-update ledger**
//! - At startup the ledger is **swapped** in with per-file backups
//!
//! # Core Modules
//!
//! - [`patch`] - The update engine and [`patch::PatchUpdateController`]
//! - [`config`] - `config.toml` handling
//! - [`core`] - Error types and user-facing error rendering
//! - [`version`] - `YY.MMDD.HHMM`-style release version ordering
//! - [`utils`] - Atomic file writes and progress bars
//! - [`cli`] - The `patchup` command line
//!
//! # Example
//!
//! ```rust,no_run
//! use patchup::config::PatchConfig;
//! use patchup::patch::PatchUpdateController;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let controller = PatchUpdateController::new(PatchConfig::load().await?)?;
//! let check = controller.check_for_patch_update().await;
//! println!("update available: {}", check.available);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod patch;
pub mod utils;
pub mod version;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
