//! Component-level patch updates.
//!
//! An installation is a set of named components (resource bundles, tool
//! packs, ...), each identified by the SHA-256 of its bytes. Updating works in
//! two phases separated by a restart:
//!
//! 1. **Stage.** [`ManifestFetcher`] fetches the remote manifest,
//!    [`LocalStateStore`] supplies what is installed, [`diff`] picks the
//!    components whose digest changed, and [`StagedDownloader`] downloads and
//!    verifies them into a staging directory. Only a fully verified batch is
//!    recorded in the [`PendingUpdateLedger`].
//! 2. **Swap.** On the next start, before anything opens the component files,
//!    [`SwapApplier`] re-verifies each staged file and replaces its destination
//!    with a backup to fall back on. Files held open by the running process
//!    itself are swapped by a script from [`SwapScriptGenerator`] after the
//!    process exits.
//!
//! [`PatchUpdateController`] ties the pieces together for a host application.
//!
//! # Files
//!
//! Everything patchup writes lives in the per-user data directory, never in
//! the installation tree:
//!
//! ```text
//! <data_dir>/
//! ├── local-state.json      # installed component digests and version
//! ├── pending-update.json   # present only while an update is staged
//! ├── staging/              # downloaded, verified component files
//! └── apply-update.sh       # external swap script (.cmd on Windows)
//! ```

pub mod backup;
pub mod controller;
pub mod diff;
pub mod download;
pub mod hasher;
pub mod ledger;
pub mod manifest;
pub mod state;
pub mod swap;
pub mod swap_script;

pub use backup::BackupManager;
pub use controller::PatchUpdateController;
pub use diff::{ComponentUpdate, UpdateCheck, UpdateReason, diff};
pub use download::{BatchOutcome, ComponentFailure, DownloadProgress, StagedDownloader};
pub use hasher::ContentHasher;
pub use ledger::{PendingComponent, PendingUpdate, PendingUpdateLedger};
pub use manifest::{Manifest, ManifestComponent, ManifestFetcher};
pub use state::{ComponentRecord, LocalState, LocalStateStore};
pub use swap::SwapApplier;
pub use swap_script::{ScriptFlavor, SwapScriptGenerator};
