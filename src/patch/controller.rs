//! The host-facing patch update controller.
//!
//! [`PatchUpdateController`] owns one instance of every engine piece for a
//! single installation and exposes the operations a host application calls:
//!
//! | Operation | Result |
//! |---|---|
//! | [`check_for_patch_update`](PatchUpdateController::check_for_patch_update) | [`UpdateCheck`] |
//! | [`apply_patch_update`](PatchUpdateController::apply_patch_update) | [`BatchOutcome`] |
//! | [`has_pending_updates`](PatchUpdateController::has_pending_updates) | `bool` |
//! | [`apply_pending_updates`](PatchUpdateController::apply_pending_updates) | `bool` |
//! | [`create_swap_script`](PatchUpdateController::create_swap_script) | `Option<PathBuf>` |
//! | [`swap_script_path`](PatchUpdateController::swap_script_path) | `PathBuf` |
//!
//! None of them returns an error. Failures are logged and folded into the
//! structured result, so a broken update server or a full disk can never take
//! the host application down with it.
//!
//! # Example
//!
//! ```rust,no_run
//! use patchup::config::PatchConfig;
//! use patchup::patch::PatchUpdateController;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let controller = PatchUpdateController::new(PatchConfig::load().await?)?;
//!
//! // Early in boot
//! if controller.apply_pending_updates().await {
//!     println!("Update applied");
//! }
//!
//! let check = controller.check_for_patch_update().await;
//! if check.available {
//!     let outcome = controller.apply_patch_update(&check.updates, None).await;
//!     if outcome.needs_restart {
//!         println!("Restart to finish updating");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::PatchConfig;
use crate::core::PatchError;
use crate::patch::diff::{ComponentUpdate, UpdateCheck, UpdateReason, diff};
use crate::patch::download::{BatchOutcome, DownloadProgress, StagedDownloader};
use crate::patch::ledger::PendingUpdateLedger;
use crate::patch::manifest::ManifestFetcher;
use crate::patch::state::{LocalState, LocalStateStore};
use crate::patch::swap::SwapApplier;
use crate::patch::swap_script::SwapScriptGenerator;
use crate::version::ReleaseVersion;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("patchup/", env!("CARGO_PKG_VERSION"));

/// Clears the batch flag when the batch ends, however it ends.
struct BatchGuard<'a>(&'a AtomicBool);

impl<'a> BatchGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives the patch update lifecycle of one installation.
pub struct PatchUpdateController {
    config: PatchConfig,
    store: LocalStateStore,
    fetcher: ManifestFetcher,
    downloader: StagedDownloader,
    ledger: PendingUpdateLedger,
    applier: SwapApplier,
    scripts: SwapScriptGenerator,
    batch_running: AtomicBool,
    checked_version: Mutex<Option<String>>,
}

impl PatchUpdateController {
    /// Controller for the installation described by `config`.
    ///
    /// # Errors
    ///
    /// Fails only if the HTTP client cannot be constructed (e.g. no TLS
    /// backend is available).
    pub fn new(config: PatchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        let store = LocalStateStore::from_config(&config);
        let ledger = PendingUpdateLedger::new(config.ledger_path());
        let staging_dir = config.staging_dir();

        Ok(Self {
            fetcher: ManifestFetcher::new(client.clone(), config.manifest_timeout()),
            downloader: StagedDownloader::new(client, config.clone()),
            applier: SwapApplier::new(ledger.clone(), store.clone(), staging_dir.clone()),
            scripts: SwapScriptGenerator::new(
                ledger.clone(),
                staging_dir,
                config.data_dir(),
                config.relaunch_executable(),
            ),
            store,
            ledger,
            config,
            batch_running: AtomicBool::new(false),
            checked_version: Mutex::new(None),
        })
    }

    /// Configuration this controller was built from.
    pub fn config(&self) -> &PatchConfig {
        &self.config
    }

    /// Compare the installed components against the remote manifest.
    ///
    /// A missing manifest yields [`UpdateReason::NoManifest`]; any fetch or
    /// configuration failure yields [`UpdateReason::Error`] with a message.
    pub async fn check_for_patch_update(&self) -> UpdateCheck {
        match self.check().await {
            Ok(check) => check,
            Err(e) => {
                warn!("Patch update check failed: {:#}", e);
                UpdateCheck::failed(format!("{e:#}"))
            }
        }
    }

    async fn check(&self) -> Result<UpdateCheck> {
        let url = self.config.require_manifest_url()?;
        if self.ledger.exists() {
            warn!("A staged update is still waiting to be applied; local state may be stale");
        }

        self.applier.record_external_swap().await;

        let Some(manifest) = self.fetcher.fetch(url).await? else {
            return Ok(UpdateCheck::unavailable(UpdateReason::NoManifest, None));
        };

        let mut local = self.store.load().await;
        let check = diff(&local, &manifest);

        match check.reason {
            None => {
                info!(
                    "Patch update {} available: {} component(s), {} bytes",
                    manifest.version,
                    check.updates.len(),
                    check.total_size
                );
                if let Ok(mut slot) = self.checked_version.lock() {
                    *slot = Some(manifest.version.clone());
                }
            }
            Some(UpdateReason::NoChanges) => {
                debug!("Version {} changes no components", manifest.version);
                local.version = manifest.version.clone();
                if let Err(e) = self.store.save(&local).await {
                    warn!("Failed to record version {}: {:#}", manifest.version, e);
                }
            }
            Some(UpdateReason::VersionTooOld) => {
                warn!(
                    "Installed version {} is older than {}; a full reinstall is required",
                    local.version,
                    manifest.min_version.as_deref().unwrap_or_default()
                );
            }
            Some(reason) => debug!("No patch update: {}", reason.as_str()),
        }

        Ok(check)
    }

    /// Download and stage `updates`.
    ///
    /// Only one batch runs at a time per controller; a concurrent call fails
    /// every component with [`PatchError::BatchInProgress`].
    pub async fn apply_patch_update(
        &self,
        updates: &[ComponentUpdate],
        progress: Option<UnboundedSender<DownloadProgress>>,
    ) -> BatchOutcome {
        let Some(_guard) = BatchGuard::acquire(&self.batch_running) else {
            warn!("Ignoring patch update request: a batch is already running");
            return BatchOutcome::all_failed(updates, &PatchError::BatchInProgress.to_string());
        };

        let version = self.target_version(updates);
        self.downloader.apply_update(&version, updates, progress).await
    }

    /// Whether a download batch is in flight.
    pub fn is_batch_running(&self) -> bool {
        self.batch_running.load(Ordering::Acquire)
    }

    /// Version a batch of `updates` brings the installation to.
    ///
    /// The manifest version of the last successful check, else the highest
    /// component version, else the configured application version.
    fn target_version(&self, updates: &[ComponentUpdate]) -> String {
        let checked = self.checked_version.lock().ok().and_then(|slot| slot.clone());
        checked
            .or_else(|| {
                updates
                    .iter()
                    .filter_map(|u| u.version.as_deref())
                    .filter_map(|v| ReleaseVersion::parse_lenient(v).map(|parsed| (parsed, v)))
                    .max_by_key(|(parsed, _)| *parsed)
                    .map(|(_, v)| v.to_string())
            })
            .unwrap_or_else(|| self.config.app_version.clone())
    }

    /// Whether a verified update is staged and waiting for a restart.
    pub fn has_pending_updates(&self) -> bool {
        self.ledger.exists()
    }

    /// Swap in a staged update. Call before anything opens component files.
    ///
    /// An update the external swap script finished is recorded first.
    pub async fn apply_pending_updates(&self) -> bool {
        self.applier.record_external_swap().await;
        self.applier.apply_pending().await
    }

    /// Record an update the external swap script copied into place.
    ///
    /// Returns `true` if the script left an applied marker with at least one
    /// component in place.
    pub async fn record_external_swap(&self) -> bool {
        self.applier.record_external_swap().await
    }

    /// Write the external swap script for the staged update.
    pub async fn create_swap_script(&self) -> Option<PathBuf> {
        self.scripts.create().await
    }

    /// Where [`create_swap_script`](Self::create_swap_script) writes.
    pub fn swap_script_path(&self) -> PathBuf {
        self.scripts.script_path()
    }

    /// Whether the staged update replaces the running executable, which only
    /// the external swap script can do.
    pub async fn needs_external_swap(&self) -> bool {
        match std::env::current_exe() {
            Ok(exe) => self.replaces_file(&exe).await,
            Err(e) => {
                debug!("Cannot determine current executable: {}", e);
                false
            }
        }
    }

    /// Whether any staged component's destination is `file`.
    pub async fn replaces_file(&self, file: &Path) -> bool {
        if !self.ledger.exists() {
            return false;
        }
        let pending = match self.ledger.read().await {
            Ok(p) => p,
            Err(e) => {
                debug!("Cannot read pending update: {:#}", e);
                return false;
            }
        };
        let target = normalize(file);
        pending.updates.iter().any(|c| normalize(&c.dest_path) == target)
    }

    /// The installed state, synthesizing it if needed.
    pub async fn local_state(&self) -> LocalState {
        self.applier.record_external_swap().await;
        self.store.load().await
    }
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
