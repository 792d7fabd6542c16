//! In-process application of a pending update.
//!
//! Runs at the very start of boot, before anything opens the component files.
//! Each staged component is re-verified, its destination backed up, and the
//! staged bytes installed through a `<dest>.patchup-tmp` sibling that is
//! renamed over the destination. Whatever happens to individual components,
//! the pass ends by recording the target version, deleting the ledger and
//! wiping the staging directory, so a component that can never be applied is
//! reported once instead of being retried on every boot.
//!
//! Updates finished by the external swap script are recorded here as well,
//! see [`SwapApplier::record_external_swap`].

use crate::patch::backup::BackupManager;
use crate::patch::hasher::ContentHasher;
use crate::patch::ledger::{PendingComponent, PendingUpdateLedger};
use crate::patch::state::LocalStateStore;
use crate::utils::fs::{ensure_parent_dir, remove_dir_all_if_exists, tmp_sibling};
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, info, warn};

/// Suffix of the sibling file a destination is rebuilt in before the rename.
pub const INSTALL_TMP_SUFFIX: &str = "patchup-tmp";

/// What happened to one pending component.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ComponentSwap {
    Applied(String),
    Skipped(&'static str),
}

/// Applies the pending-update ledger to the live installation.
#[derive(Debug, Clone)]
pub struct SwapApplier {
    ledger: PendingUpdateLedger,
    store: LocalStateStore,
    staging_dir: PathBuf,
}

impl SwapApplier {
    /// Applier for `ledger`, recording results in `store`.
    pub fn new(ledger: PendingUpdateLedger, store: LocalStateStore, staging_dir: PathBuf) -> Self {
        Self {
            ledger,
            store,
            staging_dir,
        }
    }

    /// Apply every component listed in the ledger.
    ///
    /// Returns `true` when at least one component was installed, meaning the
    /// caller should (re)start into the new files. Never fails: an unreadable
    /// ledger is discarded together with the staging directory.
    pub async fn apply_pending(&self) -> bool {
        if !self.ledger.exists() {
            return false;
        }

        match self.apply_ledger().await {
            Ok(applied) => applied,
            Err(e) => {
                error!("Failed to apply pending update: {:#}", e);
                self.discard().await;
                false
            }
        }
    }

    /// Record an update the external swap script already copied into place.
    ///
    /// Every destination listed in the applied marker is hashed; those that
    /// match their staged digest are recorded, the state version moves to the
    /// marker's version, and the marker is deleted. Returns `true` when at
    /// least one component was recorded.
    pub async fn record_external_swap(&self) -> bool {
        if !self.ledger.has_applied_marker() {
            return false;
        }

        let applied = match self.ledger.read_applied().await {
            Ok(applied) => applied,
            Err(e) => {
                warn!("Discarding unreadable applied update: {:#}", e);
                if let Err(e) = self.ledger.clear_applied().await {
                    warn!("Failed to remove applied update marker: {:#}", e);
                }
                return false;
            }
        };

        let mut state = self.store.load().await;
        let mut recorded = 0usize;
        for component in &applied.updates {
            match ContentHasher::hash_file(&component.dest_path).await {
                Ok(digest) if ContentHasher::digests_match(&digest, &component.digest) => {
                    state.record_component(
                        &component.name,
                        digest,
                        component.size,
                        component.version.clone(),
                    );
                    recorded += 1;
                }
                Ok(_) => warn!(
                    "'{}' at {} was not replaced by the swap script",
                    component.name,
                    component.dest_path.display()
                ),
                Err(e) => warn!("Cannot verify '{}' after external swap: {:#}", component.name, e),
            }
        }

        state.version = applied.version.clone();
        state.last_update = Some(Utc::now());
        if let Err(e) = self.store.save(&state).await {
            // Keep the marker so the next start tries again.
            warn!("Failed to save local state after external swap: {:#}", e);
            return recorded > 0;
        }
        if let Err(e) = self.ledger.clear_applied().await {
            warn!("Failed to remove applied update marker: {:#}", e);
        }

        info!(
            "Recorded externally applied update {} ({} of {} component(s))",
            applied.version,
            recorded,
            applied.updates.len()
        );
        recorded > 0
    }

    async fn apply_ledger(&self) -> Result<bool> {
        let pending = self.ledger.read().await?;
        info!(
            "Applying pending update to {} ({} component(s))",
            pending.version,
            pending.updates.len()
        );

        let mut state = self.store.load().await;
        let mut applied = 0usize;

        for component in &pending.updates {
            match self.apply_component(component).await {
                Ok(ComponentSwap::Applied(digest)) => {
                    info!("Updated '{}'", component.name);
                    state.record_component(
                        &component.name,
                        digest,
                        component.size,
                        component.version.clone(),
                    );
                    applied += 1;
                }
                Ok(ComponentSwap::Skipped(reason)) => {
                    warn!("Skipped '{}': {}", component.name, reason);
                }
                Err(e) => {
                    warn!("Failed to update '{}': {:#}", component.name, e);
                }
            }
        }

        state.version = pending.version.clone();
        state.last_update = Some(Utc::now());
        if let Err(e) = self.store.save(&state).await {
            warn!("Failed to save local state after update: {:#}", e);
        }

        self.discard().await;

        if applied < pending.updates.len() {
            warn!(
                "Applied {} of {} component(s) of version {}",
                applied,
                pending.updates.len(),
                pending.version
            );
        }
        Ok(applied > 0)
    }

    async fn apply_component(&self, component: &PendingComponent) -> Result<ComponentSwap> {
        if !component.staging_path.is_file() {
            return Ok(ComponentSwap::Skipped("staged file is missing"));
        }

        let digest = match ContentHasher::verify(
            &component.name,
            &component.staging_path,
            &component.digest,
        )
        .await
        {
            Ok(digest) => digest,
            Err(e) => {
                debug!("Re-verification failed: {:#}", e);
                return Ok(ComponentSwap::Skipped("staged file no longer matches its digest"));
            }
        };

        let backup = BackupManager::new(component.dest_path.clone());
        let has_backup = if component.dest_path.is_file() {
            match backup.create_backup().await {
                Ok(()) => true,
                Err(e) => {
                    // Proceed without a safety net rather than never updating.
                    warn!("No backup of {}: {:#}", component.dest_path.display(), e);
                    false
                }
            }
        } else {
            false
        };

        match install(&component.staging_path, &component.dest_path).await {
            Ok(()) => {
                if let Err(e) = backup.cleanup_backup().await {
                    warn!("Failed to remove backup: {:#}", e);
                }
                Ok(ComponentSwap::Applied(digest))
            }
            Err(e) => {
                if has_backup {
                    if let Err(restore) = backup.restore_backup().await {
                        error!(
                            "Could not restore {}: {:#}",
                            component.dest_path.display(),
                            restore
                        );
                    } else if let Err(cleanup) = backup.cleanup_backup().await {
                        warn!("Failed to remove backup: {:#}", cleanup);
                    }
                }
                Err(e)
            }
        }
    }

    /// Delete the ledger and the staging directory, logging failures.
    async fn discard(&self) {
        if let Err(e) = self.ledger.clear().await {
            warn!("Failed to remove pending update: {:#}", e);
        }
        if let Err(e) = remove_dir_all_if_exists(&self.staging_dir).await {
            warn!("Failed to remove staging directory: {:#}", e);
        }
    }
}

/// Copy `staged` next to `dest`, then rename it over `dest`.
///
/// On Unix the destination's permission bits are kept.
async fn install(staged: &Path, dest: &Path) -> Result<()> {
    ensure_parent_dir(dest).await?;
    let tmp = tmp_sibling(dest, INSTALL_TMP_SUFFIX);

    let result = copy_then_rename(staged, &tmp, dest).await;
    if result.is_err() && tmp.is_file() {
        let _ = fs::remove_file(&tmp).await;
    }
    result
}

async fn copy_then_rename(staged: &Path, tmp: &Path, dest: &Path) -> Result<()> {
    fs::copy(staged, tmp)
        .await
        .with_context(|| format!("Failed to copy staged file to {}", tmp.display()))?;

    #[cfg(unix)]
    {
        if let Ok(meta) = fs::metadata(dest).await {
            fs::set_permissions(tmp, meta.permissions())
                .await
                .context("Failed to carry over permissions")?;
        }
    }

    fs::rename(tmp, dest).await.with_context(|| format!("Failed to replace {}", dest.display()))
}
