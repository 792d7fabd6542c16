//! `.backup` siblings for live component files.
//!
//! The swap applier copies a destination file aside before overwriting it and
//! copies it back if the overwrite fails. Backups always live next to the file
//! they protect so that the restore is a same-filesystem copy.

use crate::utils::fs::tmp_sibling;
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

const MAX_RESTORE_ATTEMPTS: u32 = 3;
const RESTORE_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Creates, restores and removes the backup of one destination file.
///
/// # Backup Strategy
///
/// The backup is a copy of the original with a `.backup` suffix in the same
/// directory. On Unix the original's permission bits are carried over in both
/// directions, so an executable component stays executable after a rollback.
///
/// Restoring retries a few times with a short pause: on Windows a freshly
/// closed file may still be held by antivirus or indexing services for a
/// moment.
///
/// # Examples
///
/// ```rust,no_run
/// use patchup::patch::BackupManager;
/// use std::path::PathBuf;
///
/// # async fn example() -> anyhow::Result<()> {
/// let backup = BackupManager::new(PathBuf::from("/opt/app/resources/app.bundle"));
/// backup.create_backup().await?;
///
/// let swap_failed = false;
/// if swap_failed {
///     backup.restore_backup().await?;
/// }
/// backup.cleanup_backup().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BackupManager {
    original_path: PathBuf,
    backup_path: PathBuf,
}

impl BackupManager {
    /// Manager for `original_path`; the backup goes to `<original_path>.backup`.
    pub fn new(original_path: PathBuf) -> Self {
        let backup_path = tmp_sibling(&original_path, "backup");
        Self {
            original_path,
            backup_path,
        }
    }

    /// Copy the original file to the backup location.
    ///
    /// A stale backup from an earlier run is replaced.
    ///
    /// # Errors
    ///
    /// Fails if the original does not exist, the old backup cannot be removed,
    /// or the copy fails (e.g. the original is locked).
    pub async fn create_backup(&self) -> Result<()> {
        if !self.original_path.exists() {
            bail!("Original file does not exist: {}", self.original_path.display());
        }

        if self.backup_path.exists() {
            debug!("Removing old backup at {}", self.backup_path.display());
            fs::remove_file(&self.backup_path).await.context("Failed to remove old backup")?;
        }

        debug!("Creating backup at {}", self.backup_path.display());
        fs::copy(&self.original_path, &self.backup_path)
            .await
            .context("Failed to create backup")?;

        #[cfg(unix)]
        {
            let metadata = fs::metadata(&self.original_path)
                .await
                .context("Failed to read original file metadata")?;
            fs::set_permissions(&self.backup_path, metadata.permissions())
                .await
                .context("Failed to set backup permissions")?;
        }

        Ok(())
    }

    /// Copy the backup back over the original.
    ///
    /// Retries up to three times before giving up. The backup file itself is
    /// left in place; call [`cleanup_backup`](Self::cleanup_backup) afterwards.
    pub async fn restore_backup(&self) -> Result<()> {
        if !self.backup_path.exists() {
            bail!("No backup found at {}", self.backup_path.display());
        }

        warn!("Restoring {} from backup", self.original_path.display());

        let mut attempts = 0;
        loop {
            match self.attempt_restore().await {
                Ok(()) => {
                    info!("Restored {} from backup", self.original_path.display());
                    return Ok(());
                }
                Err(e) if attempts < MAX_RESTORE_ATTEMPTS - 1 => {
                    warn!("Restore attempt {} failed: {:#}. Retrying...", attempts + 1, e);
                    tokio::time::sleep(RESTORE_RETRY_DELAY).await;
                    attempts += 1;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "Failed to restore backup after {MAX_RESTORE_ATTEMPTS} attempts"
                    )));
                }
            }
        }
    }

    async fn attempt_restore(&self) -> Result<()> {
        if self.original_path.is_file() {
            fs::remove_file(&self.original_path)
                .await
                .context("Failed to remove damaged file")?;
        }

        fs::copy(&self.backup_path, &self.original_path)
            .await
            .context("Failed to copy backup into place")?;

        #[cfg(unix)]
        {
            let metadata =
                fs::metadata(&self.backup_path).await.context("Failed to read backup metadata")?;
            fs::set_permissions(&self.original_path, metadata.permissions())
                .await
                .context("Failed to restore permissions")?;
        }

        Ok(())
    }

    /// Delete the backup; absent is fine.
    pub async fn cleanup_backup(&self) -> Result<()> {
        if self.backup_path.exists() {
            debug!("Cleaning up backup at {}", self.backup_path.display());
            fs::remove_file(&self.backup_path).await.context("Failed to remove backup")?;
        }
        Ok(())
    }

    /// Whether a backup file is present.
    pub fn backup_exists(&self) -> bool {
        self.backup_path.is_file()
    }

    /// Location of the backup file.
    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }
}
