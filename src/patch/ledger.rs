//! The pending-update ledger.
//!
//! A single JSON file whose existence means "a fully downloaded and verified
//! patch is waiting to be swapped in on next start". The ledger only knows how
//! to test for, read, write and delete that file; every apply-time decision
//! lives in [`crate::patch::swap`].
//!
//! The external swap script cannot update the local state itself. Instead of
//! deleting the ledger it renames it to the *applied marker*
//! (`pending-update.applied.json`), which the next start turns into state
//! records.

use crate::utils::atomic_write;
use crate::utils::fs::remove_file_if_exists;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// One staged component awaiting its swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingComponent {
    /// Component name
    pub name: String,
    /// Verified file in the staging directory
    pub staging_path: PathBuf,
    /// Live file to replace
    pub dest_path: PathBuf,
    /// Digest the staged file had when it was verified
    pub digest: String,
    /// Component version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Size in bytes
    pub size: u64,
}

/// The ledger file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdate {
    /// Target application version
    pub version: String,
    /// When the batch finished downloading
    pub created_at: DateTime<Utc>,
    /// Components to swap, in order
    pub updates: Vec<PendingComponent>,
    /// Installation root the destinations live under
    pub resources_root: PathBuf,
}

/// Reads and writes the ledger file.
#[derive(Debug, Clone)]
pub struct PendingUpdateLedger {
    path: PathBuf,
}

impl PendingUpdateLedger {
    /// Ledger stored at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
        }
    }

    /// Location of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a pending update is recorded.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Parse the ledger file.
    pub async fn read(&self) -> Result<PendingUpdate> {
        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read pending update {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse pending update {}", self.path.display()))
    }

    /// Write the ledger in one atomic step.
    pub async fn write(&self, pending: &PendingUpdate) -> Result<()> {
        let content =
            serde_json::to_vec_pretty(pending).context("Failed to serialize pending update")?;
        atomic_write(&self.path, &content).await?;
        debug!(
            "Recorded pending update to {} ({} component(s))",
            pending.version,
            pending.updates.len()
        );
        Ok(())
    }

    /// Delete the ledger file; absent is fine.
    pub async fn clear(&self) -> Result<()> {
        remove_file_if_exists(&self.path).await
    }

    /// Where the swap script moves the ledger once its copies are done.
    pub fn applied_path(&self) -> PathBuf {
        self.path.with_extension("applied.json")
    }

    /// Whether an externally applied update still has to be recorded.
    pub fn has_applied_marker(&self) -> bool {
        self.applied_path().is_file()
    }

    /// Parse the applied marker.
    pub async fn read_applied(&self) -> Result<PendingUpdate> {
        let path = self.applied_path();
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read applied update {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse applied update {}", path.display()))
    }

    /// Delete the applied marker; absent is fine.
    pub async fn clear_applied(&self) -> Result<()> {
        remove_file_if_exists(&self.applied_path()).await
    }
}
