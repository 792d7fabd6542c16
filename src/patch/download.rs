//! Staged, verified download of a batch of component updates.
//!
//! Every batch starts from an empty staging directory and downloads its
//! components one after another. A component is only accepted once its staged
//! bytes hash to the digest the manifest declared. The pending-update ledger is
//! written only when every component of the batch was accepted, so a ledger on
//! disk always describes a complete, verified set of files.
//!
//! Progress is reported as [`DownloadProgress`] events over an unbounded
//! channel. The overall figures are computed against the declared size of the
//! whole batch and never move backwards, even when a component fails halfway
//! or the server sends more bytes than it declared.

use crate::config::PatchConfig;
use crate::core::PatchError;
use crate::patch::diff::ComponentUpdate;
use crate::patch::hasher::ContentHasher;
use crate::patch::ledger::{PendingComponent, PendingUpdate, PendingUpdateLedger};
use crate::utils::fs::{remove_file_if_exists, reset_dir};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    /// Component currently downloading
    pub component: String,
    /// Progress of this component, 0-100
    pub component_percent: f64,
    /// Progress of the whole batch, 0-100
    pub overall_percent: f64,
    /// Bytes of the batch transferred so far
    pub transferred: u64,
    /// Declared size of the whole batch
    pub total: u64,
}

/// A component that could not be staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentFailure {
    /// Component name
    pub name: String,
    /// What went wrong
    pub error: String,
}

/// Result of one download batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    /// Components that were downloaded and verified
    pub success: Vec<String>,
    /// Components that failed, with the reason
    pub failed: Vec<ComponentFailure>,
    /// Whether a pending update was recorded and a restart will apply it
    pub needs_restart: bool,
}

impl BatchOutcome {
    /// Every component in `updates` failed for the same `reason`.
    pub fn all_failed(updates: &[ComponentUpdate], reason: &str) -> Self {
        Self {
            success: Vec::new(),
            failed: updates
                .iter()
                .map(|u| ComponentFailure {
                    name: u.name.clone(),
                    error: reason.to_string(),
                })
                .collect(),
            needs_restart: false,
        }
    }
}

/// Tracks batch-wide byte counts and emits [`DownloadProgress`] events.
struct BatchProgress<'a> {
    sender: Option<&'a UnboundedSender<DownloadProgress>>,
    total: u64,
    completed: u64,
}

impl BatchProgress<'_> {
    fn report(&self, component: &str, received: u64, declared: u64) {
        let Some(sender) = self.sender else {
            return;
        };
        let current = received.min(declared);
        let transferred = self.completed + current;
        let event = DownloadProgress {
            component: component.to_string(),
            component_percent: percent(current, declared),
            overall_percent: percent(transferred, self.total),
            transferred,
            total: self.total,
        };
        // A dropped receiver only means nobody is watching.
        let _ = sender.send(event);
    }

    fn finish_component(&mut self, declared: u64) {
        self.completed += declared;
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 100.0;
    }
    (part as f64 / whole as f64 * 100.0).min(100.0)
}

/// File name a component is staged under.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`, and names made only of dots
/// are neutralized, so the staged file always lands directly inside the
/// staging directory.
pub fn staging_file_name(component: &str) -> String {
    let mut name: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.chars().all(|c| c == '.') {
        name = "_".repeat(name.len().max(1));
    }
    name
}

/// [`staging_file_name`] made unique within one batch.
///
/// A name already taken gets `-<n>` appended, starting at the component's
/// position and counting up until a free name is found.
fn unique_staging_name(component: &str, index: usize, used: &mut HashSet<String>) -> String {
    let base = staging_file_name(component);
    let mut name = base.clone();
    let mut suffix = index;
    while !used.insert(name.clone()) {
        name = format!("{base}-{suffix}");
        suffix += 1;
    }
    name
}

/// Downloads component updates into the staging directory.
#[derive(Debug, Clone)]
pub struct StagedDownloader {
    client: reqwest::Client,
    config: PatchConfig,
    staging_dir: PathBuf,
    ledger: PendingUpdateLedger,
    timeout: Duration,
}

impl StagedDownloader {
    /// Downloader for the installation described by `config`.
    pub fn new(client: reqwest::Client, config: PatchConfig) -> Self {
        let staging_dir = config.staging_dir();
        let ledger = PendingUpdateLedger::new(config.ledger_path());
        let timeout = config.download_timeout();
        Self {
            client,
            config,
            staging_dir,
            ledger,
            timeout,
        }
    }

    /// Stage `updates` and, if all of them verify, record them as pending.
    ///
    /// `version` is the application version the batch brings the
    /// installation to. Per-component failures never abort the remaining
    /// downloads, but any failure keeps the ledger from being written.
    pub async fn apply_update(
        &self,
        version: &str,
        updates: &[ComponentUpdate],
        progress: Option<UnboundedSender<DownloadProgress>>,
    ) -> BatchOutcome {
        // A ledger from an earlier batch points into the staging directory we
        // are about to wipe.
        if self.ledger.exists() {
            warn!("Discarding previously staged update at {}", self.ledger.path().display());
            if let Err(e) = self.ledger.clear().await {
                warn!("Failed to remove stale pending update: {:#}", e);
                return BatchOutcome::all_failed(updates, &format!("{e:#}"));
            }
        }

        if let Err(e) = reset_dir(&self.staging_dir).await {
            warn!("Cannot prepare staging directory: {:#}", e);
            return BatchOutcome::all_failed(updates, &format!("{e:#}"));
        }

        let mut tracker = BatchProgress {
            sender: progress.as_ref(),
            total: updates.iter().map(|u| u.size).sum(),
            completed: 0,
        };
        let mut outcome = BatchOutcome::default();
        let mut staged = Vec::with_capacity(updates.len());
        let mut used_names = HashSet::new();

        for (index, update) in updates.iter().enumerate() {
            let dest_path = match self.config.component_destination(&update.name) {
                Ok(path) => path,
                Err(e) => {
                    warn!("Refusing to stage '{}': {}", update.name, e);
                    outcome.failed.push(ComponentFailure {
                        name: update.name.clone(),
                        error: e.to_string(),
                    });
                    tracker.finish_component(update.size);
                    continue;
                }
            };
            let file_name = unique_staging_name(&update.name, index, &mut used_names);
            let staging_path = self.staging_dir.join(file_name);

            match self.download_component(update, &staging_path, &tracker).await {
                Ok(digest) => {
                    debug!("Staged '{}' at {}", update.name, staging_path.display());
                    tracker.report(&update.name, update.size, update.size);
                    outcome.success.push(update.name.clone());
                    staged.push(PendingComponent {
                        name: update.name.clone(),
                        dest_path,
                        staging_path,
                        digest,
                        version: update.version.clone(),
                        size: update.size,
                    });
                }
                Err(e) => {
                    warn!("Failed to stage '{}': {:#}", update.name, e);
                    if let Err(cleanup) = remove_file_if_exists(&staging_path).await {
                        warn!("Failed to remove partial download: {:#}", cleanup);
                    }
                    outcome.failed.push(ComponentFailure {
                        name: update.name.clone(),
                        error: format!("{e:#}"),
                    });
                }
            }
            tracker.finish_component(update.size);
        }

        if !outcome.failed.is_empty() || outcome.success.is_empty() {
            if !outcome.failed.is_empty() {
                warn!(
                    "{} of {} component(s) failed; not recording a pending update",
                    outcome.failed.len(),
                    updates.len()
                );
            }
            return outcome;
        }

        let pending = PendingUpdate {
            version: version.to_string(),
            created_at: Utc::now(),
            updates: staged,
            resources_root: self.config.resources_root.clone(),
        };
        match self.ledger.write(&pending).await {
            Ok(()) => {
                info!(
                    "Staged {} component(s) for version {}; restart to apply",
                    pending.updates.len(),
                    version
                );
                outcome.needs_restart = true;
                outcome
            }
            Err(e) => {
                warn!("Failed to record pending update: {:#}", e);
                BatchOutcome::all_failed(updates, &format!("{e:#}"))
            }
        }
    }

    /// Stream one component to `staging_path` and verify it.
    ///
    /// Returns the verified digest. The caller removes the partial file on
    /// error.
    async fn download_component(
        &self,
        update: &ComponentUpdate,
        staging_path: &Path,
        tracker: &BatchProgress<'_>,
    ) -> Result<String> {
        let network = |e: reqwest::Error| PatchError::Network {
            operation: format!("download of '{}'", update.name),
            reason: e.to_string(),
        };

        debug!("Downloading '{}' from {}", update.name, update.url);
        let mut response = self
            .client
            .get(&update.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PatchError::DownloadHttpStatus {
                component: update.name.clone(),
                status: status.as_u16(),
            }
            .into());
        }

        let mut file = File::create(staging_path)
            .await
            .with_context(|| format!("Failed to create {}", staging_path.display()))?;
        let mut received: u64 = 0;
        tracker.report(&update.name, 0, update.size);

        while let Some(chunk) = response.chunk().await.map_err(network)? {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", staging_path.display()))?;
            received += chunk.len() as u64;
            tracker.report(&update.name, received, update.size);
        }

        file.flush().await.context("Failed to flush staged file")?;
        file.sync_all().await.context("Failed to sync staged file")?;
        drop(file);

        if received != update.size {
            debug!(
                "'{}' declared {} bytes but {} were received",
                update.name, update.size, received
            );
        }

        ContentHasher::verify(&update.name, staging_path, &update.digest).await
    }
}
