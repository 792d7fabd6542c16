//! Persisted record of what is installed locally.
//!
//! The local state maps each component name to the digest, size and version
//! of the bytes currently installed, plus the application version those bytes
//! belong to. The diff engine reads it; only the swap applier writes component
//! records.
//!
//! The store is self-healing: a missing or unreadable state file is never an
//! error. [`LocalStateStore::load`] rebuilds the state by hashing every
//! component it knows how to locate and persists the result, so the next load
//! is a plain file read.

use crate::config::PatchConfig;
use crate::patch::hasher::ContentHasher;
use crate::utils::atomic_write;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// One installed component.
///
/// The component name is the key under which the record is stored in
/// [`LocalState::components`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRecord {
    /// Hex SHA-256 of the installed bytes
    pub digest: String,
    /// Size in bytes
    pub size: u64,
    /// Component version, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// When the record was synthesized from the installed file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
    /// When the swap applier last replaced the component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The whole local state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalState {
    /// Application version the installed components belong to
    pub version: String,
    /// When this state was first created
    pub installed_at: DateTime<Utc>,
    /// When a pending update was last applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    /// Component name -> record
    #[serde(default)]
    pub components: BTreeMap<String, ComponentRecord>,
}

impl LocalState {
    /// Empty state for `version`.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            installed_at: Utc::now(),
            last_update: None,
            components: BTreeMap::new(),
        }
    }

    /// Insert or replace the record for `name` after a successful swap.
    pub fn record_component(
        &mut self,
        name: &str,
        digest: impl Into<String>,
        size: u64,
        version: Option<String>,
    ) {
        let now = Utc::now();
        let installed_at = self.components.get(name).and_then(|r| r.installed_at);
        self.components.insert(
            name.to_string(),
            ComponentRecord {
                digest: digest.into(),
                size,
                version,
                installed_at,
                updated_at: Some(now),
            },
        );
    }
}

/// Loads and saves [`LocalState`].
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    path: PathBuf,
    app_version: String,
    known_components: BTreeMap<String, PathBuf>,
}

impl LocalStateStore {
    /// Store at `path`, synthesizing from `known_components` when needed.
    pub fn new(
        path: PathBuf,
        app_version: impl Into<String>,
        known_components: BTreeMap<String, PathBuf>,
    ) -> Self {
        Self {
            path,
            app_version: app_version.into(),
            known_components,
        }
    }

    /// Store described by a [`PatchConfig`].
    pub fn from_config(config: &PatchConfig) -> Self {
        let known = config
            .components
            .keys()
            .map(|name| (name.clone(), config.component_path(name)))
            .collect();
        Self::new(config.local_state_path(), config.app_version.clone(), known)
    }

    /// Location of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persisted state, or a freshly synthesized one.
    ///
    /// Never fails: a missing or corrupt file is treated as absent.
    pub async fn load(&self) -> LocalState {
        match self.read().await {
            Ok(Some(state)) => return state,
            Ok(None) => debug!("No local state at {}, synthesizing", self.path.display()),
            Err(e) => warn!("Discarding unreadable local state: {:#}", e),
        }

        let state = self.synthesize().await;
        if let Err(e) = self.save(&state).await {
            warn!("Failed to persist synthesized local state: {:#}", e);
        }
        state
    }

    async fn read(&self) -> Result<Option<LocalState>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };
        let state = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(Some(state))
    }

    /// Build a state from the files currently on disk.
    ///
    /// Components that cannot be found or hashed are left out, so the next
    /// check treats them as new and downloads them.
    async fn synthesize(&self) -> LocalState {
        let mut state = LocalState::new(self.app_version.clone());
        for (name, path) in &self.known_components {
            let size = match fs::metadata(path).await {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => {
                    debug!("Component '{}' not found at {}", name, path.display());
                    continue;
                }
            };
            match ContentHasher::hash_file(path).await {
                Ok(digest) => {
                    state.components.insert(
                        name.clone(),
                        ComponentRecord {
                            digest,
                            size,
                            version: Some(self.app_version.clone()),
                            installed_at: Some(state.installed_at),
                            updated_at: None,
                        },
                    );
                }
                Err(e) => warn!("Could not hash component '{}': {:#}", name, e),
            }
        }
        info!(
            "Synthesized local state for version {} with {} component(s)",
            state.version,
            state.components.len()
        );
        state
    }

    /// Overwrite the state file atomically.
    pub async fn save(&self, state: &LocalState) -> Result<()> {
        let content =
            serde_json::to_vec_pretty(state).context("Failed to serialize local state")?;
        atomic_write(&self.path, &content).await?;
        debug!("Saved local state to {}", self.path.display());
        Ok(())
    }
}
