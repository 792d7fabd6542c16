//! Patch updater configuration.
//!
//! The configuration file tells patchup where the remote manifest lives, where
//! the installation it manages is rooted, and where its own per-user state
//! goes. It is TOML:
//!
//! ```toml
//! manifest_url = "https://updates.example.com/patch/manifest.json"
//! resources_root = "/opt/example-app/resources"
//! data_dir = "~/.local/share/example-app/patchup"
//! app_version = "25.1101.0000"
//! manifest_timeout_secs = 10
//! download_timeout_secs = 120
//!
//! [components]
//! "app.bundle" = "app.asar"
//! "tools.pack" = "bin/tools.pack"
//! ```
//!
//! # Location
//!
//! - `PATCHUP_CONFIG_PATH` if set
//! - otherwise `<config_dir>/patchup/config.toml` (e.g. `~/.config/patchup/config.toml`)
//!
//! A missing file yields the defaults. `data_dir` must never point inside
//! `resources_root`: the installation tree may be read-only while the
//! application runs.

use crate::core::PatchError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "PATCHUP_CONFIG_PATH";

/// File name of the persisted local component state inside `data_dir`.
pub const LOCAL_STATE_FILE: &str = "local-state.json";
/// File name of the pending-update ledger inside `data_dir`.
pub const LEDGER_FILE: &str = "pending-update.json";
/// Directory name of the staging area inside `data_dir`.
pub const STAGING_DIR: &str = "staging";

const fn default_manifest_timeout_secs() -> u64 {
    10
}

const fn default_download_timeout_secs() -> u64 {
    120
}

fn default_app_version() -> String {
    "0.0.0".to_string()
}

/// Settings for one installation managed by patchup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchConfig {
    /// URL of the remote JSON manifest. Empty means "not configured".
    #[serde(default)]
    pub manifest_url: String,

    /// Root of the installed application's resources.
    #[serde(default)]
    pub resources_root: PathBuf,

    /// Per-user writable directory for state, ledger, staging and scripts.
    ///
    /// `~` and environment variables are expanded. Defaults to
    /// `<data_local_dir>/patchup`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Version reported by the installed application.
    ///
    /// Only consulted when the local state must be rebuilt from scratch.
    #[serde(default = "default_app_version")]
    pub app_version: String,

    /// Component name -> path relative to `resources_root`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, PathBuf>,

    /// Timeout for the manifest request.
    #[serde(default = "default_manifest_timeout_secs")]
    pub manifest_timeout_secs: u64,

    /// Timeout for each component download.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Executable the external swap script relaunches. Defaults to the
    /// current executable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relaunch_executable: Option<PathBuf>,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            manifest_url: String::new(),
            resources_root: PathBuf::new(),
            data_dir: None,
            app_version: default_app_version(),
            components: BTreeMap::new(),
            manifest_timeout_secs: default_manifest_timeout_secs(),
            download_timeout_secs: default_download_timeout_secs(),
            relaunch_executable: None,
        }
    }
}

impl PatchConfig {
    /// Default config file path, honoring `PATCHUP_CONFIG_PATH`.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        Ok(dirs::config_dir()
            .context("Could not determine the user config directory")?
            .join("patchup")
            .join("config.toml"))
    }

    /// Load from the default location, or defaults if the file is absent.
    pub async fn load() -> Result<Self> {
        let path = Self::default_path()?;
        Self::load_with_optional(Some(path)).await
    }

    /// Load from `path` (or the default location), defaults if absent.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(p) => p,
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load_from(&path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load from a specific file; the file must exist.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Write as pretty TOML, creating parent directories.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        crate::utils::atomic_write(path, content.as_bytes())
            .await
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// The manifest URL, or [`PatchError::NotConfigured`].
    pub fn require_manifest_url(&self) -> Result<&str, PatchError> {
        let url = self.manifest_url.trim();
        if url.is_empty() {
            Err(PatchError::NotConfigured {
                field: "manifest_url".to_string(),
            })
        } else {
            Ok(url)
        }
    }

    /// Resolved per-user data directory.
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(raw) => PathBuf::from(
                shellexpand::full(raw).map(|s| s.into_owned()).unwrap_or_else(|_| raw.clone()),
            ),
            None => dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("patchup"),
        }
    }

    /// Path of the local state file.
    pub fn local_state_path(&self) -> PathBuf {
        self.data_dir().join(LOCAL_STATE_FILE)
    }

    /// Path of the pending-update ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir().join(LEDGER_FILE)
    }

    /// Path of the staging directory.
    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir().join(STAGING_DIR)
    }

    /// Installed location of a component.
    ///
    /// Components not listed in `components` live at `resources_root/<name>`.
    pub fn component_path(&self, name: &str) -> PathBuf {
        match self.components.get(name) {
            Some(rel) => self.resources_root.join(rel),
            None => self.resources_root.join(name),
        }
    }

    /// Destination of a component named by the remote manifest.
    ///
    /// Names mapped in `components` are trusted as configured. Any other name
    /// must be a plain relative path (no `..`, root or drive prefix), so the
    /// server cannot direct a write outside `resources_root`.
    pub fn component_destination(&self, name: &str) -> Result<PathBuf, PatchError> {
        if let Some(rel) = self.components.get(name) {
            return Ok(self.resources_root.join(rel));
        }
        let path = Path::new(name);
        let plain = !name.is_empty()
            && path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
            && path.components().any(|c| matches!(c, Component::Normal(_)));
        if !plain {
            return Err(PatchError::UnsafeComponentPath {
                name: name.to_string(),
            });
        }
        Ok(self.resources_root.join(path))
    }

    /// Manifest request timeout.
    pub fn manifest_timeout(&self) -> Duration {
        Duration::from_secs(self.manifest_timeout_secs)
    }

    /// Per-download timeout.
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Executable to relaunch after an external swap.
    pub fn relaunch_executable(&self) -> Option<PathBuf> {
        self.relaunch_executable.clone().or_else(|| std::env::current_exe().ok())
    }
}
