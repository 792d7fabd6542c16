//! Test utilities for patchup
//!
//! Helpers shared by unit and integration tests: one-time logging setup, a
//! throwaway installation layout, and builders for manifest documents.
//!
//! # Example
//!
//! ```rust,no_run
//! use patchup::test_utils::{InstallFixture, manifest_json};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let fixture = InstallFixture::new()?;
//! fixture.install_component("app.bundle", b"v1").await?;
//! let config = fixture.config("http://127.0.0.1:8080/manifest.json");
//! let manifest = manifest_json("1.1.0", None, &[("app.bundle", &b"v2"[..], "app.bundle")]);
//! # Ok(())
//! # }
//! ```

use crate::config::PatchConfig;
use crate::patch::{ContentHasher, LocalState, LocalStateStore};
use anyhow::{Context, Result};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` if given, else `RUST_LOG` if set, else stays silent. Only the
/// first call has an effect.
///
/// ```bash
/// RUST_LOG=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}

/// A temporary installation: a resources root and a separate data directory.
pub struct InstallFixture {
    temp: TempDir,
    /// Where installed components live
    pub resources_root: PathBuf,
    /// patchup's per-user data directory
    pub data_dir: PathBuf,
}

impl InstallFixture {
    /// Create empty `install/` and `data/` directories in a fresh temp dir.
    pub fn new() -> Result<Self> {
        let temp = TempDir::new().context("Failed to create temp dir")?;
        let resources_root = temp.path().join("install");
        let data_dir = temp.path().join("data");
        std::fs::create_dir_all(&resources_root)?;
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            temp,
            resources_root,
            data_dir,
        })
    }

    /// Root of the temp dir.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Config pointing at this installation and `manifest_url`.
    pub fn config(&self, manifest_url: &str) -> PatchConfig {
        PatchConfig {
            manifest_url: manifest_url.to_string(),
            resources_root: self.resources_root.clone(),
            data_dir: Some(self.data_dir.to_string_lossy().into_owned()),
            app_version: "1.0.0".to_string(),
            manifest_timeout_secs: 5,
            download_timeout_secs: 5,
            ..PatchConfig::default()
        }
    }

    /// Write `config` as TOML into the temp dir and return its path.
    pub async fn write_config(&self, config: &PatchConfig) -> Result<PathBuf> {
        let path = self.temp.path().join("config.toml");
        config.save_to(&path).await?;
        Ok(path)
    }

    /// Install `bytes` as component `name` under the resources root.
    pub async fn install_component(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.resources_root.join(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Persist a local state with the given `(name, digest)` records.
    pub async fn write_local_state(&self, version: &str, components: &[(&str, &str)]) -> Result<()> {
        let mut state = LocalState::new(version);
        for (name, digest) in components {
            state.record_component(name, *digest, 0, Some(version.to_string()));
        }
        self.store().save(&state).await
    }

    /// Read the persisted local state (synthesizing it if absent).
    pub async fn local_state(&self) -> LocalState {
        self.store().load().await
    }

    fn store(&self) -> LocalStateStore {
        let config = self.config("");
        LocalStateStore::new(config.local_state_path(), "1.0.0", BTreeMap::new())
    }

    /// Location of the pending-update ledger.
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(crate::config::LEDGER_FILE)
    }

    /// Location of the staging directory.
    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join(crate::config::STAGING_DIR)
    }
}

/// Manifest document for `(name, content, url)` components.
///
/// Digests and sizes are computed from `content`.
pub fn manifest_json(
    version: &str,
    min_version: Option<&str>,
    components: &[(&str, &[u8], &str)],
) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, content, url) in components {
        map.insert(
            name.to_string(),
            json!({
                "digest": ContentHasher::hash_bytes(content),
                "size": content.len(),
                "url": url,
                "version": version,
            }),
        );
    }
    let mut doc = json!({
        "version": version,
        "releaseNotes": format!("Release {version}"),
        "components": map,
    });
    if let Some(min) = min_version {
        doc["minVersion"] = json!(min);
    }
    doc
}
