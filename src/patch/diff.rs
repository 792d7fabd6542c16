//! Local state vs. manifest comparison.
//!
//! [`diff`] is a pure function: it never touches disk. The controller acts on
//! the result (e.g. persisting the new version for [`UpdateReason::NoChanges`]).

use crate::patch::hasher::ContentHasher;
use crate::patch::manifest::Manifest;
use crate::patch::state::LocalState;
use crate::version::{ReleaseVersion, is_below_floor};
use serde::{Deserialize, Serialize};

/// Why no update is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateReason {
    /// Local version equals the manifest version
    UpToDate,
    /// Local version is below the manifest's `minVersion`; a full reinstall is required
    VersionTooOld,
    /// Version moved but every component digest already matches
    NoChanges,
    /// The server does not publish a manifest (404)
    NoManifest,
    /// The check failed; see [`UpdateCheck::error`]
    Error,
}

impl UpdateReason {
    /// Wire name, e.g. `"version-too-old"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpToDate => "up-to-date",
            Self::VersionTooOld => "version-too-old",
            Self::NoChanges => "no-changes",
            Self::NoManifest => "no-manifest",
            Self::Error => "error",
        }
    }
}

/// A component whose published digest differs from the installed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentUpdate {
    /// Component name
    pub name: String,
    /// Published digest
    pub digest: String,
    /// Declared size in bytes
    pub size: u64,
    /// Absolute download URL
    pub url: String,
    /// Published component version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// `true` when nothing is installed under this name yet
    pub is_new: bool,
}

/// Result of a patch update check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheck {
    /// Whether there is something to download
    pub available: bool,
    /// Why nothing is available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<UpdateReason>,
    /// Manifest version the check was made against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Changed components in manifest order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<ComponentUpdate>,
    /// Sum of declared sizes of `updates`
    #[serde(default)]
    pub total_size: u64,
    /// Release notes from the manifest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    /// Failure message for [`UpdateReason::Error`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateCheck {
    /// Nothing to do, for `reason`.
    pub fn unavailable(reason: UpdateReason, version: Option<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason),
            version,
            updates: Vec::new(),
            total_size: 0,
            release_notes: None,
            error: None,
        }
    }

    /// The check itself failed.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::unavailable(UpdateReason::Error, None)
        }
    }
}

fn same_version(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    matches!(
        (ReleaseVersion::parse_lenient(a), ReleaseVersion::parse_lenient(b)),
        (Some(x), Some(y)) if x == y
    )
}

/// Compare `local` against `manifest`.
///
/// 1. Same version -> [`UpdateReason::UpToDate`]
/// 2. Local below `minVersion` -> [`UpdateReason::VersionTooOld`]
/// 3. Every manifest component missing locally or with a different digest
///    becomes a [`ComponentUpdate`], in manifest order
/// 4. No such component -> [`UpdateReason::NoChanges`]
/// 5. Otherwise available, with the summed declared size
pub fn diff(local: &LocalState, manifest: &Manifest) -> UpdateCheck {
    if same_version(&local.version, &manifest.version) {
        return UpdateCheck::unavailable(UpdateReason::UpToDate, Some(manifest.version.clone()));
    }

    let floor = manifest.min_version.as_deref().filter(|f| !f.trim().is_empty());
    if floor.is_some_and(|floor| is_below_floor(&local.version, floor)) {
        return UpdateCheck::unavailable(
            UpdateReason::VersionTooOld,
            Some(manifest.version.clone()),
        );
    }

    let updates: Vec<ComponentUpdate> = manifest
        .components
        .iter()
        .filter_map(|(name, remote)| {
            let installed = local.components.get(name);
            let changed = installed
                .is_none_or(|record| !ContentHasher::digests_match(&record.digest, &remote.digest));
            changed.then(|| ComponentUpdate {
                name: name.clone(),
                digest: remote.digest.clone(),
                size: remote.size,
                url: remote.url.clone(),
                version: remote.version.clone().or_else(|| Some(manifest.version.clone())),
                is_new: installed.is_none(),
            })
        })
        .collect();

    if updates.is_empty() {
        return UpdateCheck::unavailable(UpdateReason::NoChanges, Some(manifest.version.clone()));
    }

    let total_size = updates.iter().map(|u| u.size).sum();
    UpdateCheck {
        available: true,
        reason: None,
        version: Some(manifest.version.clone()),
        updates,
        total_size,
        release_notes: Some(manifest.release_notes.clone()).filter(|n| !n.is_empty()),
        error: None,
    }
}
