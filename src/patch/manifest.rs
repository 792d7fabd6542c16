//! Remote manifest model and fetcher.
//!
//! The manifest is fetched fresh on every check and never persisted:
//!
//! ```json
//! {
//!   "version": "25.1215.1430",
//!   "minVersion": "25.1101.0000",
//!   "releaseNotes": "Fixes",
//!   "components": {
//!     "app.bundle": { "digest": "<hex>", "size": 1234, "url": "app.bundle", "version": "25.1215.1430" }
//!   }
//! }
//! ```
//!
//! A 404 means "this server does not offer patch updates" and is reported as
//! `Ok(None)`, not as an error. Component order is the order of the JSON
//! object; the diff engine processes updates in exactly that order.

use crate::core::PatchError;
use crate::version::ReleaseVersion;
use anyhow::{Context, Result};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// One component as published by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestComponent {
    /// Hex SHA-256 of the published bytes
    pub digest: String,
    /// Declared size in bytes
    #[serde(default)]
    pub size: u64,
    /// Download location, absolute or relative to the manifest URL
    pub url: String,
    /// Component version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// The remote description of the latest patch release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Latest published application version
    pub version: String,
    /// Oldest version that may be patched; older installs need a full reinstall
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
    /// Human readable notes
    #[serde(default)]
    pub release_notes: String,
    /// Components in document order
    #[serde(default, with = "ordered_components")]
    pub components: Vec<(String, ManifestComponent)>,
}

impl Manifest {
    /// Look up a component by name.
    pub fn component(&self, name: &str) -> Option<&ManifestComponent> {
        self.components.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Check that `version` and `minVersion` are well-formed release versions.
    ///
    /// The version travels into the ledger and local state, so anything that
    /// is not strictly `N.N.N` is refused at the door.
    pub fn validate_versions(&self) -> std::result::Result<(), String> {
        self.version.parse::<ReleaseVersion>().map_err(|e| e.to_string())?;
        if let Some(min) = &self.min_version {
            min.parse::<ReleaseVersion>().map_err(|e| format!("minVersion: {e}"))?;
        }
        Ok(())
    }

    /// Rewrite relative component URLs to absolute ones against `base`.
    ///
    /// URLs that cannot be joined are left untouched; their download fails
    /// later as an ordinary per-component failure.
    pub fn resolve_urls(&mut self, base: &Url) {
        for (name, component) in &mut self.components {
            if Url::parse(&component.url).is_ok() {
                continue;
            }
            match base.join(&component.url) {
                Ok(joined) => component.url = joined.to_string(),
                Err(e) => debug!("Cannot resolve URL for '{}': {}", name, e),
            }
        }
    }
}

/// (De)serializes the `components` object while keeping key order.
mod ordered_components {
    use super::ManifestComponent;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(
        components: &[(String, ManifestComponent)],
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(components.len()))?;
        for (name, component) in components {
            map.serialize_entry(name, component)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, ManifestComponent)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = Vec<(String, ManifestComponent)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of component name to component")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut out: Vec<(String, ManifestComponent)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, component)) =
                    access.next_entry::<String, ManifestComponent>()?
                {
                    // Last duplicate wins, first position is kept.
                    if let Some(slot) = out.iter_mut().find(|(n, _)| *n == name) {
                        slot.1 = component;
                    } else {
                        out.push((name, component));
                    }
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// Fetches the manifest over HTTP with a bounded timeout.
#[derive(Debug, Clone)]
pub struct ManifestFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl ManifestFetcher {
    /// Fetcher using `client`, aborting each request after `timeout`.
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
        }
    }

    /// GET the manifest at `url`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(manifest))` on a 2xx response with a valid body
    /// - `Ok(None)` on 404 (patch updates not offered)
    /// - `Err` wrapping a [`PatchError`] for any other status, a transport
    ///   failure or an unparseable body
    pub async fn fetch(&self, url: &str) -> Result<Option<Manifest>> {
        let base = Url::parse(url).with_context(|| format!("Invalid manifest URL: {url}"))?;
        debug!("Fetching manifest from {}", base);

        let response = self
            .client
            .get(base.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PatchError::Network {
                operation: "manifest fetch".to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            info!("No patch manifest published at {}", base);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(PatchError::ManifestHttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let body = response.bytes().await.map_err(|e| PatchError::Network {
            operation: "manifest fetch".to_string(),
            reason: e.to_string(),
        })?;

        let mut manifest: Manifest =
            serde_json::from_slice(&body).map_err(|e| PatchError::ManifestParse {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        manifest.validate_versions().map_err(|reason| PatchError::ManifestParse {
            url: url.to_string(),
            reason,
        })?;
        manifest.resolve_urls(&base);

        debug!(
            "Manifest version {} lists {} component(s)",
            manifest.version,
            manifest.components.len()
        );
        Ok(Some(manifest))
    }
}
