//! Streaming SHA-256 content hashing.
//!
//! Digests are lowercase hex without a prefix, matching the manifest format.
//! Files are read in fixed-size chunks so multi-hundred-megabyte bundles never
//! sit in memory at once.
//!
//! Hashing goes through plain `tokio::fs`, i.e. the raw on-disk bytes. Hosts
//! that interpose a virtual file system over packed resource archives must
//! hand patchup the real path of the archive file, not a path inside it.

use crate::core::PatchError;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

const READ_CHUNK: usize = 64 * 1024;

/// Computes and checks content digests of local files.
pub struct ContentHasher;

impl ContentHasher {
    /// Hex-encoded SHA-256 of the file at `file_path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or read; the caller decides whether
    /// that is fatal.
    pub async fn hash_file(file_path: &Path) -> Result<String> {
        debug!("Computing SHA256 for {}", file_path.display());

        let mut file = File::open(file_path)
            .await
            .with_context(|| format!("Failed to open file for hashing: {}", file_path.display()))?;

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .with_context(|| format!("Failed to read file: {}", file_path.display()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Hex-encoded SHA-256 of an in-memory buffer.
    pub fn hash_bytes(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Whether two digests denote the same content (case-insensitive).
    pub fn digests_match(a: &str, b: &str) -> bool {
        a.trim().eq_ignore_ascii_case(b.trim())
    }

    /// Hash `file_path` and compare with `expected`.
    ///
    /// Returns the computed digest on success and a
    /// [`PatchError::ChecksumMismatch`] otherwise.
    pub async fn verify(name: &str, file_path: &Path, expected: &str) -> Result<String> {
        let actual = Self::hash_file(file_path).await?;
        if !Self::digests_match(&actual, expected) {
            return Err(PatchError::ChecksumMismatch {
                name: name.to_string(),
                expected: expected.to_string(),
                actual,
            }
            .into());
        }
        Ok(actual)
    }
}
