//! File system helpers used by the patch engine.
//!
//! Everything here is async (`tokio::fs`) because the engine runs on the host's
//! async control flow. The one non-trivial helper is [`atomic_write`], which
//! gives the state file and the pending-update ledger their
//! all-or-nothing write guarantee.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Create `path` and all missing parents.
///
/// Fails if `path` exists and is not a directory.
pub async fn ensure_dir(path: &Path) -> Result<()> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display())),
        Err(_) => fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create directory: {}", path.display())),
    }
}

/// Create the parent directory of `path` if it has one.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent).await?;
    }
    Ok(())
}

/// Atomically writes bytes to a file using a write-then-rename strategy.
///
/// 1. Write `content` to a `.tmp` sibling
/// 2. `fsync` the sibling
/// 3. Rename it over `path`
///
/// Readers see either the previous file or the complete new one, never a
/// prefix. Parent directories are created as needed.
pub async fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    ensure_parent_dir(path).await?;

    let temp_path = tmp_sibling(path, "tmp");
    {
        let mut file = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
        file.write_all(content)
            .await
            .with_context(|| format!("Failed to write to temp file: {}", temp_path.display()))?;
        file.sync_all().await.context("Failed to sync file to disk")?;
    }

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e)
            .with_context(|| format!("Failed to rename temp file to: {}", path.display()));
    }
    Ok(())
}

/// Remove a directory tree, treating "already gone" as success.
pub async fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to remove directory: {}", path.display()))
        }
    }
}

/// Remove a file, treating "already gone" as success.
pub async fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove file: {}", path.display())),
    }
}

/// Wipe `path` (if present) and recreate it empty.
pub async fn reset_dir(path: &Path) -> Result<()> {
    remove_dir_all_if_exists(path).await?;
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create directory: {}", path.display()))
}

/// `foo.bin` -> `foo.bin.<suffix>` in the same directory.
pub fn tmp_sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
