//! Standalone helper script for swapping files the running process holds open.
//!
//! When a pending destination is the running executable (or a resource bundle
//! it maps), the swap cannot happen in process. The generator renders a small
//! script that waits for this process to exit, copies each staged file into
//! place, renames the ledger to the applied marker, removes the staging
//! directory and itself, and finally relaunches the application. The
//! relaunched process records the new state from the marker.
//!
//! Scripts are rendered with `tera`. Every path goes through a quoting filter
//! (`sh_quote` or `cmd_quote`), never through string concatenation, so paths
//! with spaces, quotes or `%` cannot break out of their argument.

use crate::patch::ledger::{PendingUpdate, PendingUpdateLedger};
use crate::utils::atomic_write;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tera::Tera;
use tracing::{info, warn};

/// How many times the script polls for the parent process.
pub const WAIT_ITERATIONS: u32 = 30;
/// Pause between polls, in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 500;
/// Extra pause after the parent exited, for file handles to be released.
pub const GRACE_SECS: u64 = 1;

const POSIX_TEMPLATE: &str = r#"#!/bin/sh
# Applies the staged update once process {{ pid }} has exited.
PID={{ pid }}
i=0
while kill -0 "$PID" 2>/dev/null; do
  i=$((i + 1))
  if [ "$i" -ge {{ wait_iterations }} ]; then
    break
  fi
  sleep {{ poll_secs }}
done
sleep {{ grace_secs }}
{% for c in components %}
mkdir -p {{ c.dest_dir | sh_quote }}
if cp -f {{ c.staging | sh_quote }} {{ c.tmp | sh_quote }} && mv -f {{ c.tmp | sh_quote }} {{ c.dest | sh_quote }}; then
  :
else
  rm -f {{ c.tmp | sh_quote }}
  echo "patchup: failed to update "{{ c.name | sh_quote }} >&2
fi
{% endfor %}
mv -f {{ ledger | sh_quote }} {{ applied | sh_quote }}
rm -rf {{ staging | sh_quote }}
{% if relaunch %}nohup {{ relaunch | sh_quote }} >/dev/null 2>&1 &
{% endif %}rm -f "$0"
"#;

const CMD_TEMPLATE: &str = r#"@echo off
rem Applies the staged update once process {{ pid }} has exited.
setlocal
set /a WAITED=0
:wait
tasklist /FI "PID eq {{ pid }}" 2>NUL | find "{{ pid }}" >NUL
if errorlevel 1 goto ready
set /a WAITED+=1
if %WAITED% GEQ {{ wait_iterations }} goto ready
powershell -NoProfile -Command "Start-Sleep -Milliseconds {{ poll_ms }}" >NUL
goto wait
:ready
powershell -NoProfile -Command "Start-Sleep -Seconds {{ grace_secs }}" >NUL
{% for c in components %}
if not exist {{ c.dest_dir | cmd_quote }} mkdir {{ c.dest_dir | cmd_quote }}
copy /Y {{ c.staging | cmd_quote }} {{ c.dest | cmd_quote }} >NUL || echo patchup: failed to update {{ c.name | cmd_quote }} 1>&2
{% endfor %}
move /Y {{ ledger | cmd_quote }} {{ applied | cmd_quote }} >NUL 2>&1
rmdir /S /Q {{ staging | cmd_quote }} >NUL 2>&1
{% if relaunch %}start "" {{ relaunch | cmd_quote }}
{% endif %}(goto) 2>NUL & del "%~f0"
"#;

/// Script dialect to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    /// POSIX `sh`
    Posix,
    /// Windows `cmd.exe` batch file
    WindowsCmd,
}

impl ScriptFlavor {
    /// Dialect of the platform this binary was built for.
    pub fn host() -> Self {
        if cfg!(windows) {
            Self::WindowsCmd
        } else {
            Self::Posix
        }
    }

    /// File name of the generated script.
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Posix => "apply-update.sh",
            Self::WindowsCmd => "apply-update.cmd",
        }
    }

    fn template(self) -> &'static str {
        match self {
            Self::Posix => POSIX_TEMPLATE,
            Self::WindowsCmd => CMD_TEMPLATE,
        }
    }
}

/// Quote a string as a single POSIX shell word.
pub fn sh_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Quote a string as a single `cmd.exe` argument.
///
/// `%` is doubled so it is not expanded. Double quotes and line breaks cannot
/// be escaped inside a quoted batch argument and are rejected.
pub fn cmd_quote(raw: &str) -> Result<String> {
    if raw.contains(['"', '\n', '\r']) {
        anyhow::bail!("Cannot quote {raw:?} for cmd.exe: contains a double quote or line break");
    }
    Ok(format!("\"{}\"", raw.replace('%', "%%")))
}

fn filter_input(value: &tera::Value, filter: &str) -> tera::Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| tera::Error::msg(format!("{filter} filter requires a string")))
}

fn sh_quote_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    Ok(tera::Value::String(sh_quote(&filter_input(value, "sh_quote")?)))
}

fn cmd_quote_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    cmd_quote(&filter_input(value, "cmd_quote")?)
        .map(tera::Value::String)
        .map_err(|e| tera::Error::msg(e.to_string()))
}

#[derive(Serialize)]
struct ScriptComponent {
    name: String,
    staging: String,
    dest: String,
    dest_dir: String,
    tmp: String,
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Renders and writes the external swap script.
#[derive(Debug, Clone)]
pub struct SwapScriptGenerator {
    ledger: PendingUpdateLedger,
    staging_dir: PathBuf,
    data_dir: PathBuf,
    relaunch: Option<PathBuf>,
    flavor: ScriptFlavor,
    pid: u32,
}

impl SwapScriptGenerator {
    /// Generator for the host platform, waiting on the current process.
    pub fn new(
        ledger: PendingUpdateLedger,
        staging_dir: PathBuf,
        data_dir: PathBuf,
        relaunch: Option<PathBuf>,
    ) -> Self {
        Self {
            ledger,
            staging_dir,
            data_dir,
            relaunch,
            flavor: ScriptFlavor::host(),
            pid: std::process::id(),
        }
    }

    /// Generate a different dialect.
    pub fn with_flavor(mut self, flavor: ScriptFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    /// Wait on a different process.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Where the script is (or would be) written.
    pub fn script_path(&self) -> PathBuf {
        self.data_dir.join(self.flavor.file_name())
    }

    /// Write the script for the current pending update.
    ///
    /// Returns `None` when nothing is pending or the script could not be
    /// produced; the reason is logged.
    pub async fn create(&self) -> Option<PathBuf> {
        if !self.ledger.exists() {
            return None;
        }
        match self.write_script().await {
            Ok(path) => {
                info!("Wrote swap script {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to create swap script: {:#}", e);
                None
            }
        }
    }

    async fn write_script(&self) -> Result<PathBuf> {
        let pending = self.ledger.read().await?;
        let script = self.render(&pending)?;
        let path = self.script_path();
        atomic_write(&path, script.as_bytes()).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .context("Failed to make swap script executable")?;
        }

        Ok(path)
    }

    /// Render the script text for `pending`.
    pub fn render(&self, pending: &PendingUpdate) -> Result<String> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.register_filter("sh_quote", sh_quote_filter);
        tera.register_filter("cmd_quote", cmd_quote_filter);
        tera.add_raw_template(self.flavor.file_name(), self.flavor.template())
            .context("Invalid swap script template")?;

        let components: Vec<ScriptComponent> = pending
            .updates
            .iter()
            .map(|c| ScriptComponent {
                name: c.name.clone(),
                staging: path_str(&c.staging_path),
                dest: path_str(&c.dest_path),
                dest_dir: c.dest_path.parent().map(path_str).unwrap_or_else(|| ".".to_string()),
                tmp: path_str(&crate::utils::fs::tmp_sibling(
                    &c.dest_path,
                    crate::patch::swap::INSTALL_TMP_SUFFIX,
                )),
            })
            .collect();

        let mut context = tera::Context::new();
        context.insert("pid", &self.pid);
        context.insert("wait_iterations", &WAIT_ITERATIONS);
        context.insert("poll_ms", &POLL_INTERVAL_MS);
        context.insert("poll_secs", &format!("{:.1}", POLL_INTERVAL_MS as f64 / 1000.0));
        context.insert("grace_secs", &GRACE_SECS);
        context.insert("components", &components);
        context.insert("ledger", &path_str(self.ledger.path()));
        context.insert("applied", &path_str(&self.ledger.applied_path()));
        context.insert("staging", &path_str(&self.staging_dir));
        context.insert("relaunch", &self.relaunch.as_deref().map(path_str));

        tera.render(self.flavor.file_name(), &context).context("Failed to render swap script")
    }
}
