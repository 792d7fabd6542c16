//! Terminal progress display for patch downloads.
//!
//! Wraps `indicatif` with patchup styling. Progress output is suppressed when
//! `PATCHUP_NO_PROGRESS` is set (the CLI sets it for `--no-progress`), which
//! keeps CI logs and piped output clean.

use crate::patch::DownloadProgress;
use indicatif::{ProgressBar as IndicatifBar, ProgressStyle as IndicatifStyle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Environment variable that disables progress bars.
pub const NO_PROGRESS_ENV: &str = "PATCHUP_NO_PROGRESS";

fn is_progress_disabled() -> bool {
    std::env::var(NO_PROGRESS_ENV).is_ok()
}

/// A byte-based progress bar for a whole download batch.
pub struct ProgressBar {
    inner: IndicatifBar,
}

impl ProgressBar {
    /// Create a bar covering `total_bytes`; hidden when progress is disabled.
    pub fn for_bytes(total_bytes: u64) -> Self {
        let bar = if is_progress_disabled() {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new(total_bytes);
            bar.set_style(download_style());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        };
        Self {
            inner: bar,
        }
    }

    /// Set the label shown before the bar.
    pub fn set_prefix(&self, prefix: impl Into<String>) {
        self.inner.set_prefix(prefix.into());
    }

    /// Move the bar to an absolute byte position.
    pub fn set_position(&self, pos: u64) {
        self.inner.set_position(pos);
    }

    /// Finish and remove the bar.
    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }
}

fn download_style() -> IndicatifStyle {
    IndicatifStyle::default_bar()
        .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}")
        .unwrap_or_else(|_| IndicatifStyle::default_bar())
        .progress_chars("━╸━")
}

/// Drive a [`ProgressBar`] from a stream of [`DownloadProgress`] events.
///
/// Returns the sender to hand to the downloader and a join handle that
/// completes once the sender (and every clone of it) is dropped.
pub fn spawn_progress_renderer(
    total_bytes: u64,
) -> (mpsc::UnboundedSender<DownloadProgress>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<DownloadProgress>();
    let handle = tokio::spawn(async move {
        let bar = ProgressBar::for_bytes(total_bytes);
        while let Some(event) = rx.recv().await {
            bar.set_prefix(event.component.clone());
            bar.set_position(event.transferred);
        }
        bar.finish_and_clear();
    });
    (tx, handle)
}
