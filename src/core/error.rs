//! Error handling for patchup
//!
//! The error system follows two rules:
//! 1. **Strongly-typed errors** ([`PatchError`]) for the failure modes callers
//!    branch on (bad digest, HTTP status, version floor, concurrent batch)
//! 2. **User-friendly messages** ([`ErrorContext`]) with an actionable
//!    suggestion for the command-line surface
//!
//! Engine internals return `anyhow::Result` and attach context as they go; a
//! [`PatchError`] can be recovered from an `anyhow::Error` with
//! `downcast_ref` when the caller needs to distinguish the cause.
//!
//! # Examples
//!
//! ```rust,no_run
//! use patchup::core::{PatchError, user_friendly_error};
//!
//! let err = anyhow::Error::from(PatchError::NotConfigured {
//!     field: "manifest_url".to_string(),
//! });
//! user_friendly_error(err).display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// Domain failures of the patch engine.
#[derive(Error, Debug)]
pub enum PatchError {
    /// The manifest endpoint answered with a non-2xx status other than 404.
    #[error("Manifest request to {url} failed with HTTP {status}")]
    ManifestHttpStatus {
        /// Manifest URL that was requested
        url: String,
        /// HTTP status code returned by the server
        status: u16,
    },

    /// The manifest body was not valid manifest JSON.
    #[error("Manifest at {url} could not be parsed: {reason}")]
    ManifestParse {
        /// Manifest URL that was requested
        url: String,
        /// Parser message
        reason: String,
    },

    /// Transport-level failure (DNS, connect, timeout, interrupted body).
    #[error("Network error during {operation}: {reason}")]
    Network {
        /// What was being attempted, e.g. "manifest fetch"
        operation: String,
        /// Underlying error message
        reason: String,
    },

    /// A component download answered with a non-2xx status.
    #[error("Download of '{component}' failed with HTTP {status}")]
    DownloadHttpStatus {
        /// Component name
        component: String,
        /// HTTP status code returned by the server
        status: u16,
    },

    /// Hash of a staged file does not match the declared digest.
    #[error("Checksum mismatch for component '{name}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Component name
        name: String,
        /// Digest declared by the manifest or ledger
        expected: String,
        /// Digest computed from the bytes on disk
        actual: String,
    },

    /// A version string is not three dot-separated non-negative integers.
    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion {
        /// The offending version string
        version: String,
        /// Why it was rejected
        reason: String,
    },

    /// A manifest component name would place its file outside the
    /// installation root.
    #[error("Component name '{name}' does not resolve inside the installation root")]
    UnsafeComponentPath {
        /// Component name as published
        name: String,
    },

    /// A download batch is already running on this controller.
    #[error("A patch update batch is already in progress")]
    BatchInProgress,

    /// A required configuration value is missing.
    #[error("Configuration value '{field}' is not set")]
    NotConfigured {
        /// Name of the missing field
        field: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// An error paired with an optional hint and details for terminal display.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error
    pub error: anyhow::Error,
    /// What the user can do about it
    pub suggestion: Option<String>,
    /// Extra background
    pub details: Option<String>,
}

impl ErrorContext {
    /// Wrap an error without any hints.
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
            suggestion: None,
            details: None,
        }
    }

    /// Attach a suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print to stderr with colors.
    pub fn display(&self) {
        eprintln!("{} {}", "error:".red().bold(), self.error);
        for cause in self.error.chain().skip(1) {
            eprintln!("  {} {}", "caused by:".yellow(), cause);
        }
        if let Some(details) = &self.details {
            eprintln!("{} {}", "details:".cyan(), details);
        }
        if let Some(suggestion) = &self.suggestion {
            eprintln!("{} {}", "hint:".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }
        Ok(())
    }
}

/// Turn any error into an [`ErrorContext`] with a hint where one is known.
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let hint = error.chain().find_map(|cause| {
        cause.downcast_ref::<PatchError>().and_then(|e| match e {
            PatchError::NotConfigured {
                field,
            } => Some(format!(
                "Set `{field}` in the patchup config file or pass --config <path>"
            )),
            PatchError::ManifestHttpStatus {
                ..
            }
            | PatchError::Network {
                ..
            } => Some("Check network connectivity and the configured manifest_url".to_string()),
            PatchError::ManifestParse {
                ..
            } => Some("The update server returned a malformed manifest".to_string()),
            PatchError::ChecksumMismatch {
                ..
            } => Some("Run `patchup apply` again to re-download the component".to_string()),
            PatchError::BatchInProgress => {
                Some("Wait for the running download batch to finish".to_string())
            }
            _ => None,
        })
    });

    let ctx = ErrorContext::new(error);
    match hint {
        Some(h) => ctx.with_suggestion(h),
        None => ctx,
    }
}
