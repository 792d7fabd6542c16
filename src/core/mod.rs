//! Core types shared across patchup.
//!
//! Currently this is the error vocabulary: [`PatchError`] for typed domain
//! failures and [`ErrorContext`] / [`user_friendly_error`] for rendering them
//! on the command line.

pub mod error;

pub use error::{ErrorContext, PatchError, user_friendly_error};
