//! Cross-cutting helpers: async file operations and terminal progress.

pub mod fs;
pub mod progress;

pub use fs::{atomic_write, ensure_dir, remove_dir_all_if_exists, reset_dir};
