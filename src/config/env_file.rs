//! Environment file loading.
//!
//! Values are copied into the process environment so every later reader
//! (clap `.env(...)` fallbacks included) sees the same configuration.
//! Variables that are already set win over the file.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

/// Default environment file, looked up relative to the working directory.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Load `KEY=VALUE` pairs from `path` into the process environment.
///
/// Returns `Ok(true)` when the file was read. A missing file is only an error
/// when `required` is set.
///
/// # Errors
/// Returns an error if the file cannot be parsed, or is missing while required.
pub fn load(path: &Path, required: bool) -> Result<bool> {
    match dotenvy::from_path(path) {
        Ok(()) => {
            debug!("Loaded environment file {}", path.display());
            Ok(true)
        }
        Err(err) if err.not_found() && !required => {
            debug!("No environment file at {}", path.display());
            Ok(false)
        }
        Err(err) => Err(err)
            .with_context(|| format!("Unable to load environment settings from {}", path.display())),
    }
}
