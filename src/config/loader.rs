// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{Manifest, RawManifest};
use crate::errors::Result;

/// Read and deserialize a manifest without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawManifest> {
    let path = path.as_ref();
    debug!(path = %path.display(), "reading manifest");
    let contents = fs::read_to_string(path)?;
    parse_manifest(&contents)
}

/// Deserialize a manifest from TOML text.
pub fn parse_manifest(contents: &str) -> Result<RawManifest> {
    Ok(toml::from_str(contents)?)
}

/// Load a manifest and validate it:
///
/// - at least one task
/// - sane concurrency, rate limit and retry values
/// - every duration string parses
/// - no self-dependencies, and no unknown `after` entries in strict mode
/// - no cycles
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Manifest> {
    let raw = load_from_path(&path)?;
    Manifest::try_from(raw)
}

/// `Flowdag.toml` in the current working directory.
pub fn default_manifest_path() -> PathBuf {
    PathBuf::from("Flowdag.toml")
}
