// src/config/mod.rs

//! Manifest loading and validation for the `flowdag` runner.
//!
//! - [`model`] defines the TOML-backed data model and its validated form.
//! - [`loader`] reads a manifest from disk.
//! - [`validate`] turns a raw manifest into a [`Manifest`], checking durations,
//!   limits and DAG correctness.
//! - [`duration`] parses `"250ms"` / `"3s"` / `"2m"` / `"1h"` strings.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_manifest_path, load_and_validate, load_from_path, parse_manifest};
pub use model::{
    ConfigSection, DefaultSection, Manifest, ManifestSettings, RawManifest, RetrySection,
    RetrySpec, TaskConfig, TaskSpec,
};
