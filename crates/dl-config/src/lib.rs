//! Docket Lake configuration loading and validation.
//!
//! This crate provides:
//! - Typed run configuration with serde defaults
//! - JSON and TOML loading
//! - Config resolution (CLI → env → XDG → defaults)
//! - Semantic validation

pub mod resolve;
pub mod settings;
pub mod validate;

pub use resolve::{resolve_config, ConfigPaths, ConfigSource};
pub use settings::{ConvertConfig, MalformedPolicy, DEFAULT_COMPACTION_THRESHOLD};
pub use validate::{validate, ConfigError, ValidationResult};
