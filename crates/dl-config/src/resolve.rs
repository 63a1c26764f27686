//! Config file resolution: CLI → env → XDG → defaults.

use std::path::{Path, PathBuf};

use crate::settings::ConvertConfig;
use crate::validate::ConfigError;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "DOCKET_LAKE_CONFIG";

/// File name looked up in the XDG config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli(PathBuf),
    Env(PathBuf),
    Xdg(PathBuf),
    Defaults,
}

/// Candidate config locations in precedence order.
#[derive(Debug, Clone, Default)]
pub struct ConfigPaths {
    pub cli: Option<PathBuf>,
    pub env: Option<PathBuf>,
    pub xdg: Option<PathBuf>,
}

impl ConfigPaths {
    /// Discover candidates from the CLI flag, the environment and XDG.
    pub fn discover(cli: Option<&Path>) -> Self {
        Self {
            cli: cli.map(Path::to_path_buf),
            env: std::env::var_os(CONFIG_ENV_VAR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            xdg: default_config_path(),
        }
    }
}

/// Default config file path under the XDG config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("docket_lake").join(CONFIG_FILE_NAME))
}

/// Resolve the effective configuration.
///
/// Explicit (CLI or env) paths must exist; a missing XDG file falls back to
/// defaults.
pub fn resolve_config(paths: &ConfigPaths) -> Result<(ConvertConfig, ConfigSource), ConfigError> {
    if let Some(path) = &paths.cli {
        return Ok((ConvertConfig::from_file(path)?, ConfigSource::Cli(path.clone())));
    }
    if let Some(path) = &paths.env {
        return Ok((ConvertConfig::from_file(path)?, ConfigSource::Env(path.clone())));
    }
    if let Some(path) = &paths.xdg {
        if path.exists() {
            return Ok((ConvertConfig::from_file(path)?, ConfigSource::Xdg(path.clone())));
        }
    }
    Ok((ConvertConfig::default(), ConfigSource::Defaults))
}
