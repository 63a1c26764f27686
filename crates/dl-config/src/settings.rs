//! Run configuration types.

use dl_common::Compression;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::validate::ConfigError;

/// Default number of accumulated delta files that triggers compaction.
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 50;

/// What to do with a record that cannot be flattened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Count the record and continue with the rest of the partition.
    #[default]
    Skip,
    /// Fail the whole partition.
    Abort,
}

/// Complete conversion run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConvertConfig {
    /// Codec for every table file written in the run.
    pub compression: Compression,

    /// Number of deltas after which a table is compacted into a new base.
    pub compaction_threshold: usize,

    /// Worker threads across partitions. 0 means one per available CPU.
    pub workers: usize,

    /// Skip dockets that already have persisted table state.
    pub resume: bool,

    /// Handling of records that fail to flatten.
    pub malformed: MalformedPolicy,

    /// Only convert dockets owned by this agency.
    pub agency: Option<String>,

    /// Only convert dockets whose ID matches this glob pattern.
    pub docket_pattern: Option<String>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            workers: 0,
            resume: false,
            malformed: MalformedPolicy::default(),
            agency: None,
            docket_pattern: None,
        }
    }
}

impl ConvertConfig {
    /// Load configuration from a JSON or TOML file (chosen by extension).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let parsed = if is_toml {
            Self::parse_toml(&content)
        } else {
            Self::parse_json(&content)
        };
        parsed.map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parse configuration from a JSON string.
    pub fn parse_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: format!("invalid JSON: {e}"),
        })
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: format!("invalid TOML: {e}"),
        })
    }

    /// Resolved worker count (never 0).
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Agency filter normalized to upper case.
    pub fn agency_filter(&self) -> Option<String> {
        self.agency.as_ref().map(|a| a.trim().to_ascii_uppercase())
    }
}
