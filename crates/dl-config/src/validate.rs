//! Configuration errors and semantic validation.

use thiserror::Error;

use crate::settings::ConvertConfig;

/// Upper bound on configured worker threads.
pub const MAX_WORKERS: usize = 1024;

/// Threshold above which compaction effectively never runs.
const LARGE_THRESHOLD_WARNING: usize = 10_000;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

impl From<ConfigError> for dl_common::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Invalid(errors) => dl_common::Error::InvalidConfig(errors.join("; ")),
            other => dl_common::Error::Config(other.to_string()),
        }
    }
}

/// Outcome of semantic validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert into a `Result`, failing with every collected error.
    pub fn into_result(self) -> Result<Vec<String>, ConfigError> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(ConfigError::Invalid(self.errors))
        }
    }
}

/// Check a configuration for semantic problems, collecting all of them.
pub fn validate(config: &ConvertConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.compaction_threshold == 0 {
        result
            .errors
            .push("compaction_threshold must be at least 1".to_string());
    } else if config.compaction_threshold > LARGE_THRESHOLD_WARNING {
        result.warnings.push(format!(
            "compaction_threshold {} is very large; delta files will accumulate",
            config.compaction_threshold
        ));
    }

    if config.workers > MAX_WORKERS {
        result.errors.push(format!(
            "workers must be at most {MAX_WORKERS}, got {}",
            config.workers
        ));
    }

    if let Some(agency) = &config.agency {
        let agency = agency.trim();
        if agency.is_empty() {
            result.errors.push("agency filter must not be empty".to_string());
        } else if !agency.chars().all(|c| c.is_ascii_alphanumeric()) {
            result
                .errors
                .push(format!("agency filter must be alphanumeric, got '{agency}'"));
        }
    }

    if let Some(pattern) = &config.docket_pattern {
        if pattern.trim().is_empty() {
            result
                .errors
                .push("docket_pattern must not be empty".to_string());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let result = validate(&ConvertConfig::default());
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_collects_all_errors() {
        let config = ConvertConfig {
            compaction_threshold: 0,
            workers: MAX_WORKERS + 1,
            agency: Some("D-A".to_string()),
            docket_pattern: Some("  ".to_string()),
            ..ConvertConfig::default()
        };
        let result = validate(&config);
        assert_eq!(result.errors.len(), 4);
        let err = result.into_result().unwrap_err();
        assert!(err.to_string().contains("compaction_threshold"));
    }

    #[test]
    fn test_large_threshold_warns() {
        let config = ConvertConfig {
            compaction_threshold: 50_000,
            ..ConvertConfig::default()
        };
        let warnings = validate(&config).into_result().unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_converts_to_common_error() {
        let err: dl_common::Error = ConfigError::Invalid(vec!["bad".to_string()]).into();
        assert_eq!(err.code(), 11);
    }
}
