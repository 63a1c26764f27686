//! Exit codes for the docket-lake CLI.
//!
//! Exit codes communicate the run outcome without requiring output parsing.

use dl_common::Error;

use crate::stats::RunStats;

/// Exit codes for docket-lake operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Every selected docket converted or skipped cleanly
    Clean = 0,

    /// At least one docket or compaction failed; the rest completed
    PartialFailure = 1,

    /// Configuration error
    ConfigError = 10,

    /// I/O error
    IoError = 13,

    /// Internal/unknown error
    InternalError = 99,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check if this exit code indicates success.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean)
    }

    /// Check if this exit code indicates an error requiring attention.
    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Exit code for a finished run.
    pub fn from_stats(stats: &RunStats) -> Self {
        if stats.has_failures() {
            ExitCode::PartialFailure
        } else {
            ExitCode::Clean
        }
    }

    /// Exit code for an error that stopped the run.
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Config(_) | Error::InvalidConfig(_) => ExitCode::ConfigError,
            Error::Io(_) | Error::Source(_) => ExitCode::IoError,
            _ => ExitCode::InternalError,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}
