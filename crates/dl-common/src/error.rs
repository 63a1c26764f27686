//! Error types for Docket Lake.

use thiserror::Error;

/// Result type alias for Docket Lake operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for Docket Lake.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Record errors (20-29)
    #[error("malformed record {origin}: {reason}")]
    MalformedRecord { origin: String, reason: String },

    // Source errors (30-39)
    #[error("record source error: {0}")]
    Source(String),

    // Table output errors (40-49)
    #[error("failed to write {table} for {docket}: {message}")]
    MaterializeWrite {
        docket: String,
        table: String,
        message: String,
    },

    #[error("materialize failed: {0}")]
    Materialize(String),

    #[error("compaction of {table} for {docket} failed: {message}")]
    Compaction {
        docket: String,
        table: String,
        message: String,
    },

    #[error("manifest corrupted at {path}: {message}")]
    ManifestCorrupted { path: String, message: String },

    #[error("checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    // I/O and encoding errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("arrow error: {0}")]
    Arrow(String),
}

impl Error {
    /// Code of [`Error::Compaction`].
    pub const COMPACTION_CODE: u32 = 42;

    /// Returns the error code for this error type.
    /// Used for per-partition error attribution in the run summary.
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidConfig(_) => 11,
            Error::MalformedRecord { .. } => 20,
            Error::Source(_) => 30,
            Error::MaterializeWrite { .. } => 40,
            Error::Materialize(_) => 41,
            Error::Compaction { .. } => Self::COMPACTION_CODE,
            Error::ManifestCorrupted { .. } => 43,
            Error::ChecksumMismatch { .. } => 44,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::Parquet(_) => 62,
            Error::Arrow(_) => 63,
        }
    }

    /// Shorthand for a malformed-record error.
    pub fn malformed(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedRecord {
            origin: origin.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is an I/O failure of the backing store.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::MaterializeWrite { .. })
    }
}
