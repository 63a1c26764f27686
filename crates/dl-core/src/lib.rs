//! Docket Lake conversion core.
//!
//! This crate provides:
//! - Record sources (Mirrulations filesystem mirror, in-memory)
//! - Record flattening into scalar rows
//! - The per-docket conversion pipeline and run statistics
//! - Logging setup and CLI exit codes

pub mod exit_codes;
pub mod flatten;
pub mod logging;
pub mod pipeline;
pub mod source;
pub mod stats;

pub use exit_codes::ExitCode;
pub use flatten::{flatten, flatten_record, flatten_with, ColumnNames, RawRecord};
pub use pipeline::{compact_store, Converter};
pub use source::{DocketFilter, FsRecordSource, MemoryRecordSource, RecordSource, SourceRecord};
pub use stats::{ErrorReport, PartitionReport, PartitionStatus, RunStats, TableReport};
