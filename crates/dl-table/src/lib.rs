//! Docket Lake table storage.
//!
//! This crate provides:
//! - Schema unification across heterogeneous flattened rows
//! - Parquet materialization with run-wide compression
//! - Whole-object stores (local filesystem, in-memory)
//! - Base/delta placement with threshold-triggered compaction

pub mod delta;
pub mod schema;
pub mod store;
pub mod writer;

pub use delta::{
    merge_by_id, CompactionOutcome, CompactionReport, DeltaManager, FileEntry, Placement,
    TableManifest, TableState, WriteOutcome,
};
pub use schema::{unify, unify_with, DegradedColumn, SchemaUnifier, TableSchema, Unified};
pub use store::{LocalStore, MemoryStore, ObjectStore, StoreOp};
pub use writer::{materialize, read_table, Table};
