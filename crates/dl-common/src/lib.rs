//! Docket Lake common types, IDs, and errors.
//!
//! This crate provides foundational types shared across the workspace:
//! - Docket (partition) and record-kind identity
//! - Tagged scalar values and the type-generality order
//! - Run-wide compression codec selection
//! - Format versioning
//! - Common error types

pub mod codec;
pub mod error;
pub mod id;
pub mod schema;
pub mod value;

pub use codec::Compression;
pub use error::{Error, Result};
pub use id::{DocketId, RecordKind};
pub use schema::FORMAT_VERSION;
pub use value::{FlatRow, ScalarType, ScalarValue};
