//! Partition and record-kind identity types.
//!
//! A partition is one docket. The docket ID's leading token names the owning
//! agency, which is used only to place output files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Agency code used when a docket ID has no separator.
pub const UNKNOWN_AGENCY: &str = "UNKNOWN";

/// Docket identifier, e.g. `DEA-2016-0015`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocketId(pub String);

impl DocketId {
    pub fn new(id: impl Into<String>) -> Self {
        DocketId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Owning agency code.
    ///
    /// `ACF/ACF-2024-0005` → `ACF`, `DEA-2016-0015` → `DEA`, `misc` → `UNKNOWN`.
    pub fn agency(&self) -> &str {
        if let Some((agency, _)) = self.0.split_once('/') {
            agency
        } else if let Some((agency, _)) = self.0.split_once('-') {
            agency
        } else {
            UNKNOWN_AGENCY
        }
    }

    /// Partition-scoped output prefix: `<agency>/<docket>/iceberg`.
    pub fn output_prefix(&self) -> String {
        let name = self.0.rsplit('/').next().unwrap_or(&self.0);
        format!("{}/{}/iceberg", self.agency(), name)
    }
}

impl fmt::Display for DocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocketId {
    fn from(id: &str) -> Self {
        DocketId(id.to_string())
    }
}

/// The three logical record kinds, one output table each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Docket,
    Document,
    Comment,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [RecordKind::Docket, RecordKind::Document, RecordKind::Comment];

    /// Output table name.
    pub fn table_name(self) -> &'static str {
        match self {
            RecordKind::Docket => "docket_info",
            RecordKind::Document => "documents",
            RecordKind::Comment => "comments",
        }
    }

    /// Parse the record `type` field. Accepts the singular and the plural
    /// spelling used by the regulations.gov API.
    pub fn from_wire(type_name: &str) -> Option<Self> {
        match type_name {
            "docket" | "dockets" => Some(RecordKind::Docket),
            "document" | "documents" => Some(RecordKind::Document),
            "comment" | "comments" => Some(RecordKind::Comment),
            _ => None,
        }
    }

    /// Resolve a table name back to its kind.
    pub fn from_table_name(table: &str) -> Option<Self> {
        RecordKind::ALL.into_iter().find(|k| k.table_name() == table)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Docket => write!(f, "docket"),
            RecordKind::Document => write!(f, "document"),
            RecordKind::Comment => write!(f, "comment"),
        }
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordKind::from_wire(s).ok_or_else(|| format!("unknown record kind: {s}"))
    }
}
