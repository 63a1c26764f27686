//! Run statistics.
//!
//! [`RunStats`] is an explicit accumulator: each partition conversion takes
//! one by value and returns it updated, and parallel workers merge theirs
//! at the end. Nothing here is global.

use std::collections::BTreeMap;

use dl_common::{DocketId, Error};
use dl_table::{CompactionReport, Placement};
use serde::{Deserialize, Serialize};

/// Final disposition of one docket in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    Converted,
    Compacted,
    Skipped,
    Failed,
}

/// An error attributed to a docket and, where known, a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    pub code: u32,
    pub message: String,
}

impl ErrorReport {
    pub fn new(table: Option<&str>, error: &Error) -> Self {
        Self {
            table: table.map(str::to_string),
            code: error.code(),
            message: error.to_string(),
        }
    }
}

/// What happened to one table of a docket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReport {
    pub table: String,
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compaction: Option<CompactionReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_columns: Vec<String>,
}

/// Outcome of one docket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionReport {
    pub docket: DocketId,
    pub status: PartitionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub records: usize,
    pub malformed: usize,
    pub tables: Vec<TableReport>,
    pub errors: Vec<ErrorReport>,
}

impl PartitionReport {
    pub fn new(docket: DocketId) -> Self {
        Self {
            docket,
            status: PartitionStatus::Converted,
            reason: None,
            records: 0,
            malformed: 0,
            tables: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn skipped(docket: DocketId, reason: impl Into<String>) -> Self {
        Self {
            status: PartitionStatus::Skipped,
            reason: Some(reason.into()),
            ..Self::new(docket)
        }
    }

    pub fn failed(docket: DocketId, error: &Error) -> Self {
        let mut report = Self::new(docket);
        report.fail(None, error);
        report
    }

    /// Attach an error and mark the partition failed.
    pub fn fail(&mut self, table: Option<&str>, error: &Error) {
        self.status = PartitionStatus::Failed;
        self.errors.push(ErrorReport::new(table, error));
    }

    pub fn rows(&self, table: &str) -> usize {
        self.tables
            .iter()
            .filter(|t| t.table == table)
            .map(|t| t.rows)
            .sum()
    }
}

/// Run-wide counters plus per-docket reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub dockets_processed: usize,
    pub dockets_skipped: usize,
    pub dockets_failed: usize,
    pub records_flattened: usize,
    pub records_malformed: usize,
    pub degraded_columns: usize,
    pub compactions_run: usize,
    pub compactions_failed: usize,
    /// Rows written per table name.
    pub rows_by_table: BTreeMap<String, u64>,
    pub elapsed_ms: u64,
    pub partitions: Vec<PartitionReport>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one finished partition into the counters.
    pub fn record(&mut self, report: PartitionReport) {
        match report.status {
            PartitionStatus::Converted | PartitionStatus::Compacted => self.dockets_processed += 1,
            PartitionStatus::Skipped => self.dockets_skipped += 1,
            PartitionStatus::Failed => self.dockets_failed += 1,
        }
        self.records_flattened += report.records;
        self.records_malformed += report.malformed;
        for table in &report.tables {
            *self.rows_by_table.entry(table.table.clone()).or_default() += table.rows as u64;
            self.degraded_columns += table.degraded_columns.len();
            if table.compaction.is_some() {
                self.compactions_run += 1;
            }
        }
        self.compactions_failed += report
            .errors
            .iter()
            .filter(|e| e.code == Error::COMPACTION_CODE)
            .count();
        self.partitions.push(report);
    }

    /// Combine two accumulators. Partition reports are kept in docket order.
    pub fn merge(mut self, other: RunStats) -> RunStats {
        self.dockets_processed += other.dockets_processed;
        self.dockets_skipped += other.dockets_skipped;
        self.dockets_failed += other.dockets_failed;
        self.records_flattened += other.records_flattened;
        self.records_malformed += other.records_malformed;
        self.degraded_columns += other.degraded_columns;
        self.compactions_run += other.compactions_run;
        self.compactions_failed += other.compactions_failed;
        for (table, rows) in other.rows_by_table {
            *self.rows_by_table.entry(table).or_default() += rows;
        }
        self.elapsed_ms = self.elapsed_ms.max(other.elapsed_ms);
        self.partitions.extend(other.partitions);
        self.partitions.sort_by(|a, b| a.docket.cmp(&b.docket));
        self
    }

    /// True when any docket failed or any compaction was left pending.
    pub fn has_failures(&self) -> bool {
        self.dockets_failed > 0 || self.compactions_failed > 0
    }

    pub fn partition(&self, docket: &DocketId) -> Option<&PartitionReport> {
        self.partitions.iter().find(|p| &p.docket == docket)
    }
}
