//! Conversion pipeline.
//!
//! For each docket: read records, decide column names per kind, flatten,
//! unify each kind against the committed schema, and hand the resulting
//! tables to the delta manager.
//! Dockets are independent, so a run is a fold over dockets, optionally
//! spread across a rayon pool.

use std::sync::Arc;
use std::time::Instant;

use dl_common::{DocketId, Error, FlatRow, RecordKind, Result};
use dl_config::{ConvertConfig, MalformedPolicy};
use dl_table::delta::base_name;
use dl_table::{
    unify_with, CompactionOutcome, DeltaManager, ObjectStore, Placement, Table, TableSchema,
};
use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::flatten::{flatten_with, ColumnNames, RawRecord};
use crate::source::RecordSource;
use crate::stats::{ErrorReport, PartitionReport, PartitionStatus, RunStats, TableReport};

/// Converts dockets from a record source into tables in an object store.
pub struct Converter {
    source: Arc<dyn RecordSource>,
    manager: DeltaManager,
    config: ConvertConfig,
}

impl Converter {
    pub fn new(
        source: Arc<dyn RecordSource>,
        store: Arc<dyn ObjectStore>,
        config: ConvertConfig,
    ) -> Self {
        let manager = DeltaManager::new(store, config.compaction_threshold, config.compression);
        Self {
            source,
            manager,
            config,
        }
    }

    pub fn manager(&self) -> &DeltaManager {
        &self.manager
    }

    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    /// Convert one docket and fold its report into `stats`. Never fails;
    /// problems are recorded in the report.
    pub fn convert_docket(&self, docket: &DocketId, mut stats: RunStats) -> RunStats {
        let started = Instant::now();
        let report = self.convert_partition(docket);
        debug!(
            docket = %docket,
            status = ?report.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "docket finished"
        );
        stats.record(report);
        stats
    }

    fn convert_partition(&self, docket: &DocketId) -> PartitionReport {
        if self.config.resume {
            match self.manager.has_state(docket) {
                Ok(true) => {
                    info!(docket = %docket, "already converted, skipping");
                    return PartitionReport::skipped(docket.clone(), "already converted");
                }
                Ok(false) => {}
                Err(e) => return PartitionReport::failed(docket.clone(), &e),
            }
        }

        let records = match self.source.records(docket) {
            Ok(records) => records,
            Err(e) => {
                warn!(docket = %docket, error = %e, "failed to read records");
                return PartitionReport::failed(docket.clone(), &e);
            }
        };
        if records.is_empty() {
            info!(docket = %docket, "no data found");
            return PartitionReport::skipped(docket.clone(), "no data found");
        }

        let mut report = PartitionReport::new(docket.clone());
        let mut bodies: IndexMap<RecordKind, Vec<(String, RawRecord)>> =
            RecordKind::ALL.into_iter().map(|k| (k, Vec::new())).collect();

        for record in records {
            match record.body {
                Ok(body) => bodies.entry(record.kind).or_default().push((record.origin, body)),
                Err(reason) => {
                    let e = Error::malformed(&record.origin, reason);
                    if self.reject(docket, record.kind, &record.origin, &e, &mut report) {
                        return report;
                    }
                }
            }
        }

        // Flatten every kind before writing any, so an abort leaves no output.
        let mut tables = Vec::new();
        for (kind, bodies) in bodies {
            if bodies.is_empty() {
                continue;
            }
            let prior = match self.manager.manifest(docket, kind) {
                Ok(manifest) => manifest.map(|m| m.schema).unwrap_or_else(TableSchema::new),
                Err(e) => {
                    warn!(docket = %docket, table = kind.table_name(), error = %e, "unreadable manifest");
                    report.fail(Some(kind.table_name()), &e);
                    continue;
                }
            };

            let mut names = ColumnNames::new();
            for column in prior.column_names() {
                names.observe_column(column);
            }
            for (_, body) in &bodies {
                names.observe(body);
            }

            let mut rows = Vec::with_capacity(bodies.len());
            for (origin, body) in &bodies {
                match flatten_with(body, kind, origin, &names) {
                    Ok(row) => {
                        report.records += 1;
                        rows.push(row);
                    }
                    Err(e) => {
                        if self.reject(docket, kind, origin, &e, &mut report) {
                            return report;
                        }
                    }
                }
            }
            if !rows.is_empty() {
                tables.push((kind, prior, rows));
            }
        }

        for (kind, prior, rows) in tables {
            if let Err(e) = self.write_kind(docket, kind, &prior, rows, &mut report) {
                warn!(docket = %docket, table = kind.table_name(), error = %e, "table write failed");
                report.fail(Some(kind.table_name()), &e);
            }
        }
        report
    }

    /// Count a malformed record. True when the partition must stop.
    fn reject(
        &self,
        docket: &DocketId,
        kind: RecordKind,
        origin: &str,
        error: &Error,
        report: &mut PartitionReport,
    ) -> bool {
        report.malformed += 1;
        warn!(docket = %docket, origin = %origin, error = %error, "malformed record");
        if self.config.malformed == MalformedPolicy::Abort {
            report.fail(Some(kind.table_name()), error);
            return true;
        }
        false
    }

    fn write_kind(
        &self,
        docket: &DocketId,
        kind: RecordKind,
        prior: &TableSchema,
        rows: Vec<FlatRow>,
        report: &mut PartitionReport,
    ) -> Result<()> {
        let unified = unify_with(prior, rows);
        for degraded in &unified.degraded {
            warn!(
                docket = %docket,
                table = kind.table_name(),
                column = %degraded.column,
                observed = ?degraded.observed,
                "column degraded to string"
            );
        }
        let degraded_columns = unified
            .degraded
            .iter()
            .map(|d| d.column.clone())
            .collect();

        let table = Table::from_unified(kind, unified);
        let outcome = self.manager.write_table(docket, &table)?;
        if let Some(e) = &outcome.compaction_error {
            report
                .errors
                .push(ErrorReport::new(Some(kind.table_name()), e));
        }
        report.tables.push(TableReport {
            table: kind.table_name().to_string(),
            rows: outcome.rows,
            placement: Some(outcome.placement),
            file: Some(outcome.file),
            compaction: outcome.compaction,
            degraded_columns,
        });
        Ok(())
    }

    /// Convert every docket the source yields.
    pub fn convert_all(&self) -> Result<RunStats> {
        let started = Instant::now();
        let dockets = self.source.dockets()?;
        let workers = self.config.effective_workers();
        info!(dockets = dockets.len(), workers, "starting conversion");

        let mut stats = if workers == 1 || dockets.len() <= 1 {
            dockets
                .iter()
                .fold(RunStats::new(), |acc, docket| self.convert_docket(docket, acc))
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .map_err(|e| Error::Config(format!("failed to start worker pool: {e}")))?;
            pool.install(|| {
                dockets
                    .par_iter()
                    .fold(RunStats::new, |acc, docket| self.convert_docket(docket, acc))
                    .reduce(RunStats::new, RunStats::merge)
            })
        };

        stats.partitions.sort_by(|a, b| a.docket.cmp(&b.docket));
        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            processed = stats.dockets_processed,
            skipped = stats.dockets_skipped,
            failed = stats.dockets_failed,
            records = stats.records_flattened,
            malformed = stats.records_malformed,
            elapsed_ms = stats.elapsed_ms,
            "conversion finished"
        );
        Ok(stats)
    }

    /// Compact every table that has outstanding deltas.
    pub fn compact_all(&self) -> Result<RunStats> {
        compact_store(&self.manager)
    }
}

/// Compact every table with deltas under the manager's store.
pub fn compact_store(manager: &DeltaManager) -> Result<RunStats> {
    let started = Instant::now();
    let mut reports: IndexMap<DocketId, PartitionReport> = IndexMap::new();

    for key in manager.manifest_keys()? {
        let manifest = match manager.manifest_at(&key) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => continue,
            Err(e) => {
                warn!(path = %key, error = %e, "unreadable manifest");
                let docket = docket_from_key(&key);
                reports
                    .entry(docket.clone())
                    .or_insert_with(|| compacted(docket))
                    .fail(None, &e);
                continue;
            }
        };
        let Some(kind) = manifest.kind() else {
            continue;
        };
        let docket = manifest.docket.clone();
        let report = reports
            .entry(docket.clone())
            .or_insert_with(|| compacted(docket.clone()));

        match manager.compact(&docket, kind) {
            Ok(CompactionOutcome::Compacted(done)) => report.tables.push(TableReport {
                table: kind.table_name().to_string(),
                rows: done.rows,
                placement: Some(Placement::Base {
                    generation: done.generation,
                }),
                file: Some(base_name(kind, done.generation)),
                compaction: Some(done),
                degraded_columns: Vec::new(),
            }),
            Ok(CompactionOutcome::NotNeeded) => {}
            Err(e) => {
                warn!(docket = %docket, table = kind.table_name(), error = %e, "compaction failed");
                report
                    .errors
                    .push(ErrorReport::new(Some(kind.table_name()), &e));
            }
        }
    }

    let mut stats = RunStats::new();
    for (_, report) in reports {
        stats.record(report);
    }
    stats.elapsed_ms = started.elapsed().as_millis() as u64;
    info!(
        compacted = stats.compactions_run,
        failed = stats.compactions_failed,
        "compaction finished"
    );
    Ok(stats)
}

fn compacted(docket: DocketId) -> PartitionReport {
    PartitionReport {
        status: PartitionStatus::Compacted,
        ..PartitionReport::new(docket)
    }
}

/// Docket named by a manifest key `<agency>/<docket>/iceberg/<file>`.
fn docket_from_key(key: &str) -> DocketId {
    let mut parts = key.rsplit('/');
    DocketId::new(parts.nth(2).unwrap_or(key))
}
