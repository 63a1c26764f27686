//! Incremental placement of tables as one base file plus small deltas.
//!
//! Each (docket, table) pair owns a JSON manifest naming the current base
//! file and the ordered delta files written since. The backing store only
//! supports whole-object writes, so new rows always land in a fresh file and
//! become visible when the manifest that references them is published.
//!
//! State machine, derived from the persisted manifest:
//!
//! ```text
//! Uninitialized ──write──► Stable ──write──► Accumulating(1)
//!                            ▲                  │ write
//!                            │                  ▼
//!                            └──compact── Accumulating(n), n = threshold
//! ```
//!
//! Compaction reads the base and every delta, merges them with
//! later-row-wins by `id`, writes one new base under the next generation and
//! then publishes the manifest. Old files are deleted after the publish and
//! any that survive are simply unreferenced.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dl_common::{Compression, DocketId, Error, FlatRow, RecordKind, Result, ScalarValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::schema::{unify_with, TableSchema};
use crate::store::ObjectStore;
use crate::writer::{read_table, Table};

/// Suffix of per-table manifest objects.
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

/// Column used to resolve overrides between base and delta rows.
pub const ID_COLUMN: &str = "id";

// ── Manifest ────────────────────────────────────────────────────────────

/// One data file referenced by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name relative to the partition prefix.
    pub path: String,
    pub rows: usize,
    /// Hex SHA-256 of the file contents.
    pub sha256: String,
}

impl FileEntry {
    fn new(path: String, rows: usize, data: &[u8]) -> Self {
        Self {
            path,
            rows,
            sha256: sha256_hex(data),
        }
    }
}

/// Commit record for one (docket, table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableManifest {
    pub format_version: String,
    pub docket: DocketId,
    pub table: String,
    /// Number of base files written so far; names the current base.
    pub generation: u32,
    pub base: FileEntry,
    /// Deltas in write order.
    pub deltas: Vec<FileEntry>,
    pub next_seq: u32,
    /// Union of the base and delta schemas.
    pub schema: TableSchema,
    pub updated_at: DateTime<Utc>,
}

impl TableManifest {
    pub fn kind(&self) -> Option<RecordKind> {
        RecordKind::from_table_name(&self.table)
    }

    pub fn state(&self) -> TableState {
        if self.deltas.is_empty() {
            TableState::Stable {
                generation: self.generation,
            }
        } else {
            TableState::Accumulating {
                generation: self.generation,
                deltas: self.deltas.len(),
            }
        }
    }

    /// Total rows across the base and all deltas, before override merging.
    pub fn stored_rows(&self) -> usize {
        self.base.rows + self.deltas.iter().map(|d| d.rows).sum::<usize>()
    }
}

/// Persisted placement state of one table.
///
/// Compaction runs inside a single call and is never observed as a
/// persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TableState {
    Uninitialized,
    Stable { generation: u32 },
    Accumulating { generation: u32, deltas: usize },
}

/// Where a write landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "placement", rename_all = "snake_case")]
pub enum Placement {
    Base { generation: u32 },
    Delta { generation: u32, seq: u32 },
}

/// Result of a successful compaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub generation: u32,
    pub merged_deltas: usize,
    pub rows: usize,
    pub degraded_columns: usize,
}

/// Result of an explicit compaction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    NotNeeded,
    Compacted(CompactionReport),
}

/// Result of a table write.
#[derive(Debug)]
pub struct WriteOutcome {
    pub placement: Placement,
    pub file: String,
    pub rows: usize,
    /// Persisted state after the write and any triggered compaction.
    pub state: TableState,
    pub compaction: Option<CompactionReport>,
    /// A triggered compaction that failed. The write itself is durable.
    pub compaction_error: Option<Error>,
}

// ── Naming ──────────────────────────────────────────────────────────────

pub fn manifest_name(kind: RecordKind) -> String {
    format!("{}{MANIFEST_SUFFIX}", kind.table_name())
}

pub fn base_name(kind: RecordKind, generation: u32) -> String {
    format!("{}.base-{generation:05}.parquet", kind.table_name())
}

pub fn delta_name(kind: RecordKind, generation: u32, seq: u32) -> String {
    format!("{}.delta-{generation:05}-{seq:05}.parquet", kind.table_name())
}

fn object_key(docket: &DocketId, file: &str) -> String {
    format!("{}/{file}", docket.output_prefix())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Merge row batches in order. A row whose `id` was already seen replaces
/// the earlier row in place; rows without an `id` are appended.
pub fn merge_by_id<I>(batches: I) -> Vec<FlatRow>
where
    I: IntoIterator<Item = Vec<FlatRow>>,
{
    let mut merged: Vec<FlatRow> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for batch in batches {
        for row in batch {
            let id = row
                .get(ID_COLUMN)
                .filter(|v| !v.is_null())
                .map(ScalarValue::to_string);
            match id {
                Some(id) => match positions.get(&id) {
                    Some(&at) => merged[at] = row,
                    None => {
                        positions.insert(id, merged.len());
                        merged.push(row);
                    }
                },
                None => merged.push(row),
            }
        }
    }
    merged
}

// ── Manager ─────────────────────────────────────────────────────────────

/// Decides base/delta placement and runs compaction for every table under
/// one store.
#[derive(Clone)]
pub struct DeltaManager {
    store: Arc<dyn ObjectStore>,
    threshold: usize,
    compression: Compression,
}

impl std::fmt::Debug for DeltaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaManager")
            .field("threshold", &self.threshold)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

impl DeltaManager {
    /// `threshold` is the delta count that triggers compaction; values
    /// below 1 are treated as 1.
    pub fn new(store: Arc<dyn ObjectStore>, threshold: usize, compression: Compression) -> Self {
        Self {
            store,
            threshold: threshold.max(1),
            compression,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Load the committed manifest, if any.
    pub fn manifest(&self, docket: &DocketId, kind: RecordKind) -> Result<Option<TableManifest>> {
        self.load_manifest(&object_key(docket, &manifest_name(kind)))
    }

    pub fn state(&self, docket: &DocketId, kind: RecordKind) -> Result<TableState> {
        Ok(self
            .manifest(docket, kind)?
            .map(|m| m.state())
            .unwrap_or(TableState::Uninitialized))
    }

    /// Whether any table of the docket has committed output.
    pub fn has_state(&self, docket: &DocketId) -> Result<bool> {
        for kind in RecordKind::ALL {
            if self
                .store
                .exists(&object_key(docket, &manifest_name(kind)))?
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Store keys of every manifest, sorted.
    pub fn manifest_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .list("")?
            .into_iter()
            .filter(|key| key.ends_with(MANIFEST_SUFFIX))
            .collect())
    }

    /// Load the manifest stored at `key`.
    pub fn manifest_at(&self, key: &str) -> Result<Option<TableManifest>> {
        self.load_manifest(key)
    }

    /// Every committed manifest in the store, ordered by key.
    pub fn manifests(&self) -> Result<Vec<TableManifest>> {
        let mut manifests = Vec::new();
        for key in self.manifest_keys()? {
            if let Some(manifest) = self.load_manifest(&key)? {
                manifests.push(manifest);
            }
        }
        Ok(manifests)
    }

    /// Place `table` as the base (first write) or as the next delta,
    /// compacting when the delta count reaches the threshold.
    pub fn write_table(&self, docket: &DocketId, table: &Table) -> Result<WriteOutcome> {
        let kind = table.kind;
        let write_err = |e: Error| Error::MaterializeWrite {
            docket: docket.to_string(),
            table: kind.table_name().to_string(),
            message: e.to_string(),
        };

        let data = table.to_parquet(self.compression)?;
        let manifest = self.manifest(docket, kind)?;

        let Some(mut manifest) = manifest else {
            let file = base_name(kind, 1);
            let entry = FileEntry::new(file.clone(), table.len(), &data);
            self.put_data(docket, &file, data).map_err(write_err)?;

            let manifest = TableManifest {
                format_version: dl_common::FORMAT_VERSION.to_string(),
                docket: docket.clone(),
                table: kind.table_name().to_string(),
                generation: 1,
                base: entry,
                deltas: Vec::new(),
                next_seq: 1,
                schema: table.schema.clone(),
                updated_at: Utc::now(),
            };
            if let Err(e) = self.publish(&manifest) {
                self.discard(docket, &file);
                return Err(write_err(e));
            }
            debug!(docket = %docket, table = kind.table_name(), rows = table.len(), "base written");
            return Ok(WriteOutcome {
                placement: Placement::Base { generation: 1 },
                file,
                rows: table.len(),
                state: manifest.state(),
                compaction: None,
                compaction_error: None,
            });
        };

        let generation = manifest.generation;
        let seq = manifest.next_seq;
        let file = delta_name(kind, generation, seq);
        let entry = FileEntry::new(file.clone(), table.len(), &data);
        self.put_data(docket, &file, data).map_err(write_err)?;

        manifest.deltas.push(entry);
        manifest.next_seq = seq + 1;
        for (name, ty) in table.schema.columns() {
            manifest.schema.observe(name, ty);
        }
        manifest.updated_at = Utc::now();
        if let Err(e) = self.publish(&manifest) {
            self.discard(docket, &file);
            return Err(write_err(e));
        }
        debug!(
            docket = %docket,
            table = kind.table_name(),
            seq,
            deltas = manifest.deltas.len(),
            rows = table.len(),
            "delta written"
        );

        let mut outcome = WriteOutcome {
            placement: Placement::Delta { generation, seq },
            file,
            rows: table.len(),
            state: manifest.state(),
            compaction: None,
            compaction_error: None,
        };
        if manifest.deltas.len() >= self.threshold {
            match self.compact_manifest(kind, &manifest) {
                Ok(report) => {
                    outcome.state = TableState::Stable {
                        generation: report.generation,
                    };
                    outcome.compaction = Some(report);
                }
                Err(e) => {
                    warn!(docket = %docket, table = kind.table_name(), error = %e, "compaction failed, deltas retained");
                    outcome.compaction_error = Some(e);
                }
            }
        }
        Ok(outcome)
    }

    /// Fold all deltas into a new base. A no-op without deltas.
    pub fn compact(&self, docket: &DocketId, kind: RecordKind) -> Result<CompactionOutcome> {
        match self.manifest(docket, kind)? {
            Some(manifest) if !manifest.deltas.is_empty() => self
                .compact_manifest(kind, &manifest)
                .map(CompactionOutcome::Compacted),
            _ => Ok(CompactionOutcome::NotNeeded),
        }
    }

    /// The merged view of base ∪ deltas, conformed to the committed schema.
    pub fn read_logical(&self, docket: &DocketId, kind: RecordKind) -> Result<Option<Table>> {
        let Some(manifest) = self.manifest(docket, kind)? else {
            return Ok(None);
        };
        let merged = self.read_merged(&manifest)?;
        let unified = unify_with(&manifest.schema, merged);
        Ok(Some(Table::from_unified(kind, unified)))
    }

    fn compact_manifest(&self, kind: RecordKind, current: &TableManifest) -> Result<CompactionReport> {
        let docket = &current.docket;
        let compaction_err = |e: Error| Error::Compaction {
            docket: docket.to_string(),
            table: kind.table_name().to_string(),
            message: e.to_string(),
        };

        let merged = self.read_merged(current).map_err(compaction_err)?;
        let unified = unify_with(&current.schema, merged);
        let degraded_columns = unified.degraded.len();
        let table = Table::from_unified(kind, unified);
        let data = table.to_parquet(self.compression).map_err(compaction_err)?;

        let generation = current.generation + 1;
        let file = base_name(kind, generation);
        let entry = FileEntry::new(file.clone(), table.len(), &data);
        if let Err(e) = self.put_data(docket, &file, data) {
            self.discard(docket, &file);
            return Err(compaction_err(e));
        }

        let next = TableManifest {
            format_version: dl_common::FORMAT_VERSION.to_string(),
            docket: docket.clone(),
            table: kind.table_name().to_string(),
            generation,
            base: entry,
            deltas: Vec::new(),
            next_seq: 1,
            schema: table.schema.clone(),
            updated_at: Utc::now(),
        };
        if let Err(e) = self.publish(&next) {
            self.discard(docket, &file);
            return Err(compaction_err(e));
        }

        // Committed. Old files are now unreferenced.
        self.discard(docket, &current.base.path);
        for delta in &current.deltas {
            self.discard(docket, &delta.path);
        }

        info!(
            docket = %docket,
            table = kind.table_name(),
            generation,
            merged_deltas = current.deltas.len(),
            rows = table.len(),
            "compacted"
        );
        Ok(CompactionReport {
            generation,
            merged_deltas: current.deltas.len(),
            rows: table.len(),
            degraded_columns,
        })
    }

    fn read_merged(&self, manifest: &TableManifest) -> Result<Vec<FlatRow>> {
        let mut batches = Vec::with_capacity(manifest.deltas.len() + 1);
        for entry in std::iter::once(&manifest.base).chain(&manifest.deltas) {
            let (_, rows) = read_table(self.read_verified(&manifest.docket, entry)?)?;
            batches.push(rows);
        }
        Ok(merge_by_id(batches))
    }

    fn read_verified(&self, docket: &DocketId, entry: &FileEntry) -> Result<Bytes> {
        let key = object_key(docket, &entry.path);
        let data = self
            .store
            .get(&key)?
            .ok_or_else(|| Error::ManifestCorrupted {
                path: key.clone(),
                message: "referenced file is missing".to_string(),
            })?;
        let actual = sha256_hex(&data);
        if actual != entry.sha256 {
            return Err(Error::ChecksumMismatch {
                path: key,
                expected: entry.sha256.clone(),
                actual,
            });
        }
        Ok(data)
    }

    fn load_manifest(&self, key: &str) -> Result<Option<TableManifest>> {
        let Some(data) = self.store.get(key)? else {
            return Ok(None);
        };
        let manifest: TableManifest =
            serde_json::from_slice(&data).map_err(|e| Error::ManifestCorrupted {
                path: key.to_string(),
                message: e.to_string(),
            })?;
        if !dl_common::schema::is_compatible(&manifest.format_version) {
            return Err(Error::ManifestCorrupted {
                path: key.to_string(),
                message: format!("unsupported format version {}", manifest.format_version),
            });
        }
        Ok(Some(manifest))
    }

    fn publish(&self, manifest: &TableManifest) -> Result<()> {
        let kind = manifest
            .kind()
            .ok_or_else(|| Error::Materialize(format!("unknown table {}", manifest.table)))?;
        let data = serde_json::to_vec_pretty(manifest)?;
        self.store.put(
            &object_key(&manifest.docket, &manifest_name(kind)),
            Bytes::from(data),
        )
    }

    fn put_data(&self, docket: &DocketId, file: &str, data: Bytes) -> Result<()> {
        self.store.put(&object_key(docket, file), data)
    }

    /// Best-effort removal of an unreferenced file.
    fn discard(&self, docket: &DocketId, file: &str) {
        let key = object_key(docket, file);
        if let Err(e) = self.store.delete(&key) {
            warn!(path = %key, error = %e, "failed to remove unreferenced file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::unify;
    use crate::store::{MemoryStore, StoreOp};
    use dl_common::ScalarType;
    use proptest::prelude::*;

    const DOCKET: &str = "DEA-2016-0015";

    fn docket() -> DocketId {
        DocketId::from(DOCKET)
    }

    fn manager(store: &MemoryStore, threshold: usize) -> DeltaManager {
        DeltaManager::new(Arc::new(store.clone()), threshold, Compression::Fast)
    }

    fn comments(rows: &[(&str, i64)]) -> Table {
        let rows = rows
            .iter()
            .map(|(id, v)| {
                let mut row = FlatRow::new();
                row.insert("id".into(), ScalarValue::from(*id));
                row.insert("v".into(), ScalarValue::Int(*v));
                row
            })
            .collect();
        Table::from_unified(RecordKind::Comment, unify(rows))
    }

    fn ids(table: &Table) -> Vec<String> {
        table.rows.iter().map(|r| r["id"].to_string()).collect()
    }

    fn parquet_keys(store: &MemoryStore) -> Vec<String> {
        store
            .keys()
            .unwrap()
            .into_iter()
            .filter(|k| k.ends_with(".parquet"))
            .collect()
    }

    #[test]
    fn test_first_write_is_base_then_delta() {
        let store = MemoryStore::new();
        let mgr = manager(&store, 50);
        let d = docket();
        assert_eq!(mgr.state(&d, RecordKind::Comment).unwrap(), TableState::Uninitialized);

        let first = mgr.write_table(&d, &comments(&[("c1", 1)])).unwrap();
        assert_eq!(first.placement, Placement::Base { generation: 1 });
        assert_eq!(first.file, "comments.base-00001.parquet");
        assert_eq!(first.state, TableState::Stable { generation: 1 });

        let second = mgr.write_table(&d, &comments(&[("c2", 2)])).unwrap();
        assert_eq!(second.placement, Placement::Delta { generation: 1, seq: 1 });
        assert_eq!(second.file, "comments.delta-00001-00001.parquet");
        assert_eq!(
            mgr.state(&d, RecordKind::Comment).unwrap(),
            TableState::Accumulating {
                generation: 1,
                deltas: 1
            }
        );
        assert!(store
            .keys()
            .unwrap()
            .contains(&"DEA/DEA-2016-0015/iceberg/comments.manifest.json".to_string()));
    }

    #[test]
    fn test_threshold_49_then_50() {
        let store = MemoryStore::new();
        let mgr = manager(&store, 50);
        let d = docket();
        mgr.write_table(&d, &comments(&[("c0", 0)])).unwrap();
        let base = mgr.manifest(&d, RecordKind::Comment).unwrap().unwrap().base;

        for i in 1..=49 {
            let id = format!("c{i}");
            let out = mgr.write_table(&d, &comments(&[(&id, i)])).unwrap();
            assert!(out.compaction.is_none());
        }
        let manifest = mgr.manifest(&d, RecordKind::Comment).unwrap().unwrap();
        assert_eq!(
            manifest.state(),
            TableState::Accumulating {
                generation: 1,
                deltas: 49
            }
        );
        assert_eq!(manifest.base, base);
        assert_eq!(parquet_keys(&store).len(), 50);

        let out = mgr.write_table(&d, &comments(&[("c50", 50)])).unwrap();
        let report = out.compaction.expect("compaction triggered");
        assert_eq!(report.generation, 2);
        assert_eq!(report.merged_deltas, 50);
        assert_eq!(report.rows, 51);
        assert_eq!(out.state, TableState::Stable { generation: 2 });

        let manifest = mgr.manifest(&d, RecordKind::Comment).unwrap().unwrap();
        assert!(manifest.deltas.is_empty());
        assert_eq!(
            parquet_keys(&store),
            vec!["DEA/DEA-2016-0015/iceberg/comments.base-00002.parquet".to_string()]
        );
    }

    #[test]
    fn test_later_write_wins_in_first_position() {
        let store = MemoryStore::new();
        let mgr = manager(&store, 50);
        let d = docket();
        mgr.write_table(&d, &comments(&[("a", 1), ("b", 1)])).unwrap();
        mgr.write_table(&d, &comments(&[("a", 2), ("c", 1)])).unwrap();

        let table = mgr.read_logical(&d, RecordKind::Comment).unwrap().unwrap();
        assert_eq!(ids(&table), vec!["a", "b", "c"]);
        assert_eq!(table.rows[0]["v"], ScalarValue::Int(2));
    }

    #[test]
    fn test_rows_without_id_are_unioned() {
        let mut row = FlatRow::new();
        row.insert("v".into(), ScalarValue::Int(7));
        let merged = merge_by_id(vec![vec![row.clone()], vec![row]]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_delta_schema_widens_manifest_schema() {
        let store = MemoryStore::new();
        let mgr = manager(&store, 50);
        let d = docket();
        mgr.write_table(&d, &comments(&[("a", 1)])).unwrap();

        let mut row = FlatRow::new();
        row.insert("id".into(), "b".into());
        row.insert("v".into(), ScalarValue::Float(1.5));
        row.insert("title".into(), "T".into());
        let delta = Table::from_unified(RecordKind::Comment, unify(vec![row]));
        mgr.write_table(&d, &delta).unwrap();

        let manifest = mgr.manifest(&d, RecordKind::Comment).unwrap().unwrap();
        assert_eq!(manifest.schema.column_names(), vec!["id", "v", "title"]);
        assert_eq!(manifest.schema.get("v"), Some(ScalarType::Float));

        let table = mgr.read_logical(&d, RecordKind::Comment).unwrap().unwrap();
        assert_eq!(table.rows[0]["v"], ScalarValue::Float(1.0));
        assert_eq!(table.rows[0]["title"], ScalarValue::Null);
    }

    #[test]
    fn test_compaction_is_idempotent() {
        let store = MemoryStore::new();
        let mgr = manager(&store, 2);
        let d = docket();
        mgr.write_table(&d, &comments(&[("a", 1)])).unwrap();
        mgr.write_table(&d, &comments(&[("b", 1)])).unwrap();
        mgr.write_table(&d, &comments(&[("c", 1)])).unwrap();
        let before = mgr.manifest(&d, RecordKind::Comment).unwrap().unwrap();
        assert!(before.deltas.is_empty());

        let ops_before = store.operations().unwrap().len();
        assert_eq!(
            mgr.compact(&d, RecordKind::Comment).unwrap(),
            CompactionOutcome::NotNeeded
        );
        let ops = store.operations().unwrap();
        assert!(ops[ops_before..]
            .iter()
            .all(|op| !matches!(op, StoreOp::Put { .. } | StoreOp::Delete { .. })));
        assert_eq!(mgr.manifest(&d, RecordKind::Comment).unwrap().unwrap(), before);
    }

    #[test]
    fn test_compact_uninitialized_is_noop() {
        let store = MemoryStore::new();
        let mgr = manager(&store, 2);
        assert_eq!(
            mgr.compact(&docket(), RecordKind::Docket).unwrap(),
            CompactionOutcome::NotNeeded
        );
    }

    #[test]
    fn test_failed_compaction_keeps_old_state() {
        let store = MemoryStore::new();
        let mgr = manager(&store, 2);
        let d = docket();
        mgr.write_table(&d, &comments(&[("a", 1)])).unwrap();
        mgr.write_table(&d, &comments(&[("b", 1)])).unwrap();

        store
            .inject_write_failure("DEA/DEA-2016-0015/iceberg/comments.base-00002")
            .unwrap();
        let out = mgr.write_table(&d, &comments(&[("c", 1)])).unwrap();
        let err = out.compaction_error.expect("compaction should fail");
        assert_eq!(err.code(), 42);
        assert_eq!(
            out.state,
            TableState::Accumulating {
                generation: 1,
                deltas: 2
            }
        );

        let manifest = mgr.manifest(&d, RecordKind::Comment).unwrap().unwrap();
        assert_eq!(manifest.generation, 1);
        assert_eq!(manifest.deltas.len(), 2);
        let table = mgr.read_logical(&d, RecordKind::Comment).unwrap().unwrap();
        assert_eq!(ids(&table), vec!["a", "b", "c"]);

        store.clear_failures().unwrap();
        assert!(matches!(
            mgr.compact(&d, RecordKind::Comment).unwrap(),
            CompactionOutcome::Compacted(CompactionReport { generation: 2, .. })
        ));
    }

    #[test]
    fn test_failed_publish_removes_new_base() {
        let store = MemoryStore::new();
        let mgr = manager(&store, 10);
        let d = docket();
        mgr.write_table(&d, &comments(&[("a", 1)])).unwrap();
        mgr.write_table(&d, &comments(&[("b", 1)])).unwrap();
        let before = mgr.manifest(&d, RecordKind::Comment).unwrap().unwrap();

        store
            .inject_write_failure("DEA/DEA-2016-0015/iceberg/comments.manifest.json")
            .unwrap();
        let err = mgr.compact(&d, RecordKind::Comment).unwrap_err();
        assert!(matches!(err, Error::Compaction { .. }));

        assert_eq!(mgr.manifest(&d, RecordKind::Comment).unwrap().unwrap(), before);
        assert!(!parquet_keys(&store)
            .iter()
            .any(|k| k.ends_with("comments.base-00002.parquet")));
        assert_eq!(parquet_keys(&store).len(), 2);
    }

    #[test]
    fn test_failed_delta_write_leaves_manifest() {
        let store = MemoryStore::new();
        let mgr = manager(&store, 10);
        let d = docket();
        mgr.write_table(&d, &comments(&[("a", 1)])).unwrap();
        let before = mgr.manifest(&d, RecordKind::Comment).unwrap().unwrap();

        store
            .inject_write_failure("DEA/DEA-2016-0015/iceberg/comments.delta-")
            .unwrap();
        let err = mgr.write_table(&d, &comments(&[("b", 1)])).unwrap_err();
        assert_eq!(err.code(), 40);
        assert_eq!(mgr.manifest(&d, RecordKind::Comment).unwrap().unwrap(), before);
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let store = MemoryStore::new();
        let mgr = manager(&store, 10);
        let d = docket();
        mgr.write_table(&d, &comments(&[("a", 1)])).unwrap();
        mgr.write_table(&d, &comments(&[("b", 1)])).unwrap();

        let delta = "DEA/DEA-2016-0015/iceberg/comments.delta-00001-00001.parquet";
        let mut data = store.get(delta).unwrap().unwrap().to_vec();
        data[0] ^= 0xff;
        store.put(delta, Bytes::from(data)).unwrap();

        let err = mgr.read_logical(&d, RecordKind::Comment).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
        assert_eq!(mgr.compact(&d, RecordKind::Comment).unwrap_err().code(), 42);
    }

    #[test]
    fn test_corrupted_manifest() {
        let store = MemoryStore::new();
        let mgr = manager(&store, 10);
        store
            .put(
                "DEA/DEA-2016-0015/iceberg/documents.manifest.json",
                Bytes::from_static(b"{not json"),
            )
            .unwrap();
        let err = mgr.state(&docket(), RecordKind::Document).unwrap_err();
        assert_eq!(err.code(), 43);
    }

    #[test]
    fn test_has_state_only_probes_existence() {
        let store = MemoryStore::new();
        let mgr = manager(&store, 10);
        let d = docket();
        mgr.write_table(&d, &comments(&[("a", 1)])).unwrap();

        let before = store.operations().unwrap().len();
        assert!(mgr.has_state(&d).unwrap());
        let ops = store.operations().unwrap();
        assert!(ops.len() > before);
        assert!(ops[before..]
            .iter()
            .all(|op| matches!(op, StoreOp::Exists { .. })));
    }

    #[test]
    fn test_has_state_and_manifests() {
        let store = MemoryStore::new();
        let mgr = manager(&store, 10);
        let d = docket();
        assert!(!mgr.has_state(&d).unwrap());
        mgr.write_table(&d, &comments(&[("a", 1)])).unwrap();
        assert!(mgr.has_state(&d).unwrap());
        assert!(!mgr.has_state(&DocketId::from("EPA-2020-0001")).unwrap());

        let manifests = mgr.manifests().unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].kind(), Some(RecordKind::Comment));
        assert_eq!(manifests[0].docket, d);
    }

    #[test]
    fn test_threshold_floor_is_one() {
        let store = MemoryStore::new();
        let mgr = manager(&store, 0);
        assert_eq!(mgr.threshold(), 1);
        let d = docket();
        mgr.write_table(&d, &comments(&[("a", 1)])).unwrap();
        let out = mgr.write_table(&d, &comments(&[("b", 1)])).unwrap();
        assert!(out.compaction.is_some());
    }

    fn batch_strategy() -> impl Strategy<Value = Vec<(String, i64)>> {
        prop::collection::vec(("[a-f]", -100i64..100), 1..5)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        /// The merged view of base plus deltas equals the compacted base.
        #[test]
        fn delta_base_equivalence(batches in prop::collection::vec(batch_strategy(), 1..6)) {
            let store = MemoryStore::new();
            let mgr = manager(&store, 1000);
            let d = docket();
            for batch in &batches {
                let rows: Vec<(&str, i64)> = batch.iter().map(|(id, v)| (id.as_str(), *v)).collect();
                mgr.write_table(&d, &comments(&rows)).unwrap();
            }
            let before = mgr.read_logical(&d, RecordKind::Comment).unwrap().unwrap();
            mgr.compact(&d, RecordKind::Comment).unwrap();
            let after = mgr.read_logical(&d, RecordKind::Comment).unwrap().unwrap();
            prop_assert_eq!(before.rows, after.rows);
            prop_assert_eq!(before.schema, after.schema);
            prop_assert_eq!(mgr.state(&d, RecordKind::Comment).unwrap(), TableState::Stable {
                generation: if batches.len() > 1 { 2 } else { 1 },
            });
        }
    }
}
