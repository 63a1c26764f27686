//! Parquet materialization of unified tables.
//!
//! Rows are laid out column-major into a single Arrow `RecordBatch` in the
//! schema's declared order and written with the run's compression codec.
//! The Arrow schema is embedded in the file by the writer, so every file is
//! readable without an external catalog.

use std::collections::HashMap;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder,
};
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use dl_common::{Compression, Error, FlatRow, RecordKind, Result, ScalarType, ScalarValue};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression as ParquetCompression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;

use crate::schema::{TableSchema, Unified};

/// Key-value metadata key holding the writer name.
pub const META_CREATED_BY: &str = "created_by";
/// Key-value metadata key holding the table name.
pub const META_TABLE: &str = "docket_lake.table";
/// Key-value metadata key holding the format version.
pub const META_FORMAT_VERSION: &str = "docket_lake.format_version";

const CREATED_BY: &str = "docket-lake";

/// Zstd level for the balanced codec.
const BALANCED_ZSTD_LEVEL: i32 = 3;
/// Zstd level for the high-ratio codec.
const HIGH_RATIO_ZSTD_LEVEL: i32 = 19;

/// The materialized result for one (docket, record kind).
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub kind: RecordKind,
    pub schema: TableSchema,
    pub rows: Vec<FlatRow>,
}

impl Table {
    pub fn from_unified(kind: RecordKind, unified: Unified) -> Self {
        Self {
            kind,
            schema: unified.schema,
            rows: unified.rows,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.table_name()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Serialize to Parquet bytes, tagging the file with the table name.
    pub fn to_parquet(&self, compression: Compression) -> Result<Bytes> {
        write_parquet(&self.schema, &self.rows, compression, Some(self.name()))
    }
}

/// Serialize rows conforming to `schema` as a self-describing Parquet file.
///
/// Pure: performs no I/O and does not touch its inputs.
pub fn materialize(
    schema: &TableSchema,
    rows: &[FlatRow],
    compression: Compression,
) -> Result<Bytes> {
    write_parquet(schema, rows, compression, None)
}

fn parquet_codec(compression: Compression) -> Result<ParquetCompression> {
    let zstd = |level: i32| {
        ZstdLevel::try_new(level)
            .map(ParquetCompression::ZSTD)
            .map_err(|e| Error::Parquet(format!("invalid zstd level {level}: {e}")))
    };
    match compression {
        Compression::None => Ok(ParquetCompression::UNCOMPRESSED),
        Compression::Fast => Ok(ParquetCompression::SNAPPY),
        Compression::HighRatio => zstd(HIGH_RATIO_ZSTD_LEVEL),
        Compression::Balanced => zstd(BALANCED_ZSTD_LEVEL),
    }
}

fn writer_properties(compression: Compression, table: Option<&str>) -> Result<WriterProperties> {
    let mut metadata = vec![
        KeyValue {
            key: META_CREATED_BY.to_string(),
            value: Some(CREATED_BY.to_string()),
        },
        KeyValue {
            key: META_FORMAT_VERSION.to_string(),
            value: Some(dl_common::FORMAT_VERSION.to_string()),
        },
    ];
    if let Some(table) = table {
        metadata.push(KeyValue {
            key: META_TABLE.to_string(),
            value: Some(table.to_string()),
        });
    }
    Ok(WriterProperties::builder()
        .set_compression(parquet_codec(compression)?)
        .set_key_value_metadata(Some(metadata))
        .build())
}

fn arrow_type(ty: ScalarType) -> DataType {
    match ty {
        ScalarType::Bool => DataType::Boolean,
        ScalarType::Int => DataType::Int64,
        ScalarType::Float => DataType::Float64,
        ScalarType::String => DataType::Utf8,
    }
}

fn scalar_type(data_type: &DataType) -> Option<ScalarType> {
    match data_type {
        DataType::Boolean => Some(ScalarType::Bool),
        DataType::Int64 => Some(ScalarType::Int),
        DataType::Float64 => Some(ScalarType::Float),
        DataType::Utf8 => Some(ScalarType::String),
        _ => None,
    }
}

fn arrow_schema(schema: &TableSchema) -> Arc<Schema> {
    Arc::new(Schema::new(
        schema
            .columns()
            .map(|(name, ty)| Field::new(name, arrow_type(ty), true))
            .collect::<Vec<_>>(),
    ))
}

fn cell(row: &FlatRow, name: &str, ty: ScalarType) -> ScalarValue {
    match row.get(name) {
        Some(value) if value.scalar_type() == Some(ty) => value.clone(),
        Some(value) => value.clone().widen_to(ty),
        None => ScalarValue::Null,
    }
}

fn build_column(rows: &[FlatRow], name: &str, ty: ScalarType) -> ArrayRef {
    match ty {
        ScalarType::Bool => {
            let mut builder = BooleanBuilder::with_capacity(rows.len());
            for row in rows {
                match cell(row, name, ty) {
                    ScalarValue::Bool(b) => builder.append_value(b),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        ScalarType::Int => {
            let mut builder = Int64Builder::with_capacity(rows.len());
            for row in rows {
                match cell(row, name, ty) {
                    ScalarValue::Int(i) => builder.append_value(i),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        ScalarType::Float => {
            let mut builder = Float64Builder::with_capacity(rows.len());
            for row in rows {
                match cell(row, name, ty) {
                    ScalarValue::Float(x) => builder.append_value(x),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
        ScalarType::String => {
            let mut builder = StringBuilder::with_capacity(rows.len(), rows.len() * 16);
            for row in rows {
                match cell(row, name, ty) {
                    ScalarValue::String(s) => builder.append_value(s),
                    _ => builder.append_null(),
                }
            }
            Arc::new(builder.finish())
        }
    }
}

fn write_parquet(
    schema: &TableSchema,
    rows: &[FlatRow],
    compression: Compression,
    table: Option<&str>,
) -> Result<Bytes> {
    if schema.is_empty() {
        return Err(Error::Materialize("table schema has no columns".to_string()));
    }

    let arrow_schema = arrow_schema(schema);
    let columns: Vec<ArrayRef> = schema
        .columns()
        .map(|(name, ty)| build_column(rows, name, ty))
        .collect();
    let batch = RecordBatch::try_new(arrow_schema.clone(), columns)
        .map_err(|e| Error::Arrow(format!("record batch build failed: {e}")))?;

    let props = writer_properties(compression, table)?;
    let mut buffer = Vec::<u8>::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, arrow_schema, Some(props))
        .map_err(|e| Error::Parquet(format!("parquet writer init failed: {e}")))?;
    writer
        .write(&batch)
        .map_err(|e| Error::Parquet(format!("parquet write failed: {e}")))?;
    writer
        .close()
        .map_err(|e| Error::Parquet(format!("parquet close failed: {e}")))?;
    Ok(Bytes::from(buffer))
}

/// Read a materialized file back into its embedded schema and rows.
///
/// Every returned row holds every schema column; nulls are explicit.
pub fn read_table(data: Bytes) -> Result<(TableSchema, Vec<FlatRow>)> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data)
        .map_err(|e| Error::Parquet(format!("parquet open failed: {e}")))?;

    let mut schema = TableSchema::new();
    for field in builder.schema().fields() {
        let ty = scalar_type(field.data_type()).ok_or_else(|| {
            Error::Materialize(format!(
                "unsupported column type {} for {}",
                field.data_type(),
                field.name()
            ))
        })?;
        schema.observe(field.name().as_str(), ty);
    }

    let reader = builder
        .build()
        .map_err(|e| Error::Parquet(format!("parquet reader build failed: {e}")))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| Error::Arrow(format!("record batch read failed: {e}")))?;
        let start = rows.len();
        rows.extend((0..batch.num_rows()).map(|_| FlatRow::with_capacity(schema.len())));
        for ((name, ty), column) in schema.columns().zip(batch.columns()) {
            for (offset, row) in rows[start..].iter_mut().enumerate() {
                row.insert(name.to_string(), read_cell(column, ty, offset)?);
            }
        }
    }
    Ok((schema, rows))
}

fn read_cell(column: &ArrayRef, ty: ScalarType, index: usize) -> Result<ScalarValue> {
    if column.is_null(index) {
        return Ok(ScalarValue::Null);
    }
    let mismatch = || Error::Arrow(format!("column does not hold {ty} values"));
    Ok(match ty {
        ScalarType::Bool => {
            ScalarValue::Bool(column.as_boolean_opt().ok_or_else(mismatch)?.value(index))
        }
        ScalarType::Int => ScalarValue::Int(
            column
                .as_primitive_opt::<Int64Type>()
                .ok_or_else(mismatch)?
                .value(index),
        ),
        ScalarType::Float => ScalarValue::Float(
            column
                .as_primitive_opt::<Float64Type>()
                .ok_or_else(mismatch)?
                .value(index),
        ),
        ScalarType::String => ScalarValue::String(
            column
                .as_string_opt::<i32>()
                .ok_or_else(mismatch)?
                .value(index)
                .to_string(),
        ),
    })
}

/// Key-value metadata embedded in a materialized file.
pub fn file_metadata(data: Bytes) -> Result<HashMap<String, String>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data)
        .map_err(|e| Error::Parquet(format!("parquet open failed: {e}")))?;
    let pairs: HashMap<String, String> = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .map(|kvs| {
            kvs.iter()
                .filter_map(|kv| kv.value.clone().map(|v| (kv.key.clone(), v)))
                .collect()
        })
        .unwrap_or_default();
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::unify;
    use parquet::file::reader::{FileReader, SerializedFileReader};
    use proptest::prelude::*;

    fn sample_rows() -> Vec<FlatRow> {
        let mut a = FlatRow::new();
        a.insert("id".into(), "DOC-1".into());
        a.insert("pageCount".into(), 4i64.into());
        a.insert("openForComment".into(), true.into());
        let mut b = FlatRow::new();
        b.insert("id".into(), "DOC-2".into());
        b.insert("score".into(), 0.5f64.into());
        vec![a, b]
    }

    #[test]
    fn test_round_trip_preserves_rows_and_order() {
        let unified = unify(sample_rows());
        let bytes = materialize(&unified.schema, &unified.rows, Compression::Balanced).unwrap();
        let (schema, rows) = read_table(bytes).unwrap();
        assert_eq!(schema, unified.schema);
        assert_eq!(rows, unified.rows);
        assert_eq!(
            schema.column_names(),
            vec!["id", "pageCount", "openForComment", "score"]
        );
    }

    #[test]
    fn test_every_codec_is_readable() {
        let unified = unify(sample_rows());
        for compression in [
            Compression::None,
            Compression::Fast,
            Compression::HighRatio,
            Compression::Balanced,
        ] {
            let bytes = materialize(&unified.schema, &unified.rows, compression).unwrap();
            let (_, rows) = read_table(bytes).unwrap();
            assert_eq!(rows.len(), 2, "codec {compression}");
        }
    }

    #[test]
    fn test_codec_recorded_in_column_chunks() {
        let unified = unify(sample_rows());
        let bytes = materialize(&unified.schema, &unified.rows, Compression::Fast).unwrap();
        let reader = SerializedFileReader::new(bytes).unwrap();
        let column = reader.metadata().row_group(0).column(0);
        assert_eq!(column.compression(), ParquetCompression::SNAPPY);
    }

    #[test]
    fn test_self_describing_metadata() {
        let table = Table::from_unified(RecordKind::Comment, unify(sample_rows()));
        let bytes = table.to_parquet(Compression::None).unwrap();
        let meta = file_metadata(bytes).unwrap();
        assert_eq!(meta.get(META_TABLE).map(String::as_str), Some("comments"));
        assert_eq!(meta.get(META_CREATED_BY).map(String::as_str), Some(CREATED_BY));
        assert_eq!(
            meta.get(META_FORMAT_VERSION).map(String::as_str),
            Some(dl_common::FORMAT_VERSION)
        );
    }

    #[test]
    fn test_empty_schema_rejected() {
        let err = materialize(&TableSchema::new(), &[], Compression::None).unwrap_err();
        assert!(matches!(err, Error::Materialize(_)));
    }

    #[test]
    fn test_zero_rows_with_schema() {
        let schema = TableSchema::from_columns([("id", ScalarType::String)]);
        let bytes = materialize(&schema, &[], Compression::Balanced).unwrap();
        let (read_schema, rows) = read_table(bytes).unwrap();
        assert_eq!(read_schema, schema);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_unwidened_values_are_widened_on_write() {
        let schema = TableSchema::from_columns([("n", ScalarType::Float)]);
        let mut row = FlatRow::new();
        row.insert("n".into(), ScalarValue::Int(2));
        let bytes = materialize(&schema, &[row], Compression::None).unwrap();
        let (_, rows) = read_table(bytes).unwrap();
        assert_eq!(rows[0]["n"], ScalarValue::Float(2.0));
    }

    fn value_strategy() -> impl Strategy<Value = ScalarValue> {
        prop_oneof![
            Just(ScalarValue::Null),
            any::<bool>().prop_map(ScalarValue::Bool),
            any::<i64>().prop_map(ScalarValue::Int),
            (-1.0e12f64..1.0e12).prop_map(ScalarValue::Float),
            "[ -~]{0,12}".prop_map(ScalarValue::String),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Materialize then read back yields the unified rows unchanged.
        #[test]
        fn round_trip_fidelity(
            rows in prop::collection::vec(
                prop::collection::vec(("[a-d]", value_strategy()), 1..5)
                    .prop_map(|pairs| pairs.into_iter().collect::<FlatRow>()),
                1..12,
            )
        ) {
            let unified = unify(rows);
            prop_assume!(!unified.schema.is_empty());
            let bytes = materialize(&unified.schema, &unified.rows, Compression::Balanced).unwrap();
            let (schema, read_rows) = read_table(bytes).unwrap();
            prop_assert_eq!(schema, unified.schema);
            prop_assert_eq!(read_rows, unified.rows);
        }
    }
}
