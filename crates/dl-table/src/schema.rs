//! Table schemas and schema unification.
//!
//! A [`TableSchema`] is built once per (docket, record kind) by folding the
//! column → type observations of every flattened row. Column order is
//! first-seen order; a column's type is the most general type observed.
//! Unification never fails: genuinely incompatible observations degrade to
//! `String` and are reported as [`DegradedColumn`] quality signals.

use std::collections::BTreeSet;

use dl_common::{FlatRow, ScalarType, ScalarValue};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Ordered column set with one type per column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableSchema {
    columns: IndexMap<String, ScalarType>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema from `(name, type)` pairs in order. Repeated names widen.
    pub fn from_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, ScalarType)>,
        S: Into<String>,
    {
        let mut schema = Self::new();
        for (name, ty) in columns {
            schema.observe(name, ty);
        }
        schema
    }

    /// Record one observation, appending the column or widening its type.
    /// Returns the column's resulting type.
    pub fn observe(&mut self, name: impl Into<String>, ty: ScalarType) -> ScalarType {
        let slot = self.columns.entry(name.into()).or_insert(ty);
        *slot = slot.widen(ty);
        *slot
    }

    pub fn get(&self, name: &str) -> Option<ScalarType> {
        self.columns.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Columns in output order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, ScalarType)> + '_ {
        self.columns.iter().map(|(name, ty)| (name.as_str(), *ty))
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    /// True when every column of `self` exists in `other` with a type at
    /// least as general.
    pub fn is_subsumed_by(&self, other: &TableSchema) -> bool {
        self.columns()
            .all(|(name, ty)| other.get(name).is_some_and(|o| o >= ty))
    }
}

/// A column whose observations forced the universal `String` fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedColumn {
    pub column: String,
    /// Every type observed for the column, most general last.
    pub observed: Vec<ScalarType>,
}

/// Output of unification: one schema and rows that all conform to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Unified {
    pub schema: TableSchema,
    pub rows: Vec<FlatRow>,
    pub degraded: Vec<DegradedColumn>,
}

/// Single-pass column/type fold over flattened rows.
#[derive(Debug, Clone, Default)]
pub struct SchemaUnifier {
    schema: TableSchema,
    observed: IndexMap<String, BTreeSet<ScalarType>>,
}

impl SchemaUnifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previously committed schema. Its columns keep their
    /// position and can only widen.
    pub fn with_prior(prior: &TableSchema) -> Self {
        let mut unifier = Self {
            schema: prior.clone(),
            observed: IndexMap::new(),
        };
        for (name, ty) in prior.columns() {
            unifier
                .observed
                .entry(name.to_string())
                .or_default()
                .insert(ty);
        }
        unifier
    }

    /// Fold one row's non-null columns into the schema.
    pub fn observe_row(&mut self, row: &FlatRow) {
        for (name, value) in row {
            if let Some(ty) = value.scalar_type() {
                self.schema.observe(name.as_str(), ty);
                self.observed.entry(name.clone()).or_default().insert(ty);
            }
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Columns that fell back to `String` after seeing non-string values.
    pub fn degraded(&self) -> Vec<DegradedColumn> {
        self.schema
            .columns()
            .filter(|(_, ty)| *ty == ScalarType::String)
            .filter_map(|(name, _)| {
                let seen = self.observed.get(name)?;
                if seen.iter().any(|t| *t != ScalarType::String) {
                    Some(DegradedColumn {
                        column: name.to_string(),
                        observed: seen.iter().copied().collect(),
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    /// Rewrite rows to contain every schema column in schema order, with
    /// absent values as `Null` and present values widened to the column type.
    pub fn finish(self, rows: Vec<FlatRow>) -> Unified {
        let degraded = self.degraded();
        let rows = rows
            .into_iter()
            .map(|row| conform_row(&self.schema, row))
            .collect();
        if !degraded.is_empty() {
            debug!(columns = degraded.len(), "columns degraded to string");
        }
        Unified {
            schema: self.schema,
            rows,
            degraded,
        }
    }
}

/// Reshape a single row to `schema`. Columns not in the schema are dropped.
pub fn conform_row(schema: &TableSchema, mut row: FlatRow) -> FlatRow {
    let mut out = FlatRow::with_capacity(schema.len());
    for (name, ty) in schema.columns() {
        let value = row
            .swap_remove(name)
            .map(|v| v.widen_to(ty))
            .unwrap_or(ScalarValue::Null);
        out.insert(name.to_string(), value);
    }
    out
}

/// Unify a sequence of rows from scratch.
pub fn unify(rows: Vec<FlatRow>) -> Unified {
    unify_with(&TableSchema::default(), rows)
}

/// Unify rows against a previously committed schema.
pub fn unify_with(prior: &TableSchema, rows: Vec<FlatRow>) -> Unified {
    let mut unifier = SchemaUnifier::with_prior(prior);
    for row in &rows {
        unifier.observe_row(row);
    }
    unifier.finish(rows)
}
