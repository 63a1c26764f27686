//! Record flattening.
//!
//! Turns one regulations.gov JSON:API record into a single-level
//! [`FlatRow`]. The record is either the API envelope
//! `{"data": {...}, "included": [...]}` or the bare data object.
//!
//! Column naming:
//! - `id`, `type` and `links.self` (as `link`) come from the envelope.
//! - Relationships become `has_<rel>` / `<rel>_count` summaries, and the
//!   envelope's `included` array becomes `has_included` / `included_count`.
//! - Scalar attributes keep their key. Keys clashing with an envelope or
//!   summary column are prefixed with `attributes.`.
//! - Leaves of nested attribute objects use their leaf name when no other
//!   attribute path of the same kind ends in that name, otherwise their
//!   dotted path. [`ColumnNames`] holds these decisions for a batch.
//! - Arrays are stored as compact JSON text.

use std::collections::{BTreeSet, HashMap, HashSet};

use dl_common::{Error, FlatRow, RecordKind, Result, ScalarValue};
use serde_json::{Map, Value};

/// A raw record as read from the source.
pub type RawRecord = Value;

const ID: &str = "id";
const TYPE: &str = "type";
const LINK: &str = "link";
const HAS_INCLUDED: &str = "has_included";
const INCLUDED_COUNT: &str = "included_count";
const RESERVED_COLUMNS: [&str; 5] = [ID, TYPE, LINK, HAS_INCLUDED, INCLUDED_COUNT];
const ATTRIBUTES_PREFIX: &str = "attributes";

/// Flatten a record of a known kind, naming columns from this record alone.
pub fn flatten(record: &RawRecord, kind: RecordKind) -> Result<FlatRow> {
    flatten_record(record, kind, "<record>")
}

/// Flatten a record on its own, attributing failures to `origin`.
pub fn flatten_record(record: &RawRecord, kind: RecordKind, origin: &str) -> Result<FlatRow> {
    let names = ColumnNames::from_records([record]);
    flatten_with(record, kind, origin, &names)
}

/// Flatten a record with column names decided for its whole batch.
pub fn flatten_with(
    record: &RawRecord,
    kind: RecordKind,
    origin: &str,
    names: &ColumnNames,
) -> Result<FlatRow> {
    let malformed = |reason: String| Error::malformed(origin, reason);

    if !record.is_object() {
        return Err(malformed("record is not a JSON object".to_string()));
    }
    let (data, included) = split_envelope(record);
    let data = data
        .as_object()
        .ok_or_else(|| malformed("data is not a JSON object".to_string()))?;

    let mut row = FlatRow::new();

    let id = match data.get(ID) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(malformed("missing or invalid id".to_string())),
    };
    row.insert(ID.to_string(), ScalarValue::String(id));

    match data.get(TYPE) {
        None | Some(Value::Null) => {}
        Some(Value::String(wire)) => match RecordKind::from_wire(wire) {
            Some(found) if found == kind => {
                row.insert(TYPE.to_string(), ScalarValue::String(wire.clone()));
            }
            Some(found) => {
                return Err(malformed(format!("type {found} where {kind} was expected")));
            }
            None => return Err(malformed(format!("unknown record type {wire:?}"))),
        },
        Some(_) => return Err(malformed("type is not a string".to_string())),
    }

    if let Some(link) = data
        .get("links")
        .and_then(|links| links.get("self"))
        .and_then(ScalarValue::from_json)
    {
        row.insert(LINK.to_string(), link);
    }

    match data.get(ATTRIBUTES_PREFIX) {
        None | Some(Value::Null) => {}
        Some(Value::Object(attributes)) => flatten_attributes(attributes, names, &mut row),
        Some(_) => return Err(malformed("attributes is not an object".to_string())),
    }

    match data.get("relationships") {
        None | Some(Value::Null) => {}
        Some(Value::Object(relationships)) => summarize_relationships(relationships, &mut row),
        Some(_) => return Err(malformed("relationships is not an object".to_string())),
    }

    let included = included.and_then(Value::as_array).map(Vec::len);
    if included.is_some() || kind == RecordKind::Comment {
        let count = included.unwrap_or(0);
        row.insert(HAS_INCLUDED.to_string(), ScalarValue::Bool(count > 0));
        row.insert(INCLUDED_COUNT.to_string(), ScalarValue::Int(count as i64));
    }

    Ok(row)
}

/// The data object and `included` member of an envelope, or the bare
/// record and nothing.
fn split_envelope(record: &Value) -> (&Value, Option<&Value>) {
    match record.get("data") {
        Some(data) if record.get(ID).is_none() => (data, record.get("included")),
        _ => (record, None),
    }
}

// ── Column naming ───────────────────────────────────────────────────────

/// Column naming shared by every record of one kind in a batch.
///
/// A nested leaf keeps its bare name only while exactly one attribute path
/// in the batch ends in that name and no envelope or summary column uses
/// it. Every row of the batch gets the same column for the same field.
#[derive(Debug, Clone)]
pub struct ColumnNames {
    /// Distinct attribute paths ending in each name.
    claims: HashMap<String, BTreeSet<String>>,
    /// Names taken by envelope and summary columns.
    reserved: HashSet<String>,
    /// Leaf names already committed under a dotted path.
    dotted: HashSet<String>,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self::new()
    }
}

impl ColumnNames {
    pub fn new() -> Self {
        Self {
            claims: HashMap::new(),
            reserved: RESERVED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            dotted: HashSet::new(),
        }
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a RawRecord>) -> Self {
        let mut names = Self::new();
        for record in records {
            names.observe(record);
        }
        names
    }

    /// Register the attribute paths and relationships of one record.
    /// Records that fail to flatten still contribute what they can.
    pub fn observe(&mut self, record: &RawRecord) {
        let (data, _) = split_envelope(record);
        if let Some(Value::Object(attributes)) = data.get(ATTRIBUTES_PREFIX) {
            let mut leaves = Vec::new();
            collect_leaves(attributes, &mut Vec::new(), &mut leaves);
            for (path, _) in leaves {
                self.claim(&path);
            }
        }
        if let Some(Value::Object(relationships)) = data.get("relationships") {
            for (name, relationship) in relationships {
                if relationship.get("data").is_some() {
                    self.reserved.insert(has_column(name));
                    self.reserved.insert(count_column(name));
                }
            }
        }
    }

    /// Register a column already committed for this kind, so a dotted
    /// leaf never falls back to its bare name in a later batch.
    pub fn observe_column(&mut self, column: &str) {
        if column
            .strip_prefix(ATTRIBUTES_PREFIX)
            .is_some_and(|rest| rest.starts_with('.'))
        {
            return;
        }
        if let Some((_, name)) = column.rsplit_once('.') {
            self.dotted.insert(name.to_string());
        }
    }

    fn claim(&mut self, path: &[&str]) {
        if let Some(name) = path.last() {
            self.claims
                .entry((*name).to_string())
                .or_default()
                .insert(path.join("."));
        }
    }

    /// Column for the attribute at `path`, relative to `attributes`.
    pub fn column(&self, path: &[&str]) -> String {
        match path {
            [key] if self.reserved.contains(*key) => format!("{ATTRIBUTES_PREFIX}.{key}"),
            [key] => (*key).to_string(),
            [.., name]
                if !self.reserved.contains(*name)
                    && !self.dotted.contains(*name)
                    && self.claims.get(*name).is_some_and(|paths| paths.len() == 1) =>
            {
                (*name).to_string()
            }
            path => path.join("."),
        }
    }
}

/// Every non-object leaf under `object`, with its path from there.
fn collect_leaves<'a>(
    object: &'a Map<String, Value>,
    path: &mut Vec<&'a str>,
    out: &mut Vec<(Vec<&'a str>, &'a Value)>,
) {
    for (key, value) in object {
        path.push(key);
        match value {
            Value::Object(nested) => collect_leaves(nested, path, out),
            leaf => out.push((path.clone(), leaf)),
        }
        path.pop();
    }
}

fn flatten_attributes(attributes: &Map<String, Value>, names: &ColumnNames, row: &mut FlatRow) {
    let mut leaves = Vec::new();
    collect_leaves(attributes, &mut Vec::new(), &mut leaves);

    for (path, leaf) in leaves {
        let value = match leaf {
            Value::Null => continue,
            Value::Array(_) => ScalarValue::String(leaf.to_string()),
            scalar => match ScalarValue::from_json(scalar) {
                Some(value) => value,
                None => continue,
            },
        };
        row.insert(names.column(&path), value);
    }
}

fn has_column(relationship: &str) -> String {
    format!("has_{relationship}")
}

fn count_column(relationship: &str) -> String {
    format!("{relationship}_count")
}

fn summarize_relationships(relationships: &Map<String, Value>, row: &mut FlatRow) {
    for (name, relationship) in relationships {
        let Some(data) = relationship.get("data") else {
            continue;
        };
        let count = match data {
            Value::Array(items) => items.len(),
            Value::Object(_) => 1,
            _ => 0,
        };
        row.insert(has_column(name), ScalarValue::Bool(count > 0));
        row.insert(count_column(name), ScalarValue::Int(count as i64));
    }
}
