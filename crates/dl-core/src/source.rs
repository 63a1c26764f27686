//! Record sources.
//!
//! A source enumerates dockets and yields each docket's records tagged with
//! their kind, in a stable order. The filesystem source reads the
//! Mirrulations mirror layout:
//!
//! ```text
//! <root>/raw-data/<agency>/<docket>/
//!     [raw-data/]                       optional inner content root
//!         docket/<docket>.json | docket.json | <docket>.json
//!         documents/*.json
//!         comments/*.json
//!         text-<docket>/{docket,documents,comments}/...   fallback
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use dl_common::{DocketId, Error, RecordKind, Result};
use indexmap::IndexMap;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

const RAW_DATA: &str = "raw-data";
const DERIVED_DATA: &str = "derived-data";
const TEXT_DIR_PREFIX: &str = "text-";

/// One record as delivered by a source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub kind: RecordKind,
    /// Where the record came from, for error attribution.
    pub origin: String,
    /// The parsed body, or why it could not be parsed.
    pub body: std::result::Result<Value, String>,
}

/// Enumerates dockets and their records.
pub trait RecordSource: Send + Sync {
    /// Dockets to convert, sorted.
    fn dockets(&self) -> Result<Vec<DocketId>>;

    /// Records of one docket: the docket record, then documents, then
    /// comments, each group in stable order.
    fn records(&self, docket: &DocketId) -> Result<Vec<SourceRecord>>;
}

// ── Filters ─────────────────────────────────────────────────────────────

/// Agency and docket-pattern selection.
#[derive(Debug, Clone, Default)]
pub struct DocketFilter {
    agency: Option<String>,
    pattern: Option<Regex>,
}

impl DocketFilter {
    pub fn new(agency: Option<&str>, pattern: Option<&str>) -> Result<Self> {
        let pattern = pattern
            .map(|p| {
                let source = glob_to_regex(p).ok_or_else(|| {
                    Error::InvalidConfig(format!("docket pattern {p:?} has an unclosed '['"))
                })?;
                Regex::new(&source)
                    .map_err(|e| Error::InvalidConfig(format!("bad docket pattern {p:?}: {e}")))
            })
            .transpose()?;
        Ok(Self {
            agency: agency.map(|a| a.trim().to_ascii_uppercase()),
            pattern,
        })
    }

    pub fn matches(&self, docket: &DocketId) -> bool {
        if let Some(agency) = &self.agency {
            if !docket.agency().eq_ignore_ascii_case(agency) {
                return false;
            }
        }
        match &self.pattern {
            Some(pattern) => pattern.is_match(docket.as_str()),
            None => true,
        }
    }
}

/// Translate a shell glob (`*`, `?`, `[...]`, `[!...]`) into an anchored
/// regular expression. `None` when a `[` class is never closed.
pub fn glob_to_regex(glob: &str) -> Option<String> {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    if c == '\\' || c == '[' || c == '^' {
                        class.push('\\');
                    }
                    class.push(c);
                }
                if !closed {
                    return None;
                }
                out.push('[');
                out.push_str(&class);
                out.push(']');
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    Some(out)
}

// ── Filesystem ──────────────────────────────────────────────────────────

/// Docket id to every directory it was found in, in path order.
type DocketIndex = IndexMap<DocketId, Vec<PathBuf>>;

/// Reads a Mirrulations mirror rooted at a data directory.
///
/// The mirror is scanned once; later lookups reuse the index.
#[derive(Debug, Clone)]
pub struct FsRecordSource {
    root: PathBuf,
    filter: DocketFilter,
    index: OnceLock<DocketIndex>,
}

impl FsRecordSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            filter: DocketFilter::default(),
            index: OnceLock::new(),
        }
    }

    pub fn with_filter(mut self, filter: DocketFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Docket directories, unfiltered, sorted by path.
    fn discover(&self) -> Result<Vec<(DocketId, PathBuf)>> {
        let raw_data = self.root.join(RAW_DATA);
        let mut dirs = Vec::new();
        if raw_data.is_dir() {
            for agency in sorted_dirs(&raw_data)? {
                dirs.extend(sorted_dirs(&agency)?);
            }
        } else {
            debug!(root = %self.root.display(), "no raw-data directory, scanning for docket directories");
            for dir in sorted_dirs(&self.root)? {
                if dir.join(RAW_DATA).exists() || dir.join("docket").exists() {
                    dirs.push(dir);
                }
            }
        }

        let mut dockets: Vec<(DocketId, PathBuf)> = dirs
            .into_iter()
            .filter_map(|dir| {
                let name = dir.file_name()?.to_str()?.to_string();
                if name.starts_with('.') || name == RAW_DATA || name == DERIVED_DATA {
                    return None;
                }
                Some((DocketId::new(name), dir))
            })
            .collect();
        dockets.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(dockets)
    }

    fn index(&self) -> Result<&DocketIndex> {
        if let Some(index) = self.index.get() {
            return Ok(index);
        }
        let mut index = DocketIndex::new();
        for (id, dir) in self.discover()? {
            index.entry(id).or_default().push(dir);
        }
        index.sort_keys();
        for (id, dirs) in index.iter().filter(|(_, dirs)| dirs.len() > 1) {
            warn!(docket = %id, copies = dirs.len(), "docket found in more than one directory");
        }
        Ok(self.index.get_or_init(|| index))
    }

    fn locate(&self, docket: &DocketId) -> Result<&Path> {
        match self.index()?.get(docket).map(Vec::as_slice) {
            Some([dir]) => Ok(dir.as_path()),
            Some(dirs) if !dirs.is_empty() => {
                let listed: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
                Err(Error::Source(format!(
                    "docket {docket} found in more than one directory: {}",
                    listed.join(", ")
                )))
            }
            _ => Err(Error::Source(format!(
                "docket {docket} not found under {}",
                self.root.display()
            ))),
        }
    }
}

impl RecordSource for FsRecordSource {
    fn dockets(&self) -> Result<Vec<DocketId>> {
        let index = self.index()?;
        let dockets: Vec<DocketId> = index
            .keys()
            .filter(|id| self.filter.matches(id))
            .cloned()
            .collect();
        info!(found = index.len(), selected = dockets.len(), "discovered dockets");
        Ok(dockets)
    }

    fn records(&self, docket: &DocketId) -> Result<Vec<SourceRecord>> {
        let docket_dir = self.locate(docket)?;
        let content = if docket_dir.join(RAW_DATA).is_dir() {
            docket_dir.join(RAW_DATA)
        } else {
            docket_dir.to_path_buf()
        };
        let text_dirs: Vec<PathBuf> = sorted_dirs(&content)?
            .into_iter()
            .filter(|d| {
                d.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(TEXT_DIR_PREFIX))
            })
            .collect();

        let mut records = Vec::new();

        let docket_file = format!("{docket}.json");
        let candidates = [
            content.join("docket").join(&docket_file),
            content.join("docket.json"),
            content.join(&docket_file),
        ]
        .into_iter()
        .chain(text_dirs.iter().map(|t| t.join("docket").join(&docket_file)));
        for candidate in candidates {
            if candidate.is_file() {
                records.push(read_record(RecordKind::Docket, &candidate));
                break;
            }
        }

        for (kind, dir_name) in [
            (RecordKind::Document, "documents"),
            (RecordKind::Comment, "comments"),
        ] {
            let mut files = json_files(&content.join(dir_name))?;
            if files.is_empty() {
                for text in &text_dirs {
                    files.extend(json_files(&text.join(dir_name))?);
                }
            }
            records.extend(files.iter().map(|path| read_record(kind, path)));
        }

        debug!(docket = %docket, records = records.len(), "read docket records");
        Ok(records)
    }
}

fn sorted_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_record(kind: RecordKind, path: &Path) -> SourceRecord {
    let body = fs::read_to_string(path)
        .map_err(|e| format!("unreadable: {e}"))
        .and_then(|text| serde_json::from_str(&text).map_err(|e| format!("invalid JSON: {e}")));
    SourceRecord {
        kind,
        origin: path.display().to_string(),
        body,
    }
}

// ── In-memory ───────────────────────────────────────────────────────────

/// Records held in memory, in insertion order per docket.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordSource {
    dockets: IndexMap<DocketId, Vec<(RecordKind, Value)>>,
    filter: DocketFilter,
}

impl MemoryRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: DocketFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn push(&mut self, docket: impl Into<DocketId>, kind: RecordKind, record: Value) {
        self.dockets
            .entry(docket.into())
            .or_default()
            .push((kind, record));
    }

    /// Register a docket with no records.
    pub fn add_empty(&mut self, docket: impl Into<DocketId>) {
        self.dockets.entry(docket.into()).or_default();
    }
}

impl RecordSource for MemoryRecordSource {
    fn dockets(&self) -> Result<Vec<DocketId>> {
        let mut dockets: Vec<DocketId> = self
            .dockets
            .keys()
            .filter(|id| self.filter.matches(id))
            .cloned()
            .collect();
        dockets.sort();
        Ok(dockets)
    }

    fn records(&self, docket: &DocketId) -> Result<Vec<SourceRecord>> {
        let stored = self
            .dockets
            .get(docket)
            .ok_or_else(|| Error::Source(format!("docket {docket} not found")))?;
        let mut records: Vec<SourceRecord> = stored
            .iter()
            .enumerate()
            .map(|(i, (kind, body))| SourceRecord {
                kind: *kind,
                origin: format!("memory:{docket}/{}/{i}", kind.table_name()),
                body: Ok(body.clone()),
            })
            .collect();
        records.sort_by_key(|r| r.kind);
        Ok(records)
    }
}
