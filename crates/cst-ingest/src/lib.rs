//! CSV discovery, normalization and column reconciliation for snapshot loads.

use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use cst_core::{parse_permissive_date, CellValue, LiveColumn, ReconciledRows};
use regex::Regex;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use thiserror::Error;
use tracing::{debug, warn};

pub mod schema;

pub use schema::{ColumnDef, IndexDef, LogicalTable, SchemaRegistry};

pub const CRATE_NAME: &str = "cst-ingest";

/// Cell contents treated as missing.
pub const NULL_TOKENS: [&str; 3] = ["", "NA", "N/A"];

const HINT_MIN_SIMILARITY: f64 = 0.7;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing CSV {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("parsing file pattern rules {path}: {source}")]
    Rules {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("file pattern rules name unknown table {0}")]
    UnknownRuleTable(String),
    #[error("zero matching columns for {table} (csv: {csv_columns:?}, table: {table_columns:?})")]
    NoMatchingColumns {
        table: String,
        csv_columns: Vec<String>,
        table_columns: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRule {
    pub table: String,
    pub patterns: Vec<String>,
}

impl MatchRule {
    pub fn new(table: impl Into<String>, patterns: &[&str]) -> Self {
        Self {
            table: table.into(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Ordered substring rules from filename stem to logical table. First rule wins.
#[derive(Debug, Clone)]
pub struct FileMatcher {
    rules: Vec<MatchRule>,
}

impl FileMatcher {
    pub fn new(rules: Vec<MatchRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| MatchRule {
                table: rule.table,
                patterns: rule.patterns.iter().map(|p| p.to_lowercase()).collect(),
            })
            .collect();
        Self { rules }
    }

    pub fn builtin() -> Self {
        Self::new(vec![
            MatchRule::new("allocated_materials_to_orders", &["allocated", "allocation", "reserved"]),
            MatchRule::new("available_inventory_report", &["available", "inventory_report"]),
            MatchRule::new("country_level_enrollment_report", &["country_enrollment", "country_level"]),
            MatchRule::new("enrollment_rate_report", &["enrollment_rate", "enrollment"]),
            MatchRule::new("affiliate_warehouse_inventory", &["warehouse", "affiliate"]),
            MatchRule::new("re_evaluation", &["reeval", "re-evaluation", "shelf_life"]),
            MatchRule::new("rim", &["regulatory", "rim"]),
            MatchRule::new("material_country_requirements", &["requirements", "country_req"]),
            MatchRule::new("ip_shipping_timelines_report", &["shipping", "timeline", "logistics"]),
            MatchRule::new("distribution_order_report", &["distribution", "order", "shipment"]),
            MatchRule::new("qdocs", &["qdoc", "quality", "document"]),
        ])
    }

    pub fn from_yaml_str(yaml: &str, origin: &Path) -> Result<Self, IngestError> {
        let rules: Vec<MatchRule> =
            serde_yaml::from_str(yaml).map_err(|source| IngestError::Rules {
                path: origin.to_path_buf(),
                source,
            })?;
        Ok(Self::new(rules))
    }

    pub fn from_yaml_path(path: &Path) -> Result<Self, IngestError> {
        let text = fs::read_to_string(path).map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text, path)
    }

    /// Every rule must point at a table the registry knows.
    pub fn validate_against(&self, registry: &SchemaRegistry) -> Result<(), IngestError> {
        match self.rules.iter().find(|r| !registry.contains(&r.table)) {
            Some(rule) => Err(IngestError::UnknownRuleTable(rule.table.clone())),
            None => Ok(()),
        }
    }

    pub fn rules(&self) -> &[MatchRule] {
        &self.rules
    }

    pub fn match_stem(&self, stem: &str) -> Option<&str> {
        let stem = stem.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.patterns.iter().any(|p| stem.contains(p.as_str())))
            .map(|rule| rule.table.as_str())
    }

    /// Closest table name by Jaro-Winkler similarity. Diagnostic only.
    pub fn closest_table(&self, stem: &str) -> Option<(&str, f64)> {
        let stem = stem.to_lowercase();
        self.rules
            .iter()
            .map(|rule| (rule.table.as_str(), jaro_winkler(&stem, &rule.table)))
            .filter(|(_, score)| *score >= HINT_MIN_SIMILARITY)
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Map files to tables. Later files replace earlier ones for the same table.
    pub fn plan(&self, files: &[PathBuf]) -> LoadPlan {
        let mut plan = LoadPlan::default();
        for path in files {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            match self.match_stem(&stem) {
                Some(table) => {
                    if let Some(existing) = plan.loads.iter_mut().find(|l| l.table == table) {
                        warn!(
                            table,
                            replaced = %existing.path.display(),
                            by = %path.display(),
                            "several files map to one table; keeping the later file"
                        );
                        plan.overwritten.push(Overwrite {
                            table: table.to_string(),
                            replaced: existing.path.clone(),
                            by: path.clone(),
                        });
                        existing.path = path.clone();
                    } else {
                        debug!(file = %path.display(), table, "matched file");
                        plan.loads.push(PlannedLoad {
                            table: table.to_string(),
                            path: path.clone(),
                        });
                    }
                }
                None => {
                    let hint = self.closest_table(&stem).map(|(t, _)| t.to_string());
                    warn!(file = %path.display(), hint = ?hint, "unmatched file; skipping");
                    plan.unmatched.push(UnmatchedFile {
                        path: path.clone(),
                        hint,
                    });
                }
            }
        }
        plan
    }
}

impl Default for FileMatcher {
    fn default() -> Self {
        Self::builtin()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLoad {
    pub table: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overwrite {
    pub table: String,
    pub replaced: PathBuf,
    pub by: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedFile {
    pub path: PathBuf,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadPlan {
    pub loads: Vec<PlannedLoad>,
    pub overwritten: Vec<Overwrite>,
    pub unmatched: Vec<UnmatchedFile>,
}

/// `*.csv` files directly under `dir`, sorted by file name. A missing directory is empty.
pub fn discover_csv_files(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let io_err = |source| IngestError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        let is_csv = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if is_csv && path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// A CSV file as read: one header, rows padded or cut to the header width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

pub fn read_csv<R: Read>(reader: R) -> Result<RawTable, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    let headers = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect::<Vec<_>>();
    let width = headers.len();

    let mut records = Vec::new();
    for record in rdr.records() {
        let mut row = record?.iter().map(str::to_string).collect::<Vec<_>>();
        row.resize(width, String::new());
        records.push(row);
    }
    Ok(RawTable { headers, records })
}

pub fn read_csv_path(path: &Path) -> Result<RawTable, IngestError> {
    let file = fs::File::open(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_csv(file).map_err(|source| IngestError::Csv {
        path: path.to_path_buf(),
        source,
    })
}

/// Lowercase, with spaces and hyphens turned into underscores.
pub fn canonical_column_name(raw: &str) -> String {
    raw.trim().to_lowercase().replace([' ', '-'], "_")
}

pub fn is_date_column(canonical: &str) -> bool {
    canonical.contains("date")
}

fn normalize_cell(raw: &str, date_column: bool) -> CellValue {
    if NULL_TOKENS.contains(&raw) {
        return CellValue::Null;
    }
    if date_column {
        return parse_permissive_date(raw).map_or(CellValue::Null, CellValue::Date);
    }
    match raw.parse::<i64>() {
        Ok(n) if n.to_string() == raw => CellValue::Integer(n),
        _ => CellValue::Text(raw.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    /// Canonical names that appeared more than once; only the first is kept.
    pub duplicate_columns: Vec<String>,
    pub empty_rows_dropped: usize,
}

impl NormalizedTable {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Rename headers, null out sentinel tokens, parse date columns, drop all-null rows.
/// Never fails; unparseable dates become null.
pub fn normalize(raw: &RawTable) -> NormalizedTable {
    let mut seen = HashSet::new();
    let mut keep = Vec::new();
    let mut out = NormalizedTable::default();
    for (idx, header) in raw.headers.iter().enumerate() {
        let canonical = canonical_column_name(header);
        if seen.insert(canonical.clone()) {
            keep.push((idx, is_date_column(&canonical)));
            out.columns.push(canonical);
        } else {
            warn!(column = %canonical, "duplicate column after renaming; keeping first");
            out.duplicate_columns.push(canonical);
        }
    }

    for record in &raw.records {
        let row = keep
            .iter()
            .map(|&(idx, date_column)| {
                normalize_cell(record.get(idx).map(String::as_str).unwrap_or(""), date_column)
            })
            .collect::<Vec<_>>();
        if row.iter().all(CellValue::is_null) {
            out.empty_rows_dropped += 1;
        } else {
            out.rows.push(row);
        }
    }
    out
}

/// Post-normalization enrichment applied per destination table.
pub trait RecordHook: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, table: &str, data: &mut NormalizedTable);
}

static LEAD_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*days?").expect("lead time regex"));

/// Pull the day count out of free text such as `"6 days door-to-door"`.
pub fn parse_lead_time_days(text: &str) -> Option<i64> {
    LEAD_TIME_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Fills `lead_time_days` from `ip_timeline` for shipping timeline snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeadTimeHook;

impl RecordHook for LeadTimeHook {
    fn name(&self) -> &'static str {
        "lead_time_days"
    }

    fn apply(&self, table: &str, data: &mut NormalizedTable) {
        if table != "ip_shipping_timelines_report" {
            return;
        }
        let Some(source) = data.column_index("ip_timeline") else {
            return;
        };
        let target = match data.column_index("lead_time_days") {
            Some(idx) => idx,
            None => {
                data.columns.push("lead_time_days".to_string());
                for row in &mut data.rows {
                    row.push(CellValue::Null);
                }
                data.columns.len() - 1
            }
        };
        for row in &mut data.rows {
            if !row[target].is_null() {
                continue;
            }
            if let Some(days) = row[source].render().as_deref().and_then(parse_lead_time_days) {
                row[target] = CellValue::Integer(days);
            }
        }
    }
}

pub fn default_hooks() -> Vec<Box<dyn RecordHook>> {
    vec![Box::new(LeadTimeHook)]
}

/// Read, normalize and enrich one file bound for `table`.
pub fn prepare_file(
    path: &Path,
    table: &str,
    hooks: &[Box<dyn RecordHook>],
) -> Result<NormalizedTable, IngestError> {
    let raw = read_csv_path(path)?;
    let mut data = normalize(&raw);
    for hook in hooks {
        hook.apply(table, &mut data);
    }
    debug!(
        file = %path.display(),
        table,
        read = raw.records.len(),
        kept = data.rows.len(),
        "prepared CSV"
    );
    Ok(data)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Intersection {
    pub rows: ReconciledRows,
    pub dropped_csv_columns: Vec<String>,
    pub missing_table_columns: Vec<String>,
}

/// Keep only the CSV columns the live table has, in CSV order.
pub fn intersect(
    table: &str,
    data: NormalizedTable,
    live: &[LiveColumn],
) -> Result<Intersection, IngestError> {
    let mut kept = Vec::new();
    let mut dropped_csv_columns = Vec::new();
    for (idx, name) in data.columns.iter().enumerate() {
        match live.iter().find(|c| &c.name == name) {
            Some(column) => kept.push((idx, column.clone())),
            None => {
                warn!(table, column = %name, "CSV column has no counterpart in table; dropping");
                dropped_csv_columns.push(name.clone());
            }
        }
    }

    if kept.is_empty() {
        return Err(IngestError::NoMatchingColumns {
            table: table.to_string(),
            csv_columns: data.columns,
            table_columns: live.iter().map(|c| c.name.clone()).collect(),
        });
    }

    let missing_table_columns = live
        .iter()
        .filter(|c| !data.columns.contains(&c.name))
        .map(|c| c.name.clone())
        .collect();

    let rows = data
        .rows
        .into_iter()
        .map(|mut row| {
            kept.iter()
                .map(|(idx, _)| std::mem::replace(&mut row[*idx], CellValue::Null))
                .collect()
        })
        .collect();

    Ok(Intersection {
        rows: ReconciledRows {
            table: table.to_string(),
            columns: kept.into_iter().map(|(_, c)| c).collect(),
            rows,
        },
        dropped_csv_columns,
        missing_table_columns,
    })
}
