//! Alert file persistence and relational table stores for the control tower.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use cst_core::{
    parse_permissive_date, parse_permissive_datetime, AlertRecord, CellValue, ColumnType,
    LiveColumn, ReconciledRows,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "cst-storage";

/// Auto-generated identifier and audit columns never fed from CSV.
pub const SYSTEM_COLUMNS: &[&str] = &["id", "created_at", "updated_at"];

/// PostgreSQL's limit on bind parameters in one statement.
pub const MAX_BIND_PARAMS: usize = 65_535;

#[derive(Debug, Clone)]
pub struct StoredAlert {
    pub file_name: String,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
}

/// One entry of a directory listing. A file that fails to parse does not hide its siblings.
#[derive(Debug, Clone)]
pub enum AlertEntry {
    Parsed { file_name: String, alert: AlertRecord },
    Malformed { file_name: String, error: String },
}

impl AlertEntry {
    pub fn file_name(&self) -> &str {
        match self {
            AlertEntry::Parsed { file_name, .. } | AlertEntry::Malformed { file_name, .. } => {
                file_name
            }
        }
    }

    pub fn alert(&self) -> Option<&AlertRecord> {
        match self {
            AlertEntry::Parsed { alert, .. } => Some(alert),
            AlertEntry::Malformed { .. } => None,
        }
    }
}

/// Directory of immutable alert JSON documents, one per monitoring run.
#[derive(Debug, Clone)]
pub struct AlertStore {
    root: PathBuf,
}

impl AlertStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `alert_<timestamp>_<id prefix>.json`; lexical order is chronological order.
    pub fn file_name_for(alert: &AlertRecord) -> String {
        let stamp = alert.timestamp.format("%Y%m%d_%H%M%S_%6f");
        let id = alert.alert_id.simple().to_string();
        format!("alert_{stamp}_{}.json", &id[..8])
    }

    /// Write the alert with a temp-file rename so readers never observe a partial document.
    pub async fn persist(&self, alert: &AlertRecord) -> anyhow::Result<StoredAlert> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("creating alert directory {}", self.root.display()))?;

        let file_name = Self::file_name_for(alert);
        let absolute_path = self.root.join(&file_name);
        let bytes = serde_json::to_vec_pretty(alert).context("serializing alert record")?;

        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp alert file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp alert file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp alert file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming temp alert {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        Ok(StoredAlert {
            file_name,
            absolute_path,
            byte_size: bytes.len(),
        })
    }

    /// Newest-first listing of at most `limit` alert files.
    pub async fn list_latest(&self, limit: usize) -> anyhow::Result<Vec<AlertEntry>> {
        if !fs::try_exists(&self.root)
            .await
            .with_context(|| format!("checking alert directory {}", self.root.display()))?
        {
            return Ok(Vec::new());
        }

        let mut dir = fs::read_dir(&self.root)
            .await
            .with_context(|| format!("reading {}", self.root.display()))?;
        let mut names = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .with_context(|| format!("listing {}", self.root.display()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("alert_") && name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));

        let mut entries = Vec::new();
        for file_name in names.into_iter().take(limit) {
            let path = self.root.join(&file_name);
            let parsed = match fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<AlertRecord>(&bytes).map_err(|e| e.to_string()),
                Err(err) => Err(err.to_string()),
            };
            match parsed {
                Ok(alert) => entries.push(AlertEntry::Parsed { file_name, alert }),
                Err(error) => {
                    warn!(file = %file_name, %error, "skipping unreadable alert file");
                    entries.push(AlertEntry::Malformed { file_name, error });
                }
            }
        }
        Ok(entries)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("table {0} does not exist")]
    UnknownTable(String),
    #[error("table {table} has no column {column}")]
    UnknownColumn { table: String, column: String },
    #[error("row {row} for {table} has {actual} cells, expected {expected}")]
    RowWidth {
        table: String,
        row: usize,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub deleted_rows: u64,
    pub inserted_rows: u64,
    pub batches: usize,
    /// Non-null cells that could not be represented in their column type.
    pub coerced_to_null: usize,
}

/// Destination of snapshot loads. `replace_rows` is all-or-nothing: on error the
/// previous contents are still in place.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Data columns of `table`, excluding [`SYSTEM_COLUMNS`], in ordinal order.
    async fn live_columns(&self, table: &str) -> Result<Vec<LiveColumn>, StoreError>;

    async fn replace_rows(
        &self,
        rows: &ReconciledRows,
        batch_size: usize,
    ) -> Result<LoadStats, StoreError>;

    async fn row_count(&self, table: &str) -> Result<u64, StoreError>;
}

/// A cell converted to the destination column type, ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(Option<String>),
    Integer(Option<i64>),
    Decimal(Option<f64>),
    Date(Option<NaiveDate>),
    Timestamp(Option<NaiveDateTime>),
    Time(Option<NaiveTime>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        match self {
            SqlValue::Text(v) => v.is_none(),
            SqlValue::Integer(v) => v.is_none(),
            SqlValue::Decimal(v) => v.is_none(),
            SqlValue::Date(v) => v.is_none(),
            SqlValue::Timestamp(v) => v.is_none(),
            SqlValue::Time(v) => v.is_none(),
        }
    }
}

fn parse_integer_text(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    }
    let f = s.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
        Some(f as i64)
    } else {
        None
    }
}

fn parse_time_text(raw: &str) -> Option<NaiveTime> {
    let s = raw.trim();
    ["%H:%M:%S", "%H:%M:%S%.f", "%H:%M", "%I:%M:%S %p", "%I:%M %p"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
}

/// Scaled magnitude a `DECIMAL(10,2)` value must stay below once rounded to cents.
const DECIMAL_10_2_LIMIT: f64 = 1e10;

fn parse_float_cell(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Integer(n) => Some(*n as f64),
        CellValue::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Convert a normalized cell into `column_type`. The flag is true when a non-null
/// cell had to become NULL.
pub fn coerce_cell(cell: &CellValue, column_type: ColumnType) -> (SqlValue, bool) {
    let value = match column_type {
        ColumnType::Text => SqlValue::Text(cell.render()),
        ColumnType::SmallInt | ColumnType::Integer | ColumnType::BigInt => {
            let (min, max) = column_type.integer_bounds().unwrap_or((i64::MIN, i64::MAX));
            SqlValue::Integer(
                match cell {
                    CellValue::Integer(n) => Some(*n),
                    CellValue::Text(s) => parse_integer_text(s),
                    _ => None,
                }
                .filter(|n| (min..=max).contains(n)),
            )
        }
        ColumnType::Decimal => SqlValue::Decimal(
            parse_float_cell(cell).filter(|v| (v * 100.0).round().abs() < DECIMAL_10_2_LIMIT),
        ),
        ColumnType::Float => SqlValue::Decimal(parse_float_cell(cell)),
        ColumnType::Date => SqlValue::Date(match cell {
            CellValue::Date(d) => Some(*d),
            CellValue::Text(s) => parse_permissive_date(s),
            _ => None,
        }),
        ColumnType::Timestamp => SqlValue::Timestamp(match cell {
            CellValue::Date(d) => d.and_hms_opt(0, 0, 0),
            CellValue::Text(s) => parse_permissive_datetime(s),
            _ => None,
        }),
        ColumnType::Time => SqlValue::Time(match cell {
            CellValue::Text(s) => parse_time_text(s),
            _ => None,
        }),
    };
    let lossy = !cell.is_null() && value.is_null();
    (value, lossy)
}

fn coerce_row(row: &[CellValue], columns: &[LiveColumn], lossy: &mut usize) -> Vec<SqlValue> {
    row.iter()
        .zip(columns)
        .map(|(cell, column)| {
            let (value, dropped) = coerce_cell(cell, column.column_type);
            if dropped {
                *lossy += 1;
                debug!(column = %column.name, ?cell, "cell not representable; loading NULL");
            }
            value
        })
        .collect()
}

fn check_row_widths(rows: &ReconciledRows) -> Result<(), StoreError> {
    let expected = rows.columns.len();
    match rows.rows.iter().position(|r| r.len() != expected) {
        Some(row) => Err(StoreError::RowWidth {
            table: rows.table.clone(),
            row,
            expected,
            actual: rows.rows[row].len(),
        }),
        None => Ok(()),
    }
}

/// Rows per INSERT, capped so one statement stays under [`MAX_BIND_PARAMS`].
pub fn effective_batch_size(requested: usize, width: usize) -> usize {
    let cap = (MAX_BIND_PARAMS / width.max(1)).max(1);
    requested.max(1).min(cap)
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub async fn connect_pool(database_url: &str) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// PostgreSQL-backed table store.
#[derive(Debug, Clone)]
pub struct PgTableStore {
    pool: PgPool,
}

impl PgTableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(connect_pool(database_url).await?))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run DDL statements one at a time.
    pub async fn apply_schema(&self, statements: &[String]) -> Result<(), StoreError> {
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Delete and re-insert inside one transaction.
    async fn write_snapshot(
        &self,
        rows: &ReconciledRows,
        batch_size: usize,
    ) -> Result<LoadStats, StoreError> {
        let table = quote_ident(&rows.table);
        let column_list = rows
            .columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let batch_size = effective_batch_size(batch_size, rows.columns.len());

        // Dropping `tx` on an early return rolls back the delete.
        let mut tx = self.pool.begin().await?;
        let delete_sql = format!("DELETE FROM {table}");
        let deleted = sqlx::query(&delete_sql).execute(&mut *tx).await?.rows_affected();
        let mut stats = LoadStats {
            deleted_rows: deleted,
            ..LoadStats::default()
        };

        for chunk in rows.rows.chunks(batch_size) {
            let coerced = chunk
                .iter()
                .map(|row| coerce_row(row, &rows.columns, &mut stats.coerced_to_null))
                .collect::<Vec<_>>();

            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {table} ({column_list}) "));
            builder.push_values(coerced, |mut b, row| {
                for value in row {
                    match value {
                        SqlValue::Text(v) => {
                            b.push_bind(v);
                        }
                        SqlValue::Integer(v) => {
                            b.push_bind(v);
                        }
                        SqlValue::Decimal(v) => {
                            b.push_bind(v);
                        }
                        SqlValue::Date(v) => {
                            b.push_bind(v);
                        }
                        SqlValue::Timestamp(v) => {
                            b.push_bind(v);
                        }
                        SqlValue::Time(v) => {
                            b.push_bind(v);
                        }
                    }
                }
            });
            let result = builder.build().execute(&mut *tx).await?;
            stats.inserted_rows += result.rows_affected();
            stats.batches += 1;
        }

        tx.commit().await?;
        Ok(stats)
    }
}

#[async_trait]
impl TableStore for PgTableStore {
    async fn live_columns(&self, table: &str) -> Result<Vec<LiveColumn>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT column_name::text AS column_name,
                   data_type::text AS data_type
              FROM information_schema.columns
             WHERE table_schema = current_schema()
               AND table_name = $1
             ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(StoreError::UnknownTable(table.to_string()));
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("column_name")?;
            if SYSTEM_COLUMNS.contains(&name.as_str()) {
                continue;
            }
            let data_type: String = row.try_get("data_type")?;
            out.push(LiveColumn::new(name, ColumnType::from_pg_data_type(&data_type)));
        }
        Ok(out)
    }

    async fn replace_rows(
        &self,
        rows: &ReconciledRows,
        batch_size: usize,
    ) -> Result<LoadStats, StoreError> {
        check_row_widths(rows)?;
        let span = info_span!("replace_rows", table = %rows.table, rows = rows.rows.len());
        self.write_snapshot(rows, batch_size).instrument(span).await
    }

    async fn row_count(&self, table: &str) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) AS n FROM {}", quote_ident(table));
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }
}

#[derive(Debug, Clone, Default)]
struct MemoryTable {
    columns: Vec<LiveColumn>,
    rows: Vec<BTreeMap<String, SqlValue>>,
}

/// In-process table store, used for dry runs. Rows are kept as column → value maps;
/// columns not loaded are absent.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: Mutex<BTreeMap<String, MemoryTable>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: impl Into<String>, columns: Vec<LiveColumn>) -> Self {
        self.tables.get_mut().insert(
            name.into(),
            MemoryTable {
                columns,
                rows: Vec::new(),
            },
        );
        self
    }

    pub async fn rows(&self, table: &str) -> Option<Vec<BTreeMap<String, SqlValue>>> {
        self.tables.lock().await.get(table).map(|t| t.rows.clone())
    }

    pub async fn seed_rows(
        &self,
        table: &str,
        rows: Vec<BTreeMap<String, SqlValue>>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let entry = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        entry.rows = rows;
        Ok(())
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn live_columns(&self, table: &str) -> Result<Vec<LiveColumn>, StoreError> {
        let tables = self.tables.lock().await;
        let entry = tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        Ok(entry
            .columns
            .iter()
            .filter(|c| !SYSTEM_COLUMNS.contains(&c.name.as_str()))
            .cloned()
            .collect())
    }

    async fn replace_rows(
        &self,
        rows: &ReconciledRows,
        batch_size: usize,
    ) -> Result<LoadStats, StoreError> {
        check_row_widths(rows)?;
        let mut tables = self.tables.lock().await;
        let entry = tables
            .get_mut(&rows.table)
            .ok_or_else(|| StoreError::UnknownTable(rows.table.clone()))?;

        if let Some(missing) = rows
            .columns
            .iter()
            .find(|c| !entry.columns.iter().any(|t| t.name == c.name))
        {
            return Err(StoreError::UnknownColumn {
                table: rows.table.clone(),
                column: missing.name.clone(),
            });
        }

        let mut stats = LoadStats::default();
        let mut staged = Vec::with_capacity(rows.rows.len());
        for row in &rows.rows {
            let values = coerce_row(row, &rows.columns, &mut stats.coerced_to_null);
            staged.push(
                rows.columns
                    .iter()
                    .map(|c| c.name.clone())
                    .zip(values)
                    .collect::<BTreeMap<_, _>>(),
            );
        }

        stats.deleted_rows = entry.rows.len() as u64;
        stats.inserted_rows = staged.len() as u64;
        stats.batches = staged
            .len()
            .div_ceil(effective_batch_size(batch_size, rows.columns.len()));
        entry.rows = staged;
        Ok(stats)
    }

    async fn row_count(&self, table: &str) -> Result<u64, StoreError> {
        let tables = self.tables.lock().await;
        tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use cst_core::{build_alert, RiskTier};
    use serde_json::json;
    use tempfile::tempdir;

    fn alert_at(secs: i64, severity: RiskTier) -> AlertRecord {
        let mut alert = build_alert(
            "daily_monitoring",
            severity,
            &[json!({"lot": "L1"})],
            &BTreeMap::new(),
        );
        alert.timestamp = Utc.timestamp_opt(1_760_000_000 + secs, 0).single().unwrap();
        alert
    }

    fn inventory_columns() -> Vec<LiveColumn> {
        vec![
            LiveColumn::new("trial_name", ColumnType::Text),
            LiveColumn::new("lot", ColumnType::Text),
            LiveColumn::new("expiry_date", ColumnType::Date),
            LiveColumn::new("received_packages", ColumnType::Integer),
            LiveColumn::new("min_qty", ColumnType::Integer),
        ]
    }

    fn reconciled(rows: Vec<Vec<CellValue>>) -> ReconciledRows {
        ReconciledRows {
            table: "available_inventory_report".into(),
            columns: vec![
                LiveColumn::new("trial_name", ColumnType::Text),
                LiveColumn::new("lot", ColumnType::Text),
                LiveColumn::new("expiry_date", ColumnType::Date),
            ],
            rows,
        }
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[tokio::test]
    async fn persisted_alerts_list_newest_first() {
        let dir = tempdir().expect("tempdir");
        let store = AlertStore::new(dir.path().join("alerts"));

        let older = alert_at(0, RiskTier::High);
        let newer = alert_at(60, RiskTier::Critical);
        store.persist(&older).await.expect("persist older");
        let stored = store.persist(&newer).await.expect("persist newer");
        assert!(stored.absolute_path.exists());
        assert!(stored.file_name.starts_with("alert_20"));

        let entries = store.list_latest(10).await.expect("list");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].alert().unwrap().alert_id, newer.alert_id);
        assert_eq!(entries[1].alert().unwrap().alert_id, older.alert_id);

        let limited = store.list_latest(1).await.expect("list");
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn alerts_in_same_second_get_separate_files() {
        let dir = tempdir().expect("tempdir");
        let store = AlertStore::new(dir.path());
        let a = alert_at(5, RiskTier::High);
        let mut b = alert_at(5, RiskTier::High);
        b.alert_id = Uuid::new_v4();

        let first = store.persist(&a).await.expect("first");
        let second = store.persist(&b).await.expect("second");
        assert_ne!(first.file_name, second.file_name);
        assert_eq!(store.list_latest(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn malformed_alert_file_does_not_hide_others() {
        let dir = tempdir().expect("tempdir");
        let store = AlertStore::new(dir.path());
        let good = alert_at(0, RiskTier::Medium);
        store.persist(&good).await.expect("persist");
        std::fs::write(dir.path().join("alert_29991231_235959_000000_deadbeef.json"), b"{ nope")
            .expect("write junk");
        std::fs::write(dir.path().join("notes.txt"), b"ignored").expect("write other");

        let entries = store.list_latest(10).await.expect("list");
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0], AlertEntry::Malformed { .. }));
        assert_eq!(entries[1].alert().unwrap().alert_id, good.alert_id);
    }

    #[tokio::test]
    async fn missing_alert_directory_lists_nothing() {
        let dir = tempdir().expect("tempdir");
        let store = AlertStore::new(dir.path().join("never-created"));
        assert!(store.list_latest(5).await.expect("list").is_empty());
    }

    #[test]
    fn cells_coerce_into_column_types() {
        let d = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        assert_eq!(
            coerce_cell(&CellValue::Integer(7), ColumnType::Text),
            (SqlValue::Text(Some("7".into())), false)
        );
        assert_eq!(
            coerce_cell(&text("12.0"), ColumnType::Integer),
            (SqlValue::Integer(Some(12)), false)
        );
        assert_eq!(
            coerce_cell(&text("twelve"), ColumnType::Integer),
            (SqlValue::Integer(None), true)
        );
        assert_eq!(
            coerce_cell(&CellValue::Integer(3), ColumnType::Decimal),
            (SqlValue::Decimal(Some(3.0)), false)
        );
        assert_eq!(
            coerce_cell(&text("2025-01-31"), ColumnType::Date),
            (SqlValue::Date(Some(d)), false)
        );
        assert_eq!(
            coerce_cell(&CellValue::Date(d), ColumnType::Timestamp),
            (SqlValue::Timestamp(d.and_hms_opt(0, 0, 0)), false)
        );
        assert_eq!(
            coerce_cell(&text("14:05:00"), ColumnType::Time),
            (SqlValue::Time(NaiveTime::from_hms_opt(14, 5, 0)), false)
        );
        assert_eq!(
            coerce_cell(&CellValue::Null, ColumnType::Integer),
            (SqlValue::Integer(None), false)
        );
    }

    #[test]
    fn out_of_range_cells_become_null() {
        assert_eq!(
            coerce_cell(&CellValue::Integer(3_000_000_000), ColumnType::Integer),
            (SqlValue::Integer(None), true)
        );
        assert_eq!(
            coerce_cell(&CellValue::Integer(2_147_483_647), ColumnType::Integer),
            (SqlValue::Integer(Some(2_147_483_647)), false)
        );
        assert_eq!(
            coerce_cell(&CellValue::Integer(3_000_000_000), ColumnType::BigInt),
            (SqlValue::Integer(Some(3_000_000_000)), false)
        );
        assert_eq!(
            coerce_cell(&text("40000"), ColumnType::SmallInt),
            (SqlValue::Integer(None), true)
        );
        assert_eq!(
            coerce_cell(&text("123456789.5"), ColumnType::Decimal),
            (SqlValue::Decimal(None), true)
        );
        assert_eq!(
            coerce_cell(&text("99999999.999"), ColumnType::Decimal),
            (SqlValue::Decimal(None), true)
        );
        assert_eq!(
            coerce_cell(&text("99999999.99"), ColumnType::Decimal),
            (SqlValue::Decimal(Some(99_999_999.99)), false)
        );
        assert_eq!(
            coerce_cell(&text("123456789.5"), ColumnType::Float),
            (SqlValue::Decimal(Some(123_456_789.5)), false)
        );
    }

    #[tokio::test]
    async fn pg_replace_runs_on_spawned_task_and_surfaces_connect_errors() {
        let pool = PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_secs(2))
            .connect_lazy("postgres://postgres@127.0.0.1:1/none")
            .unwrap();
        let store = PgTableStore::new(pool);
        let handle = tokio::spawn(async move { store.replace_rows(&reconciled(vec![]), 100).await });
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, StoreError::Database(_)));
    }

    #[test]
    fn batch_size_respects_bind_limit() {
        assert_eq!(effective_batch_size(1000, 30), 1000);
        assert_eq!(effective_batch_size(1000, 100), 655);
        assert_eq!(effective_batch_size(0, 5), 1);
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("rim"), "\"rim\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn memory_store_replaces_previous_snapshot() {
        let store = MemoryTableStore::new().with_table("available_inventory_report", inventory_columns());
        let first = reconciled(vec![
            vec![text("T1"), text("L1"), CellValue::Null],
            vec![text("T1"), text("L2"), CellValue::Null],
        ]);
        store.replace_rows(&first, 1000).await.expect("first load");

        let d = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        let second = reconciled(vec![vec![text("T2"), text("L9"), CellValue::Date(d)]]);
        let stats = store.replace_rows(&second, 1000).await.expect("second load");
        assert_eq!(stats.deleted_rows, 2);
        assert_eq!(stats.inserted_rows, 1);
        assert_eq!(stats.batches, 1);

        let rows = store.rows("available_inventory_report").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["lot"], SqlValue::Text(Some("L9".into())));
        assert_eq!(rows[0]["expiry_date"], SqlValue::Date(Some(d)));
        assert!(!rows[0].contains_key("min_qty"));
    }

    #[tokio::test]
    async fn memory_store_keeps_old_rows_when_load_fails() {
        let store = MemoryTableStore::new().with_table("available_inventory_report", inventory_columns());
        let first = reconciled(vec![vec![text("T1"), text("L1"), CellValue::Null]]);
        store.replace_rows(&first, 1000).await.expect("first load");

        let mut bad_rows = (0..1500)
            .map(|i| vec![text("T"), text(&format!("L{i}")), CellValue::Null])
            .collect::<Vec<_>>();
        bad_rows[1200].pop();
        let err = store
            .replace_rows(&reconciled(bad_rows), 1000)
            .await
            .expect_err("width mismatch");
        assert!(matches!(err, StoreError::RowWidth { row: 1200, .. }));

        let rows = store.rows("available_inventory_report").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["lot"], SqlValue::Text(Some("L1".into())));
    }

    #[tokio::test]
    async fn memory_store_reports_unknown_tables_and_columns() {
        let store = MemoryTableStore::new().with_table("rim", vec![LiveColumn::new("name_v", ColumnType::Text)]);
        assert!(matches!(
            store.live_columns("qdocs").await,
            Err(StoreError::UnknownTable(_))
        ));
        let rows = ReconciledRows {
            table: "rim".into(),
            columns: vec![LiveColumn::new("status_v", ColumnType::Text)],
            rows: vec![vec![text("Approved")]],
        };
        assert!(matches!(
            store.replace_rows(&rows, 10).await,
            Err(StoreError::UnknownColumn { .. })
        ));
        assert_eq!(store.row_count("rim").await.unwrap(), 0);
    }
}
