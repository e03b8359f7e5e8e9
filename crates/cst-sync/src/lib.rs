//! Configuration, snapshot ingestion runs and the supply watchdog.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use cst_core::{build_alert, classify_expiry, AlertRecord, RiskTier, ThresholdConfig};
use cst_ingest::{
    default_hooks, discover_csv_files, intersect, prepare_file, FileMatcher, PlannedLoad,
    RecordHook, SchemaRegistry,
};
use cst_storage::{AlertStore, MemoryTableStore, PgTableStore, TableStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "cst-sync";

pub const MONITORING_ALERT_TYPE: &str = "daily_monitoring";
/// Expiring lots fetched per monitoring run.
pub const EXPIRY_QUERY_LIMIT: i64 = 50;
/// Shortfall groups fetched per monitoring run.
pub const SHORTFALL_QUERY_LIMIT: i64 = 20;
/// Expiry items attached to a monitoring alert.
pub const ALERT_TOP_ITEMS: usize = 10;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub data_dir: PathBuf,
    pub alerts_dir: PathBuf,
    pub file_patterns_path: Option<PathBuf>,
    pub thresholds: ThresholdConfig,
    pub monitoring_enabled: bool,
    pub monitoring_schedule: String,
    pub insert_batch_size: usize,
    pub web_port: u16,
    pub log_level: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| {
            let user = var("DB_USER", "postgres");
            let password = var("DB_PASSWORD", "");
            let credentials = if password.is_empty() {
                user
            } else {
                format!("{user}:{password}")
            };
            format!(
                "postgres://{credentials}@{}:{}/{}",
                var("DB_HOST", "localhost"),
                var("DB_PORT", "5432"),
                var("DB_NAME", "clinical_supply_chain"),
            )
        });

        let thresholds = ThresholdConfig::new(
            parse_var(&lookup, "EXPIRY_CRITICAL_DAYS", 30)?,
            parse_var(&lookup, "EXPIRY_HIGH_DAYS", 60)?,
            parse_var(&lookup, "EXPIRY_MEDIUM_DAYS", 90)?,
            parse_var(&lookup, "SHORTFALL_HORIZON_WEEKS", 8)?,
        )
        .context("invalid risk thresholds")?;

        let insert_batch_size: usize = parse_var(&lookup, "INSERT_BATCH_SIZE", 1000)?;
        if insert_batch_size == 0 {
            anyhow::bail!("invalid INSERT_BATCH_SIZE: must be positive");
        }

        Ok(Self {
            database_url,
            data_dir: PathBuf::from(var("DATA_DIR", "./database/data")),
            alerts_dir: PathBuf::from(var("ALERTS_DIR", "./alerts")),
            file_patterns_path: lookup("FILE_PATTERNS_PATH").map(PathBuf::from),
            thresholds,
            monitoring_enabled: lookup("ENABLE_DAILY_MONITORING")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(true),
            monitoring_schedule: var("MONITORING_SCHEDULE", "0 6 * * *"),
            insert_batch_size,
            web_port: parse_var(&lookup, "WEB_PORT", 8000)?,
            log_level: var("LOG_LEVEL", "info").to_lowercase(),
        })
    }

    /// File matcher from `FILE_PATTERNS_PATH`, or the built-in rules.
    pub fn file_matcher(&self, registry: &SchemaRegistry) -> Result<FileMatcher> {
        let matcher = match &self.file_patterns_path {
            Some(path) => FileMatcher::from_yaml_path(path)?,
            None => FileMatcher::builtin(),
        };
        matcher.validate_against(registry)?;
        Ok(matcher)
    }
}

/// Parse `key` when present; only an absent variable falls back to `default`.
fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid {key}: {raw:?}")),
        None => Ok(default),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    Loaded,
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOutcome {
    pub table: String,
    pub file: String,
    #[serde(flatten)]
    pub status: TableStatus,
    pub rows_loaded: u64,
    pub rows_replaced: u64,
    pub dropped_columns: Vec<String>,
    pub coerced_to_null: usize,
}

impl TableOutcome {
    fn new(load: &PlannedLoad, status: TableStatus) -> Self {
        Self {
            table: load.table.clone(),
            file: load.path.display().to_string(),
            status,
            rows_loaded: 0,
            rows_replaced: 0,
            dropped_columns: Vec::new(),
            coerced_to_null: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub data_dir: String,
    pub dry_run: bool,
    pub files_found: usize,
    pub unmatched_files: Vec<String>,
    pub overwritten_files: Vec<String>,
    pub tables: Vec<TableOutcome>,
}

impl IngestRunSummary {
    fn count(&self, pred: impl Fn(&TableStatus) -> bool) -> usize {
        self.tables.iter().filter(|t| pred(&t.status)).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, TableStatus::Loaded))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, TableStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, TableStatus::Failed { .. }))
    }
}

/// Sequential snapshot load of every matched CSV in a directory.
pub struct IngestPipeline {
    store: Box<dyn TableStore>,
    matcher: FileMatcher,
    hooks: Vec<Box<dyn RecordHook>>,
    batch_size: usize,
    dry_run: bool,
}

impl IngestPipeline {
    pub fn new(store: Box<dyn TableStore>, matcher: FileMatcher, batch_size: usize) -> Self {
        Self {
            store,
            matcher,
            hooks: default_hooks(),
            batch_size,
            dry_run: false,
        }
    }

    pub fn with_hooks(mut self, hooks: Vec<Box<dyn RecordHook>>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn run(&self, data_dir: &Path) -> Result<IngestRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let files = discover_csv_files(data_dir)?;
        if files.is_empty() {
            warn!(dir = %data_dir.display(), "no CSV files found");
        }
        let plan = self.matcher.plan(&files);

        let mut tables = Vec::with_capacity(plan.loads.len());
        for load in &plan.loads {
            let span = info_span!("table_load", table = %load.table, file = %load.path.display());
            let outcome = match self.load_table(load).instrument(span.clone()).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    let error = format!("{err:#}");
                    span.in_scope(|| error!(%error, "table load failed; previous contents kept"));
                    TableOutcome::new(load, TableStatus::Failed { error })
                }
            };
            tables.push(outcome);
        }

        let summary = IngestRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            data_dir: data_dir.display().to_string(),
            dry_run: self.dry_run,
            files_found: files.len(),
            unmatched_files: plan
                .unmatched
                .iter()
                .map(|u| u.path.display().to_string())
                .collect(),
            overwritten_files: plan
                .overwritten
                .iter()
                .map(|o| o.replaced.display().to_string())
                .collect(),
            tables,
        };
        info!(
            %run_id,
            succeeded = summary.succeeded(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            dry_run = self.dry_run,
            "ingestion run finished"
        );
        Ok(summary)
    }

    async fn load_table(&self, load: &PlannedLoad) -> Result<TableOutcome> {
        let data = prepare_file(&load.path, &load.table, &self.hooks)?;
        if data.is_empty() {
            warn!("no rows left after normalization; skipping");
            return Ok(TableOutcome::new(
                load,
                TableStatus::Skipped {
                    reason: "no data after cleaning".to_string(),
                },
            ));
        }

        let live = self
            .store
            .live_columns(&load.table)
            .await
            .with_context(|| format!("reading columns of {}", load.table))?;
        let intersection = intersect(&load.table, data, &live)?;
        let stats = self
            .store
            .replace_rows(&intersection.rows, self.batch_size)
            .await
            .with_context(|| format!("replacing rows of {}", load.table))?;
        if stats.coerced_to_null > 0 {
            warn!(cells = stats.coerced_to_null, "cells did not fit their column type and were loaded as NULL");
        }
        info!(rows = stats.inserted_rows, replaced = stats.deleted_rows, "table loaded");

        Ok(TableOutcome {
            rows_loaded: stats.inserted_rows,
            rows_replaced: stats.deleted_rows,
            dropped_columns: intersection.dropped_csv_columns,
            coerced_to_null: stats.coerced_to_null,
            ..TableOutcome::new(load, TableStatus::Loaded)
        })
    }
}

/// In-memory store with every registry table, for dry runs.
pub fn memory_store_from_registry(registry: &SchemaRegistry) -> MemoryTableStore {
    registry
        .tables()
        .iter()
        .fold(MemoryTableStore::new(), |store, table| {
            store.with_table(table.name, table.live_columns())
        })
}

/// Load `data_dir` (defaulting to the configured directory). A database that cannot be
/// reached fails the whole run; per-table problems only fail their table.
pub async fn run_ingest(
    config: &AppConfig,
    data_dir: Option<&Path>,
    dry_run: bool,
) -> Result<IngestRunSummary> {
    let registry = SchemaRegistry::builtin();
    let matcher = config.file_matcher(&registry)?;
    let store: Box<dyn TableStore> = if dry_run {
        Box::new(memory_store_from_registry(&registry))
    } else {
        Box::new(
            PgTableStore::connect(&config.database_url)
                .await
                .context("connecting to the database")?,
        )
    };
    let pipeline = IngestPipeline::new(store, matcher, config.insert_batch_size).dry_run(dry_run);
    pipeline
        .run(data_dir.unwrap_or(&config.data_dir))
        .await
}

/// Create the registry's tables and indexes if they do not exist.
pub async fn setup_schema(config: &AppConfig) -> Result<usize> {
    let store = PgTableStore::connect(&config.database_url)
        .await
        .context("connecting to the database")?;
    let statements = SchemaRegistry::builtin().ddl_statements();
    store
        .apply_schema(&statements)
        .await
        .context("applying table definitions")?;
    Ok(statements.len())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExpiringLot {
    pub trial_name: Option<String>,
    pub location: Option<String>,
    pub lot: Option<String>,
    pub material: Option<String>,
    pub expiry_date: NaiveDate,
    pub days_until_expiry: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShortfallGroup {
    pub trial_name: Option<String>,
    pub location: Option<String>,
    pub batch_count: i64,
    pub expiring_soon: i64,
}

/// Point-in-time inventory reads behind a monitoring run.
#[async_trait]
pub trait RiskSource: Send + Sync {
    /// Lots expiring after today and no later than `within_days` from today, soonest first.
    async fn expiring_lots(&self, within_days: i64, limit: i64) -> Result<Vec<ExpiringLot>>;

    /// (trial, location) groups with at least one lot expiring within `window_days`.
    async fn shortfall_groups(&self, window_days: i64, limit: i64) -> Result<Vec<ShortfallGroup>>;
}

pub struct PgRiskSource {
    pool: PgPool,
}

impl PgRiskSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RiskSource for PgRiskSource {
    async fn expiring_lots(&self, within_days: i64, limit: i64) -> Result<Vec<ExpiringLot>> {
        let rows = sqlx::query_as::<_, ExpiringLot>(
            r#"
            SELECT trial_name::text AS trial_name,
                   location::text AS location,
                   lot::text AS lot,
                   package_type_description AS material,
                   expiry_date::date AS expiry_date,
                   (expiry_date::date - CURRENT_DATE)::int8 AS days_until_expiry
              FROM available_inventory_report
             WHERE expiry_date IS NOT NULL
               AND expiry_date::date > CURRENT_DATE
               AND expiry_date::date <= CURRENT_DATE + $1::int4
             ORDER BY expiry_date ASC
             LIMIT $2
            "#,
        )
        .bind(i32::try_from(within_days).context("expiry window out of range")?)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("querying expiring inventory")?;
        Ok(rows)
    }

    async fn shortfall_groups(&self, window_days: i64, limit: i64) -> Result<Vec<ShortfallGroup>> {
        let rows = sqlx::query_as::<_, ShortfallGroup>(
            r#"
            SELECT trial_name::text AS trial_name,
                   location::text AS location,
                   COUNT(*)::int8 AS batch_count,
                   SUM(CASE WHEN expiry_date::date <= CURRENT_DATE + $1::int4 THEN 1 ELSE 0 END)::int8
                       AS expiring_soon
              FROM available_inventory_report
             WHERE expiry_date IS NOT NULL
             GROUP BY trial_name, location
            HAVING SUM(CASE WHEN expiry_date::date <= CURRENT_DATE + $1::int4 THEN 1 ELSE 0 END) > 0
             ORDER BY expiring_soon DESC
             LIMIT $2
            "#,
        )
        .bind(i32::try_from(window_days).context("shortfall window out of range")?)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("querying shortfall groups")?;
        Ok(rows)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiryRisk {
    pub trial_name: Option<String>,
    pub location: Option<String>,
    pub lot: Option<String>,
    pub material: Option<String>,
    pub expiry_date: NaiveDate,
    pub days_until_expiry: i64,
    pub risk_level: RiskTier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortfallRisk {
    pub trial_name: Option<String>,
    pub location: Option<String>,
    pub total_batches: i64,
    pub expiring_soon: i64,
    pub risk_level: RiskTier,
}

pub fn classify_expiring_lots(lots: &[ExpiringLot], thresholds: &ThresholdConfig) -> Vec<ExpiryRisk> {
    lots.iter()
        .map(|lot| ExpiryRisk {
            trial_name: lot.trial_name.clone(),
            location: lot.location.clone(),
            lot: lot.lot.clone(),
            material: lot.material.clone(),
            expiry_date: lot.expiry_date,
            days_until_expiry: lot.days_until_expiry,
            risk_level: classify_expiry(lot.days_until_expiry, thresholds),
        })
        .collect()
}

/// Groups where at least half the lots expire inside the window are HIGH risk.
pub fn shortfall_risks(groups: &[ShortfallGroup]) -> Vec<ShortfallRisk> {
    groups
        .iter()
        .filter(|g| g.batch_count > 0 && g.expiring_soon * 2 >= g.batch_count)
        .map(|g| ShortfallRisk {
            trial_name: g.trial_name.clone(),
            location: g.location.clone(),
            total_batches: g.batch_count,
            expiring_soon: g.expiring_soon,
            risk_level: RiskTier::High,
        })
        .collect()
}

/// Count per tier, every tier present.
pub fn severity_breakdown(risks: &[ExpiryRisk]) -> BTreeMap<RiskTier, usize> {
    let mut counts: BTreeMap<RiskTier, usize> = RiskTier::ALL.iter().map(|t| (*t, 0)).collect();
    for risk in risks {
        *counts.entry(risk.risk_level).or_default() += 1;
    }
    counts
}

pub fn overall_severity(expiry: &[ExpiryRisk], shortfalls: &[ShortfallRisk]) -> RiskTier {
    let has = |tier| expiry.iter().any(|r| r.risk_level == tier);
    if has(RiskTier::Critical) {
        RiskTier::Critical
    } else if has(RiskTier::High) || !shortfalls.is_empty() {
        RiskTier::High
    } else if has(RiskTier::Medium) {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

/// Consolidated alert for one monitoring pass.
pub fn monitoring_alert(expiry: &[ExpiryRisk], shortfalls: &[ShortfallRisk]) -> Result<AlertRecord> {
    let items = expiry
        .iter()
        .take(ALERT_TOP_ITEMS)
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()
        .context("serializing expiry risks")?;
    let breakdown = severity_breakdown(expiry)
        .into_iter()
        .map(|(tier, n)| (tier.as_str().to_string(), json!(n)))
        .collect::<serde_json::Map<_, _>>();

    let mut metadata = BTreeMap::new();
    metadata.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
    metadata.insert("expiry_risk_count".to_string(), json!(expiry.len()));
    metadata.insert("shortfall_risk_count".to_string(), json!(shortfalls.len()));
    metadata.insert("severity_breakdown".to_string(), JsonValue::Object(breakdown));
    metadata.insert(
        "shortfall_risks".to_string(),
        serde_json::to_value(shortfalls).context("serializing shortfall risks")?,
    );

    Ok(build_alert(
        MONITORING_ALERT_TYPE,
        overall_severity(expiry, shortfalls),
        &items,
        &metadata,
    ))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSummary {
    pub alert_id: Uuid,
    pub severity: RiskTier,
    pub expiry_risk_count: usize,
    pub shortfall_risk_count: usize,
    pub alert_file: String,
}

/// Reads current risks, builds one alert and persists it.
pub struct Watchdog {
    source: Box<dyn RiskSource>,
    store: AlertStore,
    thresholds: ThresholdConfig,
}

impl Watchdog {
    pub fn new(source: Box<dyn RiskSource>, store: AlertStore, thresholds: ThresholdConfig) -> Self {
        Self {
            source,
            store,
            thresholds,
        }
    }

    pub async fn run_once(&self) -> Result<MonitoringSummary> {
        let span = info_span!("monitoring_run");
        async {
            let lots = self
                .source
                .expiring_lots(self.thresholds.medium_days(), EXPIRY_QUERY_LIMIT)
                .await?;
            let expiry = classify_expiring_lots(&lots, &self.thresholds);
            let groups = self
                .source
                .shortfall_groups(self.thresholds.critical_days(), SHORTFALL_QUERY_LIMIT)
                .await?;
            let shortfalls = shortfall_risks(&groups);

            let alert = monitoring_alert(&expiry, &shortfalls)?;
            let stored = self.store.persist(&alert).await?;
            info!(
                alert_id = %alert.alert_id,
                severity = %alert.severity,
                expiry_risks = expiry.len(),
                shortfall_risks = shortfalls.len(),
                file = %stored.absolute_path.display(),
                "monitoring alert written"
            );
            Ok(MonitoringSummary {
                alert_id: alert.alert_id,
                severity: alert.severity,
                expiry_risk_count: expiry.len(),
                shortfall_risk_count: shortfalls.len(),
                alert_file: stored.file_name,
            })
        }
        .instrument(span)
        .await
    }
}

pub async fn run_monitoring(config: &AppConfig) -> Result<MonitoringSummary> {
    let pool = cst_storage::connect_pool(&config.database_url)
        .await
        .context("connecting to the database")?;
    let watchdog = Watchdog::new(
        Box::new(PgRiskSource::new(pool)),
        AlertStore::new(config.alerts_dir.clone()),
        config.thresholds,
    );
    watchdog.run_once().await
}

/// Cron job running the watchdog, when daily monitoring is enabled.
pub async fn maybe_build_scheduler(config: &AppConfig) -> Result<Option<JobScheduler>> {
    if !config.monitoring_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let shared = Arc::new(config.clone());
    let cron = config.monitoring_schedule.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let config = Arc::clone(&shared);
        Box::pin(async move {
            match run_monitoring(&config).await {
                Ok(summary) => info!(alert_id = %summary.alert_id, severity = %summary.severity, "scheduled monitoring run done"),
                Err(err) => error!(error = %format!("{err:#}"), "scheduled monitoring run failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;

    use chrono::Days;
    use cst_storage::SqlValue;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn lot(days: i64) -> ExpiringLot {
        ExpiringLot {
            trial_name: Some("CT-2004-PSX".into()),
            location: Some("Site 101".into()),
            lot: Some(format!("LOT-{days}")),
            material: Some("Bottle 30ct".into()),
            expiry_date: NaiveDate::from_ymd_opt(2026, 1, 1)
                .unwrap()
                .checked_add_days(Days::new(days as u64))
                .unwrap(),
            days_until_expiry: days,
        }
    }

    fn group(batch_count: i64, expiring_soon: i64) -> ShortfallGroup {
        ShortfallGroup {
            trial_name: Some("CT-5531-QRT".into()),
            location: Some("Depot EU".into()),
            batch_count,
            expiring_soon,
        }
    }

    struct FixtureRisks {
        lots: Vec<ExpiringLot>,
        groups: Vec<ShortfallGroup>,
    }

    #[async_trait]
    impl RiskSource for FixtureRisks {
        async fn expiring_lots(&self, within_days: i64, limit: i64) -> Result<Vec<ExpiringLot>> {
            Ok(self
                .lots
                .iter()
                .filter(|l| l.days_until_expiry > 0 && l.days_until_expiry <= within_days)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn shortfall_groups(&self, _window_days: i64, limit: i64) -> Result<Vec<ShortfallGroup>> {
            Ok(self.groups.iter().take(limit as usize).cloned().collect())
        }
    }

    #[tokio::test]
    async fn risk_windows_beyond_day_range_are_rejected() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://postgres@127.0.0.1:1/none")
            .unwrap();
        let source = PgRiskSource::new(pool);
        let err = source.expiring_lots(4_294_967_386, 10).await.unwrap_err();
        assert!(format!("{err:#}").contains("out of range"));
        let err = source.shortfall_groups(i64::MAX, 10).await.unwrap_err();
        assert!(format!("{err:#}").contains("out of range"));
    }

    #[test]
    fn config_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(
            config.database_url,
            "postgres://postgres@localhost:5432/clinical_supply_chain"
        );
        assert_eq!(config.data_dir, PathBuf::from("./database/data"));
        assert_eq!(config.alerts_dir, PathBuf::from("./alerts"));
        assert_eq!(config.thresholds, ThresholdConfig::default());
        assert!(config.monitoring_enabled);
        assert_eq!(config.monitoring_schedule, "0 6 * * *");
        assert_eq!(config.insert_batch_size, 1000);
        assert_eq!(config.web_port, 8000);
        assert_eq!(config.log_level, "info");
        assert!(config.file_patterns_path.is_none());
    }

    #[test]
    fn config_overrides_and_validation() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DB_USER", "supply"),
            ("DB_PASSWORD", "s3cret"),
            ("DB_HOST", "db"),
            ("EXPIRY_CRITICAL_DAYS", "14"),
            ("ENABLE_DAILY_MONITORING", "false"),
            ("INSERT_BATCH_SIZE", "250"),
            ("WEB_PORT", "9090"),
            ("LOG_LEVEL", "DEBUG"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "postgres://supply:s3cret@db:5432/clinical_supply_chain");
        assert_eq!(config.thresholds.critical_days(), 14);
        assert!(!config.monitoring_enabled);
        assert_eq!(config.insert_batch_size, 250);
        assert_eq!(config.web_port, 9090);
        assert_eq!(config.log_level, "debug");

        let explicit = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://x@y/z")])).unwrap();
        assert_eq!(explicit.database_url, "postgres://x@y/z");

        let err = AppConfig::from_lookup(lookup(&[("EXPIRY_HIGH_DAYS", "20")])).unwrap_err();
        assert!(format!("{err:#}").contains("ascending"));
    }

    #[test]
    fn config_rejects_malformed_numbers() {
        for (key, value) in [
            ("EXPIRY_CRITICAL_DAYS", "fourteen"),
            ("SHORTFALL_HORIZON_WEEKS", "-3"),
            ("INSERT_BATCH_SIZE", "0"),
            ("INSERT_BATCH_SIZE", "lots"),
            ("WEB_PORT", "70000"),
        ] {
            let err = AppConfig::from_lookup(lookup(&[(key, value)])).unwrap_err();
            assert!(format!("{err:#}").contains(key), "{key}={value}: {err:#}");
        }

        let padded = AppConfig::from_lookup(lookup(&[("EXPIRY_MEDIUM_DAYS", " 120 ")])).unwrap();
        assert_eq!(padded.thresholds.medium_days(), 120);
    }

    #[tokio::test]
    async fn ingest_run_isolates_table_failures() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("available_inventory_report.csv"),
            "Trial Name,Lot,Expiry Date,Received Packages\nT1,L1,2026-02-01,10\nT1,L2,2026-03-01,4\n",
        )
        .unwrap();
        fs::write(dir.path().join("rim.csv"), "foo,bar\n1,2\n").unwrap();
        fs::write(dir.path().join("qdocs.csv"), "document_id,document_type\nNA,N/A\n").unwrap();
        fs::write(dir.path().join("random_notes.csv"), "x\n1\n").unwrap();

        let registry = SchemaRegistry::builtin();
        let store = memory_store_from_registry(&registry);
        store
            .seed_rows(
                "rim",
                vec![BTreeMap::from([(
                    "name_v".to_string(),
                    SqlValue::Text(Some("keep me".into())),
                )])],
            )
            .await
            .unwrap();
        let pipeline = IngestPipeline::new(Box::new(store), FileMatcher::builtin(), 1000);

        let summary = pipeline.run(dir.path()).await.unwrap();
        assert_eq!(summary.files_found, 4);
        assert_eq!(summary.succeeded(), 1);
        assert_eq!(summary.skipped(), 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.unmatched_files.len(), 1);

        let inventory = summary
            .tables
            .iter()
            .find(|t| t.table == "available_inventory_report")
            .unwrap();
        assert_eq!(inventory.rows_loaded, 2);

        let rim = summary.tables.iter().find(|t| t.table == "rim").unwrap();
        match &rim.status {
            TableStatus::Failed { error } => assert!(error.contains("zero matching columns")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ingest_run_on_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = IngestPipeline::new(
            Box::new(memory_store_from_registry(&SchemaRegistry::builtin())),
            FileMatcher::builtin(),
            1000,
        );
        let summary = pipeline.run(&dir.path().join("absent")).await.unwrap();
        assert_eq!(summary.files_found, 0);
        assert!(summary.tables.is_empty());
    }

    #[test]
    fn table_outcome_serializes_status_inline() {
        let outcome = TableOutcome::new(
            &PlannedLoad {
                table: "rim".into(),
                path: PathBuf::from("rim.csv"),
            },
            TableStatus::Skipped {
                reason: "no data after cleaning".into(),
            },
        );
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "skipped");
        assert_eq!(value["reason"], "no data after cleaning");
    }

    #[test]
    fn shortfall_needs_half_of_lots_expiring() {
        let risks = shortfall_risks(&[group(4, 2), group(5, 2), group(1, 1), group(0, 0)]);
        assert_eq!(risks.len(), 2);
        assert!(risks.iter().all(|r| r.risk_level == RiskTier::High));
        assert_eq!(risks[0].total_batches, 4);
    }

    #[test]
    fn overall_severity_follows_worst_finding() {
        let t = ThresholdConfig::default();
        let crit = classify_expiring_lots(&[lot(10), lot(70)], &t);
        assert_eq!(overall_severity(&crit, &[]), RiskTier::Critical);

        let medium = classify_expiring_lots(&[lot(75)], &t);
        assert_eq!(overall_severity(&medium, &[]), RiskTier::Medium);
        assert_eq!(overall_severity(&medium, &shortfall_risks(&[group(2, 2)])), RiskTier::High);
        assert_eq!(overall_severity(&[], &[]), RiskTier::Low);
    }

    #[test]
    fn monitoring_alert_caps_items_and_records_counts() {
        let t = ThresholdConfig::default();
        let lots: Vec<_> = (1..=15).map(|d| lot(d * 5)).collect();
        let expiry = classify_expiring_lots(&lots, &t);
        let alert = monitoring_alert(&expiry, &[]).unwrap();

        assert_eq!(alert.alert_type, MONITORING_ALERT_TYPE);
        assert_eq!(alert.severity, RiskTier::Critical);
        assert_eq!(alert.affected_items_count, ALERT_TOP_ITEMS);
        assert_eq!(alert.metadata["expiry_risk_count"], json!(15));
        assert_eq!(alert.metadata["shortfall_risk_count"], json!(0));
        assert_eq!(alert.metadata["severity_breakdown"]["CRITICAL"], json!(6));
        assert_eq!(alert.metadata["severity_breakdown"]["HIGH"], json!(6));
        assert_eq!(alert.metadata["severity_breakdown"]["MEDIUM"], json!(3));
        assert_eq!(alert.metadata["severity_breakdown"]["LOW"], json!(0));
        assert_eq!(alert.affected_items[0]["risk_level"], json!("CRITICAL"));
    }

    #[tokio::test]
    async fn two_runs_write_two_distinct_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlertStore::new(dir.path());
        let watchdog = Watchdog::new(
            Box::new(FixtureRisks {
                lots: vec![lot(45), lot(120)],
                groups: vec![group(3, 1)],
            }),
            store.clone(),
            ThresholdConfig::default(),
        );

        let first = watchdog.run_once().await.unwrap();
        let second = watchdog.run_once().await.unwrap();
        assert_ne!(first.alert_id, second.alert_id);
        assert_ne!(first.alert_file, second.alert_file);
        assert_eq!(first.severity, RiskTier::High);
        assert_eq!(second.severity, first.severity);
        assert_eq!(first.expiry_risk_count, 1);
        assert_eq!(first.shortfall_risk_count, 0);

        let listed = store.list_latest(10).await.unwrap();
        assert_eq!(listed.len(), 2);
    }
}
