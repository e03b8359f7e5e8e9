//! Core domain model, risk classification and alert records for the control tower.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "cst-core";

/// Number of affected items rendered by [`format_alert_text`].
pub const MAX_RENDERED_ITEMS: usize = 50;

/// A single normalized cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i64),
    Date(NaiveDate),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Text form used when a value lands in a character column.
    pub fn render(&self) -> Option<String> {
        match self {
            CellValue::Null => None,
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Integer(n) => Some(n.to_string()),
            CellValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%d.%m.%Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Best-effort calendar date parse. Date-time inputs keep their date part.
pub fn parse_permissive_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.date_naive());
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Best-effort date-time parse; bare dates land at midnight.
pub fn parse_permissive_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_permissive_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// Storage type of a destination column, as reported by the live database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    SmallInt,
    /// 32-bit `INTEGER`.
    Integer,
    BigInt,
    /// `DECIMAL(10,2)`.
    Decimal,
    Float,
    Date,
    Timestamp,
    Time,
}

impl ColumnType {
    /// Map an `information_schema.columns.data_type` value onto a column type.
    /// Anything unrecognised is loaded as text.
    pub fn from_pg_data_type(data_type: &str) -> Self {
        match data_type.to_ascii_lowercase().as_str() {
            "smallint" => ColumnType::SmallInt,
            "integer" => ColumnType::Integer,
            "bigint" => ColumnType::BigInt,
            "numeric" | "decimal" => ColumnType::Decimal,
            "real" | "double precision" => ColumnType::Float,
            "date" => ColumnType::Date,
            "timestamp without time zone" | "timestamp with time zone" | "timestamp" => {
                ColumnType::Timestamp
            }
            "time without time zone" | "time with time zone" | "time" => ColumnType::Time,
            _ => ColumnType::Text,
        }
    }

    /// Inclusive range an integer column can hold.
    pub fn integer_bounds(&self) -> Option<(i64, i64)> {
        match self {
            ColumnType::SmallInt => Some((i16::MIN.into(), i16::MAX.into())),
            ColumnType::Integer => Some((i32::MIN.into(), i32::MAX.into())),
            ColumnType::BigInt => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::SmallInt => "SMALLINT",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Decimal => "DECIMAL(10,2)",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Time => "TIME",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveColumn {
    pub name: String,
    pub column_type: ColumnType,
}

impl LiveColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Rows that survived column intersection, ready for a snapshot load.
/// Every row has exactly `columns.len()` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledRows {
    pub table: String,
    pub columns: Vec<LiveColumn>,
    pub rows: Vec<Vec<CellValue>>,
}

impl ReconciledRows {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Coarse severity bucket. Ordering follows severity: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub const ALL: [RiskTier; 4] = [
        RiskTier::Critical,
        RiskTier::High,
        RiskTier::Medium,
        RiskTier::Low,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Critical => "CRITICAL",
            RiskTier::High => "HIGH",
            RiskTier::Medium => "MEDIUM",
            RiskTier::Low => "LOW",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThresholdError {
    #[error("expiry thresholds must be ascending: critical={critical} high={high} medium={medium}")]
    NotAscending { critical: i64, high: i64, medium: i64 },
    #[error("expiry threshold {0} days does not fit a 32-bit day count")]
    OutOfRange(i64),
    #[error("shortfall horizon must be positive, got {0} weeks")]
    NonPositiveHorizon(u32),
}

/// Risk boundaries, read once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    critical_days: i64,
    high_days: i64,
    medium_days: i64,
    shortfall_horizon_weeks: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            critical_days: 30,
            high_days: 60,
            medium_days: 90,
            shortfall_horizon_weeks: 8,
        }
    }
}

impl ThresholdConfig {
    pub fn new(
        critical_days: i64,
        high_days: i64,
        medium_days: i64,
        shortfall_horizon_weeks: u32,
    ) -> Result<Self, ThresholdError> {
        if !(critical_days < high_days && high_days < medium_days) {
            return Err(ThresholdError::NotAscending {
                critical: critical_days,
                high: high_days,
                medium: medium_days,
            });
        }
        if let Some(&days) = [critical_days, medium_days]
            .iter()
            .find(|d| i32::try_from(**d).is_err())
        {
            return Err(ThresholdError::OutOfRange(days));
        }
        if shortfall_horizon_weeks == 0 {
            return Err(ThresholdError::NonPositiveHorizon(shortfall_horizon_weeks));
        }
        Ok(Self {
            critical_days,
            high_days,
            medium_days,
            shortfall_horizon_weeks,
        })
    }

    pub fn critical_days(&self) -> i64 {
        self.critical_days
    }

    pub fn high_days(&self) -> i64 {
        self.high_days
    }

    pub fn medium_days(&self) -> i64 {
        self.medium_days
    }

    pub fn shortfall_horizon_weeks(&self) -> u32 {
        self.shortfall_horizon_weeks
    }
}

/// Tier for a lot expiring in `days_until_expiry` days. Boundaries are inclusive
/// on the more severe side.
pub fn classify_expiry(days_until_expiry: i64, thresholds: &ThresholdConfig) -> RiskTier {
    if days_until_expiry <= thresholds.critical_days {
        RiskTier::Critical
    } else if days_until_expiry <= thresholds.high_days {
        RiskTier::High
    } else if days_until_expiry <= thresholds.medium_days {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

/// Tier for `weeks_remaining` weeks of supply. The 2 and 4 week edges are fixed;
/// only the MEDIUM/LOW edge comes from configuration. NaN falls through to LOW.
pub fn classify_shortfall(weeks_remaining: f64, thresholds: &ThresholdConfig) -> RiskTier {
    if weeks_remaining < 2.0 {
        RiskTier::Critical
    } else if weeks_remaining < 4.0 {
        RiskTier::High
    } else if weeks_remaining < f64::from(thresholds.shortfall_horizon_weeks) {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

/// Immutable record of one monitoring run's findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub alert_type: String,
    pub severity: RiskTier,
    pub affected_items_count: usize,
    pub affected_items: Vec<serde_json::Value>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Build a fresh alert. Items and metadata are copied; the count is fixed here.
pub fn build_alert(
    alert_type: &str,
    severity: RiskTier,
    affected_items: &[serde_json::Value],
    metadata: &BTreeMap<String, serde_json::Value>,
) -> AlertRecord {
    AlertRecord {
        alert_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        alert_type: alert_type.to_string(),
        severity,
        affected_items_count: affected_items.len(),
        affected_items: affected_items.to_vec(),
        metadata: metadata.clone(),
    }
}

/// Render an alert as a plain-text notice. At most [`MAX_RENDERED_ITEMS`] items are listed.
pub fn format_alert_text(alert: &AlertRecord) -> String {
    let rule = "=".repeat(60);
    let mut lines = vec![
        rule.clone(),
        "CLINICAL SUPPLY CHAIN ALERT".to_string(),
        rule.clone(),
        format!("Alert ID: {}", alert.alert_id),
        format!("Timestamp: {}", alert.timestamp.to_rfc3339()),
        format!("Severity: {}", alert.severity),
        format!("Alert Type: {}", alert.alert_type),
        String::new(),
        format!("Total Affected Items: {}", alert.affected_items_count),
        String::new(),
        rule.clone(),
        "DETAILS".to_string(),
        rule.clone(),
        String::new(),
    ];

    for (idx, item) in alert.affected_items.iter().take(MAX_RENDERED_ITEMS).enumerate() {
        let body = serde_json::to_string_pretty(item).unwrap_or_else(|_| item.to_string());
        lines.push(format!("{}. {}", idx + 1, body));
        lines.push(String::new());
    }

    if alert.affected_items_count > MAX_RENDERED_ITEMS {
        lines.push(format!(
            "... and {} more items",
            alert.affected_items_count - MAX_RENDERED_ITEMS
        ));
    }

    let metadata = serde_json::to_string_pretty(&alert.metadata).unwrap_or_else(|_| "{}".into());
    lines.extend([
        String::new(),
        rule.clone(),
        "METADATA".to_string(),
        rule,
        metadata,
    ]);

    lines.join("\n")
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_thresholds() -> impl Strategy<Value = ThresholdConfig> {
        (-100i64..100, 1i64..200, 1i64..200, 1u32..52).prop_map(|(c, dh, dm, w)| {
            ThresholdConfig::new(c, c + dh, c + dh + dm, w).unwrap()
        })
    }

    proptest! {
        #[test]
        fn expiry_tier_matches_band(d in -1000i64..1000, t in arb_thresholds()) {
            let expected = if d <= t.critical_days() {
                RiskTier::Critical
            } else if d <= t.high_days() {
                RiskTier::High
            } else if d <= t.medium_days() {
                RiskTier::Medium
            } else {
                RiskTier::Low
            };
            prop_assert_eq!(classify_expiry(d, &t), expected);
        }

        #[test]
        fn expiry_severity_never_increases_with_more_days(d in -1000i64..1000, t in arb_thresholds()) {
            prop_assert!(classify_expiry(d, &t) >= classify_expiry(d + 1, &t));
        }

        #[test]
        fn classifiers_are_repeatable(d in -1000i64..1000, w in 0.0f64..60.0, t in arb_thresholds()) {
            let before = t;
            prop_assert_eq!(classify_expiry(d, &t), classify_expiry(d, &t));
            prop_assert_eq!(classify_shortfall(w, &t), classify_shortfall(w, &t));
            prop_assert_eq!(before, t);
        }

        #[test]
        fn shortfall_severity_never_increases_with_more_weeks(w in 0.0f64..60.0, t in arb_thresholds()) {
            prop_assert!(classify_shortfall(w, &t) >= classify_shortfall(w + 0.5, &t));
        }
    }
}
