//! Axum JSON API and Askama dashboard for the control tower.

use std::sync::Arc;

use anyhow::Context;
use askama::Template;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use cst_core::{classify_expiry, classify_shortfall, RiskTier};
use cst_storage::{connect_pool, AlertEntry, AlertStore};
use cst_sync::{run_monitoring, AppConfig};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use sqlx::{PgPool, Row};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub mod chat;

pub const CRATE_NAME: &str = "cst-web";

const DEFAULT_ALERT_LIMIT: usize = 10;
const MAX_ALERT_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub alerts: AlertStore,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let alerts = AlertStore::new(config.alerts_dir.clone());
        Self { config, alerts }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ExpiringQuery {
    days: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifyQuery {
    days: Option<i64>,
    weeks: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    message: String,
    conversation_id: Option<String>,
}

struct AlertRow {
    file_name: String,
    timestamp: String,
    severity: String,
    alert_type: String,
    affected_items_count: usize,
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    generated_at: String,
    critical_days: i64,
    high_days: i64,
    medium_days: i64,
    shortfall_horizon_weeks: u32,
    latest_severity: String,
    alerts: Vec<AlertRow>,
    unreadable_alerts: usize,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/dashboard", get(dashboard_page_handler))
        .route("/api/health", get(health_handler))
        .route("/api/dashboard", get(dashboard_data_handler))
        .route("/api/inventory/expiring", get(expiring_inventory_handler))
        .route("/api/inventory/by-trial/{trial}", get(inventory_by_trial_handler))
        .route("/api/enrollment/summary", get(enrollment_summary_handler))
        .route("/api/monitoring/run", post(monitoring_run_handler))
        .route("/api/alerts/latest", get(latest_alerts_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/trials", get(trials_handler))
        .route("/api/countries", get(countries_handler))
        .route("/api/analytics/risk-heatmap", get(risk_heatmap_handler))
        .route("/api/risk/classify", get(risk_classify_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let port = config.web_port;
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "serving control tower API");
    axum::serve(listener, app(AppState::new(config))).await?;
    Ok(())
}

async fn index_handler() -> Response {
    Json(json!({
        "name": "Clinical Supply Chain Control Tower API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "endpoints": {
            "dashboard": "/api/dashboard",
            "monitoring": "/api/monitoring/run",
            "chat": "/api/chat",
            "inventory": "/api/inventory/expiring",
            "alerts": "/api/alerts/latest",
            "risk": "/api/risk/classify",
            "html": "/dashboard"
        }
    }))
    .into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let database = match db(&state).await {
        Ok(pool) => match sqlx::query("SELECT 1").execute(&pool).await {
            Ok(_) => "healthy",
            Err(err) => {
                warn!(error = %err, "health check query failed");
                "unhealthy"
            }
        },
        Err(err) => {
            warn!(error = %format!("{err:#}"), "health check could not connect");
            "unhealthy"
        }
    };
    Json(json!({
        "status": "operational",
        "timestamp": Utc::now().to_rfc3339(),
        "database": database,
    }))
    .into_response()
}

async fn dashboard_data_handler(State(state): State<Arc<AppState>>) -> Response {
    match load_dashboard_summary(&state).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => server_error(err),
    }
}

async fn expiring_inventory_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExpiringQuery>,
) -> Response {
    let days = query.days.unwrap_or(state.config.thresholds.medium_days());
    let days = match i32::try_from(days) {
        Ok(days) if days >= 0 => days,
        _ => return bad_request("days must be between 0 and 2147483647"),
    };
    let result = async {
        let pool = db(&state).await?;
        let mut items = json_rows(
            sqlx::query(&json_rows_sql(
                r#"
                SELECT trial_name, location, lot, package_type_description,
                       expiry_date::date AS expiry_date, received_packages,
                       (expiry_date::date - CURRENT_DATE) AS days_until_expiry
                  FROM available_inventory_report
                 WHERE expiry_date::date > CURRENT_DATE
                   AND expiry_date::date <= CURRENT_DATE + $1::int4
                 ORDER BY expiry_date ASC
                "#,
            ))
            .bind(days),
            &pool,
        )
        .await?;
        for item in &mut items {
            if let Some(d) = item.get("days_until_expiry").and_then(JsonValue::as_i64) {
                item["risk_level"] = json!(classify_expiry(d, &state.config.thresholds));
            }
        }
        anyhow::Ok(items)
    }
    .await;
    match result {
        Ok(items) => Json(json!({ "count": items.len(), "items": items })).into_response(),
        Err(err) => server_error(err),
    }
}

async fn inventory_by_trial_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(trial): AxumPath<String>,
) -> Response {
    let result = async {
        let pool = db(&state).await?;
        let rows = json_rows(
            sqlx::query(&json_rows_sql(
                r#"
                SELECT trial_name, location, lot, package_type_description,
                       expiry_date::date AS expiry_date, packages_awaiting, received_packages,
                       packages_pending_shipment, shipped_packages, min_qty, max_qty
                  FROM available_inventory_report
                 WHERE trial_name ILIKE $1
                 ORDER BY expiry_date ASC
                "#,
            ))
            .bind(format!("%{trial}%")),
            &pool,
        )
        .await?;
        anyhow::Ok(rows)
    }
    .await;
    match result {
        Ok(rows) => Json(json!({ "trial": trial, "count": rows.len(), "inventory": rows })).into_response(),
        Err(err) => server_error(err),
    }
}

async fn enrollment_summary_handler(State(state): State<Arc<AppState>>) -> Response {
    let result = async {
        let pool = db(&state).await?;
        let rows = json_rows(
            sqlx::query(&json_rows_sql(
                r#"
                SELECT trial_alias, country_name, enrollment_level,
                       total_enrolled_forecast, total_enrolled_planned, total_enrolled_actual,
                       enrollment_rate_monthly_actual,
                       CASE
                           WHEN total_enrolled_actual > total_enrolled_planned * 1.1 THEN 'ACCELERATED'
                           WHEN total_enrolled_actual < total_enrolled_planned * 0.9 THEN 'SLOWER'
                           ELSE 'ON_TRACK'
                       END AS enrollment_status
                  FROM country_level_enrollment_report
                 ORDER BY trial_alias, country_name
                "#,
            )),
            &pool,
        )
        .await?;
        anyhow::Ok(rows)
    }
    .await;
    match result {
        Ok(rows) => Json(json!({ "count": rows.len(), "enrollments": rows })).into_response(),
        Err(err) => server_error(err),
    }
}

async fn monitoring_run_handler(State(state): State<Arc<AppState>>) -> Response {
    let config = state.config.clone();
    tokio::spawn(async move {
        match run_monitoring(&config).await {
            Ok(summary) => info!(alert_id = %summary.alert_id, severity = %summary.severity, "monitoring run finished"),
            Err(err) => error!(error = %format!("{err:#}"), "monitoring run failed"),
        }
    });
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "started",
            "message": "Supply watchdog monitoring initiated",
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

async fn latest_alerts_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AlertsQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_ALERT_LIMIT).min(MAX_ALERT_LIMIT);
    match state.alerts.list_latest(limit).await {
        Ok(entries) => {
            let mut alerts = Vec::new();
            let mut unreadable = Vec::new();
            for entry in entries {
                match entry {
                    AlertEntry::Parsed { alert, .. } => alerts.push(alert),
                    AlertEntry::Malformed { file_name, .. } => unreadable.push(file_name),
                }
            }
            Json(json!({ "count": alerts.len(), "alerts": alerts, "unreadable": unreadable }))
                .into_response()
        }
        Err(err) => server_error(err),
    }
}

async fn chat_handler(State(state): State<Arc<AppState>>, Json(message): Json<ChatMessage>) -> Response {
    let parsed = chat::parse_question(&message.message);
    let reply = match chat::immediate_reply(&parsed) {
        Some(reply) => Ok(reply),
        None => async {
            let data = chat::PgChatData::new(db(&state).await?);
            let reply = chat::answer(&parsed, &data).await?;
            anyhow::Ok(reply)
        }
        .await,
    };
    match reply {
        Ok(response) => Json(json!({
            "response": response,
            "intent": parsed.intent.name(),
            "confidence": parsed.confidence,
            "conversation_id": message.conversation_id.unwrap_or_else(|| "default".to_string()),
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Err(err) => server_error(err),
    }
}

async fn trials_handler(State(state): State<Arc<AppState>>) -> Response {
    let result = async {
        let pool = db(&state).await?;
        let rows = json_rows(
            sqlx::query(&json_rows_sql(
                r#"
                SELECT trial_name, COUNT(*) AS batch_count
                  FROM available_inventory_report
                 WHERE trial_name IS NOT NULL
                 GROUP BY trial_name
                 ORDER BY trial_name
                "#,
            )),
            &pool,
        )
        .await?;
        anyhow::Ok(rows)
    }
    .await;
    match result {
        Ok(rows) => Json(json!({ "count": rows.len(), "trials": rows })).into_response(),
        Err(err) => server_error(err),
    }
}

async fn countries_handler(State(state): State<Arc<AppState>>) -> Response {
    let result = async {
        let pool = db(&state).await?;
        let rows = json_rows(
            sqlx::query(&json_rows_sql(
                r#"
                SELECT country_name, COUNT(*) AS trial_count
                  FROM country_level_enrollment_report
                 GROUP BY country_name
                 ORDER BY country_name
                "#,
            )),
            &pool,
        )
        .await?;
        anyhow::Ok(rows)
    }
    .await;
    match result {
        Ok(rows) => Json(json!({ "count": rows.len(), "countries": rows })).into_response(),
        Err(err) => server_error(err),
    }
}

async fn risk_heatmap_handler(State(state): State<Arc<AppState>>) -> Response {
    let t = state.config.thresholds;
    let result = async {
        let window = |days: i64| i32::try_from(days).context("threshold out of range");
        let (critical, high, medium) = (
            window(t.critical_days())?,
            window(t.high_days())?,
            window(t.medium_days())?,
        );
        let pool = db(&state).await?;
        let rows = json_rows(
            sqlx::query(&json_rows_sql(
                r#"
                SELECT trial_name, location AS country, COUNT(*) AS total_batches,
                       COUNT(*) FILTER (WHERE expiry_date::date - CURRENT_DATE <= $1) AS critical_count,
                       COUNT(*) FILTER (WHERE expiry_date::date - CURRENT_DATE > $1
                                          AND expiry_date::date - CURRENT_DATE <= $2) AS high_count,
                       COUNT(*) FILTER (WHERE expiry_date::date - CURRENT_DATE > $2
                                          AND expiry_date::date - CURRENT_DATE <= $3) AS medium_count
                  FROM available_inventory_report
                 WHERE expiry_date::date > CURRENT_DATE
                 GROUP BY trial_name, location
                 ORDER BY critical_count DESC, high_count DESC
                "#,
            ))
            .bind(critical)
            .bind(high)
            .bind(medium),
            &pool,
        )
        .await?;
        anyhow::Ok(rows)
    }
    .await;
    match result {
        Ok(rows) => Json(json!({ "heatmap_data": rows })).into_response(),
        Err(err) => server_error(err),
    }
}

async fn risk_classify_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClassifyQuery>,
) -> Response {
    if query.days.is_none() && query.weeks.is_none() {
        return bad_request("provide days and/or weeks");
    }
    let t = &state.config.thresholds;
    let mut body = serde_json::Map::new();
    if let Some(days) = query.days {
        body.insert(
            "expiry".to_string(),
            json!({ "days_until_expiry": days, "tier": classify_expiry(days, t) }),
        );
    }
    if let Some(weeks) = query.weeks {
        body.insert(
            "shortfall".to_string(),
            json!({ "weeks_remaining": weeks, "tier": classify_shortfall(weeks, t) }),
        );
    }
    Json(JsonValue::Object(body)).into_response()
}

async fn dashboard_page_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.alerts.list_latest(DEFAULT_ALERT_LIMIT).await {
        Ok(entries) => {
            let unreadable_alerts = entries.iter().filter(|e| e.alert().is_none()).count();
            let alerts: Vec<AlertRow> = entries
                .iter()
                .filter_map(|entry| {
                    entry.alert().map(|alert| AlertRow {
                        file_name: entry.file_name().to_string(),
                        timestamp: alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                        severity: alert.severity.to_string(),
                        alert_type: alert.alert_type.clone(),
                        affected_items_count: alert.affected_items_count,
                    })
                })
                .collect();
            let t = &state.config.thresholds;
            render_html(DashboardTemplate {
                generated_at: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                critical_days: t.critical_days(),
                high_days: t.high_days(),
                medium_days: t.medium_days(),
                shortfall_horizon_weeks: t.shortfall_horizon_weeks(),
                latest_severity: alerts
                    .first()
                    .map(|a| a.severity.clone())
                    .unwrap_or_else(|| "n/a".into()),
                alerts,
                unreadable_alerts,
            })
        }
        Err(err) => server_error(err),
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    error!(error = %format!("{err:#}"), "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "status": "error", "detail": "internal server error" })),
    )
        .into_response()
}

fn bad_request(detail: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "status": "error", "detail": detail })),
    )
        .into_response()
}

async fn db(state: &AppState) -> anyhow::Result<PgPool> {
    connect_pool(&state.config.database_url)
        .await
        .context("connecting to the database")
}

/// Wrap a row query so PostgreSQL returns the whole result as one JSON array.
fn json_rows_sql(inner: &str) -> String {
    format!("SELECT COALESCE(json_agg(t), '[]'::json) AS rows FROM ({inner}) t")
}

async fn json_rows<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    pool: &PgPool,
) -> anyhow::Result<Vec<JsonValue>> {
    let row = query.fetch_one(pool).await.context("running report query")?;
    let value: JsonValue = row.try_get("rows")?;
    match value {
        JsonValue::Array(items) => Ok(items),
        other => anyhow::bail!("expected JSON array, got {other}"),
    }
}

async fn json_object(sql: &str, pool: &PgPool) -> anyhow::Result<JsonValue> {
    let wrapped = format!("SELECT row_to_json(t) AS row FROM ({sql}) t");
    let row = sqlx::query(&wrapped)
        .fetch_one(pool)
        .await
        .context("running summary query")?;
    Ok(row.try_get("row")?)
}

async fn load_dashboard_summary(state: &AppState) -> anyhow::Result<JsonValue> {
    let pool = db(state).await?;
    let t = &state.config.thresholds;
    let inventory = json_object(
        &format!(
            "SELECT COUNT(DISTINCT lot) AS total_batches,
                    COUNT(DISTINCT trial_name) AS total_trials,
                    COALESCE(SUM(received_packages), 0) AS total_packages,
                    COUNT(*) FILTER (WHERE expiry_date::date > CURRENT_DATE
                                       AND expiry_date::date <= CURRENT_DATE + {}) AS expiring_soon
               FROM available_inventory_report",
            t.medium_days()
        ),
        &pool,
    )
    .await?;
    let enrollment = json_object(
        "SELECT COUNT(DISTINCT trial_alias) AS active_trials,
                COUNT(DISTINCT country_name) AS countries,
                COALESCE(SUM(total_enrolled_actual), 0) AS total_patients
           FROM country_level_enrollment_report",
        &pool,
    )
    .await?;
    let risks = json_object(
        &format!(
            "SELECT COUNT(*) FILTER (WHERE d <= {c}) AS critical_expiry,
                    COUNT(*) FILTER (WHERE d > {c} AND d <= {h}) AS high_expiry,
                    COUNT(*) FILTER (WHERE d > {h} AND d <= {m}) AS medium_expiry
               FROM (SELECT expiry_date::date - CURRENT_DATE AS d
                       FROM available_inventory_report
                      WHERE expiry_date::date > CURRENT_DATE) lots",
            c = t.critical_days(),
            h = t.high_days(),
            m = t.medium_days()
        ),
        &pool,
    )
    .await?;
    let recent_orders = json_rows(
        sqlx::query(&json_rows_sql(
            "SELECT trial_alias, order_number, status, order_date, requested_delivery_date,
                    actual_delivery_date
               FROM distribution_order_report
              ORDER BY order_date DESC NULLS LAST
              LIMIT 10",
        )),
        &pool,
    )
    .await?;
    let latest_alert = state
        .alerts
        .list_latest(1)
        .await?
        .into_iter()
        .find_map(|entry| entry.alert().map(|a| json!({ "alert_id": a.alert_id, "severity": a.severity, "timestamp": a.timestamp })));

    Ok(json!({
        "inventory": inventory,
        "enrollment": enrollment,
        "risks": risks,
        "recent_orders": recent_orders,
        "latest_alert": latest_alert,
        "severity_levels": RiskTier::ALL,
        "last_updated": Utc::now().to_rfc3339(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use cst_core::build_alert;
    use http_body_util::BodyExt;
    use std::collections::BTreeMap;
    use tower::ServiceExt;

    fn test_state(alerts_dir: &std::path::Path) -> AppState {
        let mut config = AppConfig::from_lookup(|_| None).unwrap();
        config.alerts_dir = alerts_dir.to_path_buf();
        // Nothing listens here, so database-backed routes fail fast.
        config.database_url = "postgres://postgres@127.0.0.1:1/none".to_string();
        AppState::new(config)
    }

    async fn body_json(resp: Response) -> JsonValue {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn handler_smoke_get_index() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(test_state(dir.path())).oneshot(get_req("/")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "operational");
    }

    #[tokio::test]
    async fn handler_smoke_latest_alerts_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlertStore::new(dir.path());
        let first = build_alert("daily_monitoring", RiskTier::Medium, &[], &BTreeMap::new());
        let mut second = build_alert("daily_monitoring", RiskTier::Critical, &[], &BTreeMap::new());
        second.timestamp = first.timestamp + chrono::Duration::seconds(5);
        store.persist(&first).await.unwrap();
        store.persist(&second).await.unwrap();
        std::fs::write(dir.path().join("alert_20000101_000000_000000_00000000.json"), "oops").unwrap();

        let resp = app(test_state(dir.path()))
            .oneshot(get_req("/api/alerts/latest?limit=5"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["alerts"][0]["severity"], "CRITICAL");
        assert_eq!(body["alerts"][1]["severity"], "MEDIUM");
        assert_eq!(body["unreadable"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn handler_smoke_risk_classify() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(test_state(dir.path()));
        let resp = app
            .clone()
            .oneshot(get_req("/api/risk/classify?days=31&weeks=3.5"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["expiry"]["tier"], "HIGH");
        assert_eq!(body["shortfall"]["tier"], "HIGH");

        let missing = app.oneshot(get_req("/api/risk/classify")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn handler_smoke_expiring_rejects_out_of_range_days() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(test_state(dir.path()));
        for uri in [
            "/api/inventory/expiring?days=4294967386",
            "/api/inventory/expiring?days=-1",
        ] {
            let resp = app.clone().oneshot(get_req(uri)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
            let body = body_json(resp).await;
            assert_eq!(body["status"], "error");
        }
    }

    #[tokio::test]
    async fn handler_smoke_chat_help_needs_no_database() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(test_state(dir.path()))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chat")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"message":"hello"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["intent"], "help");
        assert_eq!(body["conversation_id"], "default");
        assert!(body["response"].as_str().unwrap().contains("I can help with"));
    }

    #[tokio::test]
    async fn handler_smoke_database_failure_is_generic() {
        let dir = tempfile::tempdir().unwrap();
        let resp = app(test_state(dir.path()))
            .oneshot(get_req("/api/trials"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(resp).await;
        assert_eq!(body, json!({ "status": "error", "detail": "internal server error" }));
    }

    #[tokio::test]
    async fn handler_smoke_dashboard_page() {
        let dir = tempfile::tempdir().unwrap();
        let store = AlertStore::new(dir.path());
        store
            .persist(&build_alert("daily_monitoring", RiskTier::High, &[], &BTreeMap::new()))
            .await
            .unwrap();
        let resp = app(test_state(dir.path()))
            .oneshot(get_req("/dashboard"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("Clinical Supply Control Tower"));
        assert!(text.contains("HIGH"));
    }
}
