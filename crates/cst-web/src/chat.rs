//! Keyword-driven question answering over the inventory tables.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use sqlx::PgPool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    ExtensionFeasibility { lot: Option<String> },
    InventorySummary { trial: Option<String> },
    ShippingTimeline { country: Option<String> },
    Help,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Intent::ExtensionFeasibility { .. } => "extension_feasibility",
            Intent::InventorySummary { .. } => "inventory_summary",
            Intent::ShippingTimeline { .. } => "shipping_timeline",
            Intent::Help => "help",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedQuestion {
    #[serde(flatten)]
    pub intent: Intent,
    pub confidence: Confidence,
}

const EXTENSION_KEYWORDS: &[&str] = &["extend", "extension"];
const INVENTORY_KEYWORDS: &[&str] = &["inventory", "stock"];
const SHIPPING_KEYWORDS: &[&str] = &["shipping", "timeline"];

pub const HELP_TEXT: &str = "I can help with:\n\
  - Extension feasibility: \"Can we extend batch LOT-12345678?\"\n\
  - Inventory summary: \"Show inventory for Study ABC\"\n\
  - Shipping timelines: \"Shipping timeline to Germany\"\n\
Please ask a specific question.";

fn clean_word(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric() && c != '-')
}

/// A `LOT-` token, else the first long alphanumeric token carrying a digit.
fn find_lot(words: &[&str]) -> Option<String> {
    words
        .iter()
        .find(|w| w.to_lowercase().contains("lot-"))
        .or_else(|| {
            words.iter().find(|w| {
                w.len() > 8
                    && w.chars().any(|c| c.is_ascii_digit())
                    && w.replace('-', "").chars().all(char::is_alphanumeric)
            })
        })
        .map(|w| w.to_string())
}

fn word_after(words: &[&str], markers: &[&str]) -> Option<String> {
    words
        .windows(2)
        .find(|pair| markers.contains(&pair[0].to_lowercase().as_str()))
        .map(|pair| pair[1].to_string())
        .filter(|w| !w.is_empty())
}

/// Classify a question. When several intent families match, the first by priority
/// (extension, inventory, shipping) is kept with low confidence.
pub fn parse_question(question: &str) -> ParsedQuestion {
    let lower = question.to_lowercase();
    let hits = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(*k));
    let families = [
        hits(EXTENSION_KEYWORDS),
        hits(INVENTORY_KEYWORDS),
        hits(SHIPPING_KEYWORDS),
    ];
    let matched = families.iter().filter(|hit| **hit).count();
    let words: Vec<&str> = question.split_whitespace().map(clean_word).collect();

    let intent = if families[0] {
        Intent::ExtensionFeasibility {
            lot: find_lot(&words),
        }
    } else if families[1] {
        Intent::InventorySummary {
            trial: word_after(&words, &["for", "study", "trial"]),
        }
    } else if families[2] {
        Intent::ShippingTimeline {
            country: word_after(&words, &["to", "for"]),
        }
    } else {
        Intent::Help
    };

    ParsedQuestion {
        intent,
        confidence: if matched > 1 { Confidence::Low } else { Confidence::High },
    }
}

/// Reply that needs no data access: help, or a prompt for the missing argument.
pub fn immediate_reply(parsed: &ParsedQuestion) -> Option<String> {
    match &parsed.intent {
        Intent::Help => Some(HELP_TEXT.to_string()),
        Intent::ExtensionFeasibility { lot: None } => {
            Some("Please provide a batch/lot number (e.g., LOT-12345678).".to_string())
        }
        Intent::InventorySummary { trial: None } => Some("Please specify a trial name.".to_string()),
        Intent::ShippingTimeline { country: None } => {
            Some("Please specify a destination country.".to_string())
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LotInfo {
    pub trial_name: Option<String>,
    pub location: Option<String>,
    pub lot: Option<String>,
    pub package_type_description: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ReEvaluationInfo {
    pub re_eval_id: Option<String>,
    pub request_type: Option<String>,
    pub sample_status: Option<String>,
    pub created_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TrialLocationSummary {
    pub trial_name: Option<String>,
    pub location: Option<String>,
    pub batch_count: i64,
    pub earliest_expiry: Option<NaiveDate>,
    pub latest_expiry: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ShippingTimeline {
    pub country_name: Option<String>,
    pub ip_timeline: Option<String>,
    pub lead_time_days: Option<i32>,
}

#[async_trait]
pub trait ChatData: Send + Sync {
    async fn find_lot(&self, lot: &str) -> Result<Option<LotInfo>>;
    async fn latest_re_evaluation(&self, lot: &str) -> Result<Option<ReEvaluationInfo>>;
    async fn trial_inventory(&self, trial: &str) -> Result<Vec<TrialLocationSummary>>;
    async fn shipping_timelines(&self, country: &str) -> Result<Vec<ShippingTimeline>>;
}

pub struct PgChatData {
    pool: PgPool,
}

impl PgChatData {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn contains_pattern(term: &str) -> String {
    format!("%{term}%")
}

#[async_trait]
impl ChatData for PgChatData {
    async fn find_lot(&self, lot: &str) -> Result<Option<LotInfo>> {
        sqlx::query_as::<_, LotInfo>(
            r#"
            SELECT trial_name::text AS trial_name, location::text AS location, lot::text AS lot,
                   package_type_description, expiry_date::date AS expiry_date
              FROM available_inventory_report
             WHERE lot ILIKE $1
             LIMIT 1
            "#,
        )
        .bind(contains_pattern(lot))
        .fetch_optional(&self.pool)
        .await
        .context("looking up lot")
    }

    async fn latest_re_evaluation(&self, lot: &str) -> Result<Option<ReEvaluationInfo>> {
        sqlx::query_as::<_, ReEvaluationInfo>(
            r#"
            SELECT re_eval_id::text AS re_eval_id, request_type::text AS request_type,
                   sample_status::text AS sample_status, created_date::date AS created_date
              FROM re_evaluation
             WHERE lot_number ILIKE $1
             ORDER BY created_date DESC NULLS LAST
             LIMIT 1
            "#,
        )
        .bind(contains_pattern(lot))
        .fetch_optional(&self.pool)
        .await
        .context("looking up re-evaluation history")
    }

    async fn trial_inventory(&self, trial: &str) -> Result<Vec<TrialLocationSummary>> {
        sqlx::query_as::<_, TrialLocationSummary>(
            r#"
            SELECT trial_name::text AS trial_name, location::text AS location,
                   COUNT(*)::int8 AS batch_count,
                   MIN(expiry_date)::date AS earliest_expiry,
                   MAX(expiry_date)::date AS latest_expiry
              FROM available_inventory_report
             WHERE trial_name ILIKE $1
             GROUP BY trial_name, location
             ORDER BY earliest_expiry ASC NULLS LAST
            "#,
        )
        .bind(contains_pattern(trial))
        .fetch_all(&self.pool)
        .await
        .context("summarizing trial inventory")
    }

    async fn shipping_timelines(&self, country: &str) -> Result<Vec<ShippingTimeline>> {
        sqlx::query_as::<_, ShippingTimeline>(
            r#"
            SELECT country_name::text AS country_name, ip_timeline::text AS ip_timeline,
                   lead_time_days::int4 AS lead_time_days
              FROM ip_shipping_timelines_report
             WHERE country_name ILIKE $1
             LIMIT 5
            "#,
        )
        .bind(contains_pattern(country))
        .fetch_all(&self.pool)
        .await
        .context("looking up shipping timelines")
    }
}

fn or_na<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map_or_else(|| "n/a".to_string(), T::to_string)
}

/// Answer a question that carries its argument.
pub async fn answer(parsed: &ParsedQuestion, data: &dyn ChatData) -> Result<String> {
    if let Some(reply) = immediate_reply(parsed) {
        return Ok(reply);
    }
    match &parsed.intent {
        Intent::ExtensionFeasibility { lot: Some(lot) } => {
            let Some(info) = data.find_lot(lot).await? else {
                return Ok(format!("Batch {lot} not found in inventory."));
            };
            let history = data.latest_re_evaluation(lot).await?;
            let recommendation = match &history {
                Some(prev) => format!(
                    "Extension request can be submitted. Previous re-evaluation {} ({}) found.",
                    or_na(&prev.re_eval_id),
                    or_na(&prev.sample_status)
                ),
                None => "Extension request can be submitted. No previous extensions found.".to_string(),
            };
            Ok(format!(
                "EXTENSION FEASIBILITY: YES\n\nBatch Information:\n  - Trial: {}\n  - Location: {}\n  - Material: {}\n  - Current Expiry: {}\n\n{recommendation}\n\nNext Steps:\n  1. Submit extension request to regulatory affairs\n  2. Provide stability data to analytical lab\n  3. Expected approval timeline: 4-6 weeks",
                or_na(&info.trial_name),
                or_na(&info.location),
                or_na(&info.package_type_description),
                or_na(&info.expiry_date),
            ))
        }
        Intent::InventorySummary { trial: Some(trial) } => {
            let rows = data.trial_inventory(trial).await?;
            let Some(first) = rows.first() else {
                return Ok(format!("No inventory found for trial '{trial}'."));
            };
            let mut out = format!("INVENTORY SUMMARY FOR {}\n", or_na(&first.trial_name));
            for row in &rows {
                out.push_str(&format!(
                    "\nLocation: {}\n  - Batches: {}\n  - Earliest Expiry: {}\n  - Latest Expiry: {}\n",
                    or_na(&row.location),
                    row.batch_count,
                    or_na(&row.earliest_expiry),
                    or_na(&row.latest_expiry),
                ));
            }
            Ok(out)
        }
        Intent::ShippingTimeline { country: Some(country) } => {
            let rows = data.shipping_timelines(country).await?;
            let Some(first) = rows.first() else {
                return Ok(format!("No shipping data found for '{country}'."));
            };
            Ok(format!(
                "SHIPPING TIMELINE TO {}\n\nLead Time: {} days ({})",
                or_na(&first.country_name),
                or_na(&first.lead_time_days),
                or_na(&first.ip_timeline),
            ))
        }
        _ => Ok(HELP_TEXT.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FixtureData {
        lot: Option<LotInfo>,
        history: Option<ReEvaluationInfo>,
        trial: Vec<TrialLocationSummary>,
        shipping: Vec<ShippingTimeline>,
    }

    #[async_trait]
    impl ChatData for FixtureData {
        async fn find_lot(&self, _lot: &str) -> Result<Option<LotInfo>> {
            Ok(self.lot.clone())
        }
        async fn latest_re_evaluation(&self, _lot: &str) -> Result<Option<ReEvaluationInfo>> {
            Ok(self.history.clone())
        }
        async fn trial_inventory(&self, _trial: &str) -> Result<Vec<TrialLocationSummary>> {
            Ok(self.trial.clone())
        }
        async fn shipping_timelines(&self, _country: &str) -> Result<Vec<ShippingTimeline>> {
            Ok(self.shipping.clone())
        }
    }

    #[test]
    fn extension_question_extracts_lot() {
        let parsed = parse_question("Can we extend batch LOT-14364098?");
        assert_eq!(
            parsed.intent,
            Intent::ExtensionFeasibility {
                lot: Some("LOT-14364098".into())
            }
        );
        assert_eq!(parsed.confidence, Confidence::High);
    }

    #[test]
    fn inventory_and_shipping_extract_arguments() {
        assert_eq!(
            parse_question("Show inventory for CT-2004-PSX").intent,
            Intent::InventorySummary {
                trial: Some("CT-2004-PSX".into())
            }
        );
        assert_eq!(
            parse_question("Shipping timeline to Germany.").intent,
            Intent::ShippingTimeline {
                country: Some("Germany".into())
            }
        );
    }

    #[test]
    fn keyword_words_are_not_mistaken_for_lots() {
        assert_eq!(
            parse_question("Is an extension possible for 14364098A?").intent,
            Intent::ExtensionFeasibility {
                lot: Some("14364098A".into())
            }
        );
    }

    #[test]
    fn overlapping_keywords_lower_confidence() {
        let parsed = parse_question("extend stock shipping timeline for LOT-1");
        assert!(matches!(parsed.intent, Intent::ExtensionFeasibility { .. }));
        assert_eq!(parsed.confidence, Confidence::Low);
    }

    #[test]
    fn missing_arguments_prompt_instead_of_failing() {
        let parsed = parse_question("what stock do we have?");
        assert_eq!(parsed.intent, Intent::InventorySummary { trial: None });
        assert_eq!(
            immediate_reply(&parsed).as_deref(),
            Some("Please specify a trial name.")
        );
        assert_eq!(parse_question("hello there").intent, Intent::Help);
        assert_eq!(parse_question("").intent, Intent::Help);
    }

    #[tokio::test]
    async fn extension_answer_reports_history() {
        let data = FixtureData {
            lot: Some(LotInfo {
                trial_name: Some("CT-2004-PSX".into()),
                location: Some("Site 101".into()),
                lot: Some("LOT-14364098".into()),
                package_type_description: Some("Bottle 30ct".into()),
                expiry_date: NaiveDate::from_ymd_opt(2026, 11, 20),
            }),
            history: Some(ReEvaluationInfo {
                re_eval_id: Some("RE-77".into()),
                request_type: Some("Extension".into()),
                sample_status: Some("Complete".into()),
                created_date: None,
            }),
            ..FixtureData::default()
        };
        let reply = answer(&parse_question("extend LOT-14364098"), &data).await.unwrap();
        assert!(reply.starts_with("EXTENSION FEASIBILITY: YES"));
        assert!(reply.contains("Current Expiry: 2026-11-20"));
        assert!(reply.contains("RE-77"));

        let missing = answer(&parse_question("extend LOT-1"), &FixtureData::default()).await.unwrap();
        assert_eq!(missing, "Batch LOT-1 not found in inventory.");
    }

    #[tokio::test]
    async fn shipping_answer_uses_lead_time() {
        let data = FixtureData {
            shipping: vec![ShippingTimeline {
                country_name: Some("France".into()),
                ip_timeline: Some("6 days door-to-door".into()),
                lead_time_days: Some(6),
            }],
            ..FixtureData::default()
        };
        let reply = answer(&parse_question("shipping to France"), &data).await.unwrap();
        assert!(reply.contains("SHIPPING TIMELINE TO France"));
        assert!(reply.contains("Lead Time: 6 days"));
    }
}
