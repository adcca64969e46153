//! Shared Test Fixtures
//!
//! A small two-creative campaign set. Image ads return about 3x spend and
//! Video ads about 1.5x; every platform and country receives an identical
//! copy of each row, so comparisons on those dimensions find no difference.

use insight_cascade::models::RawAdRow;
use insight_cascade::AnalysisConfig;
use serde_json::json;

pub const QUERY: &str = "Which creative formats drive the best ROAS?";

#[allow(clippy::too_many_arguments)]
pub fn raw_row(
    campaign: &str,
    date: &str,
    spend: f64,
    clicks: u64,
    revenue: f64,
    creative: &str,
    platform: &str,
    country: &str,
) -> RawAdRow {
    RawAdRow {
        campaign_name: campaign.to_string(),
        adset_name: format!("{}-{}", platform, country),
        date: date.to_string(),
        spend: spend.to_string(),
        impressions: "1000".to_string(),
        clicks: clicks.to_string(),
        purchases: "5".to_string(),
        revenue: revenue.to_string(),
        creative_type: creative.to_string(),
        audience_type: "broad".to_string(),
        platform: platform.to_string(),
        country: country.to_string(),
    }
}

/// 80 rows: 40 per creative, 40 per platform, 40 per country.
pub fn campaign_rows() -> Vec<RawAdRow> {
    let mut rows = Vec::new();
    for (creative, base_roas) in [("Image", 3.0), ("Video", 1.5)] {
        for j in 0..10u64 {
            let wobble = (j % 5) as f64 - 2.0;
            let revenue = 100.0 * base_roas + 10.0 * wobble;
            let clicks = 40 + 5 * (j % 5);
            let date = format!("2024-03-{:02}", j + 1);
            for country in ["US", "UK"] {
                for platform in ["facebook", "instagram"] {
                    rows.push(raw_row(
                        &format!("{} Campaign", creative),
                        &date,
                        100.0,
                        clicks,
                        revenue,
                        creative,
                        platform,
                        country,
                    ));
                }
            }
        }
    }
    rows
}

/// Deterministic config: no guidance or narration calls, no backoff waits.
pub fn offline_config() -> AnalysisConfig {
    AnalysisConfig {
        guided_replanning: false,
        narrate_recommendations: false,
        llm_initial_backoff_ms: 1,
        ..AnalysisConfig::default()
    }
}

pub fn hypothesis(dimension: &str, metric: &str, group_a: &str, group_b: &str) -> serde_json::Value {
    json!({
        "statement": format!("{} {} differs between {} and {}", dimension, metric, group_a, group_b),
        "rationale": "observed in the summary",
        "dimension": dimension,
        "metric": metric,
        "group_a": group_a,
        "group_b": group_b,
        "expected_direction": "increase"
    })
}

pub fn batch(hypotheses: Vec<serde_json::Value>) -> String {
    json!({ "hypotheses": hypotheses, "reasoning": "scripted" }).to_string()
}

/// Image vs Video on ROAS, which validates.
pub fn creative_hypothesis() -> serde_json::Value {
    hypothesis("creative_type", "roas", "Image", "Video")
}

/// Four comparisons on dimensions with no real difference.
pub fn rejected_round() -> String {
    batch(vec![
        hypothesis("platform", "roas", "facebook", "instagram"),
        hypothesis("country", "roas", "US", "UK"),
        hypothesis("platform", "ctr", "facebook", "instagram"),
        hypothesis("country", "ctr", "US", "UK"),
    ])
}
