//! Insight and Recommendation Models

use std::collections::BTreeMap;

use insight_cascade_core::{Dimension, Metric};
use serde::{Deserialize, Serialize};

use super::hypothesis::Hypothesis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightCategory {
    Creative,
    Audience,
    Platform,
    Geographic,
}

impl From<Dimension> for InsightCategory {
    fn from(dimension: Dimension) -> Self {
        match dimension {
            Dimension::CreativeType => InsightCategory::Creative,
            Dimension::AudienceType => InsightCategory::Audience,
            Dimension::Platform => InsightCategory::Platform,
            Dimension::Country => InsightCategory::Geographic,
        }
    }
}

/// A finding backed by one validated hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: String,
    pub hypothesis_id: String,
    pub title: String,
    pub description: String,
    pub dimension: Dimension,
    pub metric: Metric,
    /// Group with the better metric value.
    pub winner: String,
    pub loser: String,
    /// Relative advantage of the winner over the loser on the metric.
    pub relative_lift: Option<f64>,
    /// Business impact on a 0-10 scale.
    pub impact_score: f64,
    pub confidence: f64,
    pub urgency: Urgency,
    pub category: InsightCategory,
    pub estimated_revenue_impact: f64,
    pub affected_campaigns: Vec<String>,
    pub time_period: String,
    /// The validated hypothesis, including its test result.
    pub hypothesis: Hypothesis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    ScaleCreative,
    OptimizeExisting,
    PauseCreative,
    NewCreative,
}

impl std::fmt::Display for RecommendationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecommendationType::ScaleCreative => write!(f, "scale_creative"),
            RecommendationType::OptimizeExisting => write!(f, "optimize_existing"),
            RecommendationType::PauseCreative => write!(f, "pause_creative"),
            RecommendationType::NewCreative => write!(f, "new_creative"),
        }
    }
}

/// An action derived from one or more insights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: String,
    pub recommendation_type: RecommendationType,
    pub dimension: Dimension,
    /// Segment the action applies to.
    pub target_segment: String,
    pub title: String,
    pub action: String,
    pub rationale: String,
    /// Metric name to expected relative improvement.
    pub expected_improvement: BTreeMap<String, f64>,
    pub implementation_steps: Vec<String>,
    pub impact: f64,
    pub confidence: f64,
    /// `impact * confidence`.
    pub priority_score: f64,
    pub insight_ids: Vec<String>,
}
