//! Data Summary Models
//!
//! Aggregates produced once per run by the data summarizer.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use insight_cascade_core::{Dimension, Metric};
use serde::{Deserialize, Serialize};

/// A ratio that may be undefined because its denominator is zero.
///
/// Serializes as a number or `null`; never carries infinity or NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum Ratio {
    Defined(f64),
    Undefined,
}

impl Ratio {
    /// `num / den`, or `Undefined` when `den` is not strictly positive.
    pub fn of(num: f64, den: f64) -> Self {
        if den > 0.0 && num.is_finite() && den.is_finite() {
            Ratio::Defined(num / den)
        } else {
            Ratio::Undefined
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Ratio::Defined(v) => Some(*v),
            Ratio::Undefined => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Ratio::Defined(_))
    }
}

impl From<Option<f64>> for Ratio {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) if v.is_finite() => Ratio::Defined(v),
            _ => Ratio::Undefined,
        }
    }
}

impl From<Ratio> for Option<f64> {
    fn from(ratio: Ratio) -> Self {
        ratio.value()
    }
}

impl std::fmt::Display for Ratio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ratio::Defined(v) => write!(f, "{:.4}", v),
            Ratio::Undefined => write!(f, "undefined"),
        }
    }
}

/// Totals and ratios for one segment (or for the whole data set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMetrics {
    pub segment: String,
    pub rows: usize,
    pub spend: f64,
    pub revenue: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub purchases: u64,
    /// Revenue over spend, counting only rows with non-zero spend.
    pub roas: Ratio,
    pub ctr: Ratio,
    pub cpc: Ratio,
    pub conversion_rate: Ratio,
    /// Share of total spend.
    pub spend_share: Ratio,
}

impl SegmentMetrics {
    pub fn metric(&self, metric: Metric) -> Ratio {
        match metric {
            Metric::Roas => self.roas,
            Metric::Ctr => self.ctr,
            Metric::Cpc => self.cpc,
            Metric::ConversionRate => self.conversion_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalySeverity {
    Moderate,
    High,
    Critical,
}

impl AnomalySeverity {
    /// Severity from how far past the flagging threshold a deviation is.
    pub fn classify(abs_z: f64, threshold: f64) -> Self {
        if abs_z >= threshold * 2.0 {
            AnomalySeverity::Critical
        } else if abs_z >= threshold * 1.5 {
            AnomalySeverity::High
        } else {
            AnomalySeverity::Moderate
        }
    }
}

/// A segment whose metric sits far from the rest of its dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub dimension: Dimension,
    pub segment: String,
    pub metric: Metric,
    pub value: f64,
    /// Mean of the metric across the other segments of the dimension.
    pub dimension_mean: f64,
    /// Spread of the other segments, floored at a tenth of their mean.
    pub std_dev: f64,
    /// Signed deviation in standard deviations.
    pub z_score: f64,
    pub severity: AnomalySeverity,
}

impl Anomaly {
    /// Magnitude used for ordering.
    pub fn magnitude(&self) -> f64 {
        self.z_score.abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Inclusive number of calendar days covered.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Totals for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetrics {
    pub date: NaiveDate,
    pub spend: f64,
    pub revenue: f64,
    pub roas: Ratio,
    pub ctr: Ratio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendKind {
    /// ROAS of the most recent days is well below the earliest days.
    RoasDecline,
    /// CTR of the most recent days is well below the earliest days.
    CreativeFatigue,
}

/// A drop between the first and last window of the daily series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendSignal {
    pub kind: TrendKind,
    pub metric: Metric,
    pub early_value: f64,
    pub recent_value: f64,
    /// Relative change, negative for a decline.
    pub relative_change: f64,
    pub window_days: usize,
}

/// Highest-ROAS creative type and platform pairing with meaningful spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentHighlight {
    pub creative_type: String,
    pub platform: String,
    pub roas: f64,
    pub spend_share: f64,
}

/// A creative type taking a large share of spend at a weak ROAS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetDrain {
    pub creative_type: String,
    pub spend: f64,
    pub spend_share: f64,
    pub roas: f64,
}

/// Everything the hypothesis stage needs to know about the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSummary {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub rejected_rows: usize,
    pub date_range: Option<DateRange>,
    pub campaigns: Vec<String>,
    pub overall: SegmentMetrics,
    /// Segments of each dimension, highest revenue first.
    pub dimensions: BTreeMap<Dimension, Vec<SegmentMetrics>>,
    /// Largest deviation first.
    pub anomalies: Vec<Anomaly>,
    pub daily: Vec<DailyMetrics>,
    pub trends: Vec<TrendSignal>,
    /// Largest spend share first.
    pub budget_drains: Vec<BudgetDrain>,
    pub best_segment: Option<SegmentHighlight>,
    /// Fingerprint of the record set this summary was computed from.
    pub source_fingerprint: u64,
}

impl DataSummary {
    pub fn segments(&self, dimension: Dimension) -> &[SegmentMetrics] {
        self.dimensions
            .get(&dimension)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn segment(&self, dimension: Dimension, name: &str) -> Option<&SegmentMetrics> {
        self.segments(dimension).iter().find(|s| s.segment == name)
    }

    /// Whether `creative_type` was flagged as a budget drain.
    pub fn is_budget_drain(&self, creative_type: &str) -> bool {
        self.budget_drains
            .iter()
            .any(|d| d.creative_type == creative_type)
    }

    /// Whether at least one segment has a defined value for `metric`.
    pub fn metric_available(&self, metric: Metric) -> bool {
        self.overall.metric(metric).is_defined()
    }

    /// Mean revenue per covered calendar day.
    pub fn avg_daily_revenue(&self) -> f64 {
        match self.date_range {
            Some(range) if range.days() > 0 => self.overall.revenue / range.days() as f64,
            _ => self.overall.revenue,
        }
    }
}
