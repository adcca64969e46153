//! Hypothesis Models
//!
//! A hypothesis compares two groups of one dimension on one metric. Its
//! validation result lives inside it, so every result traces to exactly one
//! hypothesis.

use insight_cascade_core::{Dimension, Metric};
use serde::{Deserialize, Serialize};

/// The second group of a comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ComparisonGroup {
    /// One named segment of the dimension.
    Segment(String),
    /// Every row of the dimension outside group A.
    Rest,
}

impl ComparisonGroup {
    /// Whether a row with `value` in the dimension falls in this group.
    pub fn contains(&self, value: &str, group_a: &str) -> bool {
        match self {
            ComparisonGroup::Segment(name) => value == name,
            ComparisonGroup::Rest => value != group_a,
        }
    }

    pub fn label(&self, dimension: Dimension) -> String {
        match self {
            ComparisonGroup::Segment(name) => name.clone(),
            ComparisonGroup::Rest => format!("other {}", dimension),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
    Change,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisStatus {
    Proposed,
    Validated,
    Rejected,
    Inconclusive,
    /// Dropped by a replan before contributing an insight.
    Discarded,
}

impl std::fmt::Display for HypothesisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HypothesisStatus::Proposed => write!(f, "proposed"),
            HypothesisStatus::Validated => write!(f, "validated"),
            HypothesisStatus::Rejected => write!(f, "rejected"),
            HypothesisStatus::Inconclusive => write!(f, "inconclusive"),
            HypothesisStatus::Discarded => write!(f, "discarded"),
        }
    }
}

/// Outcome class of one statistical test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Validated,
    Rejected,
    Inconclusive,
}

impl From<ValidationStatus> for HypothesisStatus {
    fn from(status: ValidationStatus) -> Self {
        match status {
            ValidationStatus::Validated => HypothesisStatus::Validated,
            ValidationStatus::Rejected => HypothesisStatus::Rejected,
            ValidationStatus::Inconclusive => HypothesisStatus::Inconclusive,
        }
    }
}

/// Result of a two-sample test. Immutable once computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub metric: Metric,
    /// Name of the test that produced the statistic.
    pub test: String,
    pub statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
    /// Cohen's d; `None` when the pooled standard deviation is zero.
    pub effect_size: Option<f64>,
    pub mean_a: f64,
    pub mean_b: f64,
    pub std_a: f64,
    pub std_b: f64,
    pub n_a: usize,
    pub n_b: usize,
    pub confidence: f64,
    pub status: ValidationStatus,
    /// A group fell below the minimum sample size.
    pub insufficient_data: bool,
    pub verdict: String,
}

impl ValidationResult {
    pub fn is_validated(&self) -> bool {
        self.status == ValidationStatus::Validated
    }

    /// `(mean_a - mean_b) / mean_b`, when `mean_b` is non-zero.
    pub fn relative_difference(&self) -> Option<f64> {
        if self.mean_b.abs() > f64::EPSILON {
            Some((self.mean_a - self.mean_b) / self.mean_b)
        } else {
            None
        }
    }
}

/// Identity of a comparison, used to skip re-testing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComparisonKey {
    pub dimension: Dimension,
    pub metric: Metric,
    pub group_a: String,
    pub group_b: ComparisonGroup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hypothesis {
    pub id: String,
    /// Identifier the completion service gave the candidate, if any.
    pub source_id: Option<String>,
    /// Replan count at the time the hypothesis was proposed.
    pub iteration: u32,
    pub statement: String,
    pub rationale: String,
    pub dimension: Dimension,
    pub metric: Metric,
    pub group_a: String,
    pub group_b: ComparisonGroup,
    pub expected_direction: Direction,
    pub status: HypothesisStatus,
    pub validation: Option<ValidationResult>,
}

impl Hypothesis {
    pub fn comparison_key(&self) -> ComparisonKey {
        // A vs B and B vs A are the same comparison
        let (group_a, group_b) = match &self.group_b {
            ComparisonGroup::Segment(b) if b < &self.group_a => (
                b.clone(),
                ComparisonGroup::Segment(self.group_a.clone()),
            ),
            other => (self.group_a.clone(), other.clone()),
        };
        ComparisonKey {
            dimension: self.dimension,
            metric: self.metric,
            group_a,
            group_b,
        }
    }

    /// Store the test outcome and move to the matching status.
    pub fn attach(&mut self, result: ValidationResult) {
        self.status = result.status.into();
        self.validation = Some(result);
    }

    /// Mark a hypothesis that did not validate as dropped by a replan.
    pub fn discard(&mut self) {
        if self.status != HypothesisStatus::Validated {
            self.status = HypothesisStatus::Discarded;
        }
    }

    pub fn is_validated(&self) -> bool {
        self.status == HypothesisStatus::Validated
    }

    /// "creative_type: Image vs Video"
    pub fn describe_groups(&self) -> String {
        format!(
            "{}: {} vs {}",
            self.dimension,
            self.group_a,
            self.group_b.label(self.dimension)
        )
    }
}

/// A candidate returned by the completion service that could not be tested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscardedCandidate {
    pub source_id: Option<String>,
    pub iteration: u32,
    pub reason: String,
}
