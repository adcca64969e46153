//! Statistical Validator
//!
//! Tests whether two groups differ on a metric. Welch's two-sample t-test
//! gives the p-value, Cohen's d with the pooled standard deviation gives the
//! effect size, and both feed a deterministic confidence score:
//!
//! `confidence = clip01(w_sig * (1 - p) + w_eff * min(|d| / d_sat, 1))`
//!
//! A hypothesis is validated only when `p < alpha`, `|d| >= min_effect`, and
//! both groups reach the minimum sample size. Groups below that size are
//! reported inconclusive with confidence capped low.

use insight_cascade_core::{AnalysisConfig, Metric};
use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::{debug, instrument};

use super::SampleStats;
use crate::models::{ValidationResult, ValidationStatus};

const TEST_NAME: &str = "welch_t_test";

/// Thresholds and weights the validator is configured with.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationThresholds {
    pub significance_level: f64,
    pub min_effect_size: f64,
    pub min_sample_size: usize,
    pub significance_weight: f64,
    pub effect_weight: f64,
    pub effect_saturation: f64,
    pub insufficient_sample_confidence_cap: f64,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self::from(&AnalysisConfig::default())
    }
}

impl From<&AnalysisConfig> for ValidationThresholds {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            significance_level: config.significance_level,
            min_effect_size: config.min_effect_size,
            min_sample_size: config.min_sample_size,
            significance_weight: config.confidence_significance_weight,
            effect_weight: config.confidence_effect_weight,
            effect_saturation: config.confidence_effect_saturation,
            insufficient_sample_confidence_cap: config.insufficient_sample_confidence_cap,
        }
    }
}

/// Conventional label for a Cohen's d magnitude.
pub fn interpret_effect(d: f64) -> &'static str {
    let d = d.abs();
    if d < 0.2 {
        "negligible"
    } else if d < 0.5 {
        "small"
    } else if d < 0.8 {
        "medium"
    } else {
        "large"
    }
}

/// Two-tailed p-value of `t` under a Student t distribution with `df` degrees
/// of freedom.
fn two_tailed_p(t: f64, df: f64) -> f64 {
    if !t.is_finite() || !(df > 0.0) {
        return 1.0;
    }
    match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatisticalValidator {
    thresholds: ValidationThresholds,
}

impl StatisticalValidator {
    pub fn new(thresholds: ValidationThresholds) -> Self {
        Self { thresholds }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(ValidationThresholds::from(config))
    }

    pub fn thresholds(&self) -> &ValidationThresholds {
        &self.thresholds
    }

    /// Confidence score for a p-value and optional effect size.
    ///
    /// Non-increasing in `p`, non-decreasing in `|d|`, always in `[0, 1]`.
    pub fn confidence(&self, p_value: f64, effect_size: Option<f64>) -> f64 {
        let t = &self.thresholds;
        let significance = 1.0 - p_value.clamp(0.0, 1.0);
        let effect = effect_size
            .map(|d| (d.abs() / t.effect_saturation).min(1.0))
            .unwrap_or(0.0);
        (t.significance_weight * significance + t.effect_weight * effect).clamp(0.0, 1.0)
    }

    /// Compare `group_a` against `group_b` on `metric`.
    #[instrument(skip_all, fields(metric = %metric, n_a = group_a.len(), n_b = group_b.len()))]
    pub fn validate(&self, group_a: &[f64], group_b: &[f64], metric: Metric) -> ValidationResult {
        let t = &self.thresholds;
        let a = SampleStats::of(group_a);
        let b = SampleStats::of(group_b);
        let insufficient = a.n < t.min_sample_size || b.n < t.min_sample_size;

        let mut result = ValidationResult {
            metric,
            test: TEST_NAME.to_string(),
            statistic: 0.0,
            degrees_of_freedom: 0.0,
            p_value: 1.0,
            effect_size: None,
            mean_a: a.mean,
            mean_b: b.mean,
            std_a: a.std_dev(),
            std_b: b.std_dev(),
            n_a: a.n,
            n_b: b.n,
            confidence: 0.0,
            status: ValidationStatus::Inconclusive,
            insufficient_data: insufficient,
            verdict: String::new(),
        };

        if a.n < 2 || b.n < 2 {
            result.verdict = format!(
                "Inconclusive: insufficient data (n_a={}, n_b={}, minimum {})",
                a.n, b.n, t.min_sample_size
            );
            return result;
        }

        let se_a = a.variance / a.n as f64;
        let se_b = b.variance / b.n as f64;
        let se_sq = se_a + se_b;
        if se_sq <= 0.0 {
            result.verdict = "Inconclusive: zero variance in both groups".to_string();
            return result;
        }

        let statistic = (a.mean - b.mean) / se_sq.sqrt();
        let df = se_sq.powi(2)
            / (se_a.powi(2) / (a.n as f64 - 1.0) + se_b.powi(2) / (b.n as f64 - 1.0));
        let p_value = two_tailed_p(statistic, df);

        let pooled_var = ((a.n as f64 - 1.0) * a.variance + (b.n as f64 - 1.0) * b.variance)
            / (a.n + b.n - 2) as f64;
        let pooled_sd = pooled_var.sqrt();
        let effect_size = if pooled_sd > f64::EPSILON {
            Some((a.mean - b.mean) / pooled_sd)
        } else {
            None
        };

        let mut confidence = self.confidence(p_value, effect_size);
        if insufficient {
            confidence = confidence.min(t.insufficient_sample_confidence_cap);
        }

        let (status, verdict) = match effect_size {
            _ if insufficient => (
                ValidationStatus::Inconclusive,
                format!(
                    "Inconclusive: insufficient data (n_a={}, n_b={}, minimum {})",
                    a.n, b.n, t.min_sample_size
                ),
            ),
            None => (
                ValidationStatus::Inconclusive,
                "Inconclusive: effect size undefined (zero pooled variance)".to_string(),
            ),
            Some(_) if p_value >= t.significance_level => (
                ValidationStatus::Rejected,
                format!(
                    "Not supported: no significant {} difference (p={:.4})",
                    metric, p_value
                ),
            ),
            Some(d) if d.abs() >= t.min_effect_size => (
                ValidationStatus::Validated,
                format!(
                    "Supported: {} differs significantly (p={:.4}, d={:.2}, {} effect)",
                    metric,
                    p_value,
                    d,
                    interpret_effect(d)
                ),
            ),
            Some(d) => (
                ValidationStatus::Inconclusive,
                format!(
                    "Inconclusive: significant (p={:.4}) but effect d={:.2} is below {:.2}",
                    p_value, d, t.min_effect_size
                ),
            ),
        };

        debug!(
            t_statistic = statistic,
            df = df,
            p_value = p_value,
            effect_size = ?effect_size,
            confidence = confidence,
            status = ?status,
            "Two-sample test results"
        );

        result.statistic = statistic;
        result.degrees_of_freedom = df;
        result.p_value = p_value;
        result.effect_size = effect_size;
        result.confidence = confidence;
        result.status = status;
        result.verdict = verdict;
        result
    }
}
