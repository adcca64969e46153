//! Analysis Configuration
//!
//! Thresholds and budgets for one analysis run. The struct deserializes from
//! TOML with every field defaulted, and `AnalysisConfigBuilder` offers the
//! builder form:
//! 1. Create with `::new()` or `::default()`
//! 2. Chain `.field(value)` calls
//! 3. Call `.build()` which validates and returns `CoreResult<AnalysisConfig>`
//!
//! Both paths run the same `validate()` so a bad threshold is caught before a
//! run starts.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::taxonomy::Dimension;

/// Validated configuration for an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Significance level (alpha) for the two-sample test.
    pub significance_level: f64,
    /// Minimum |Cohen's d| for a hypothesis to count as validated.
    pub min_effect_size: f64,
    /// Minimum observations required in each comparison group.
    pub min_sample_size: usize,
    /// Maximum number of replanning cycles per run.
    pub max_replans: u32,
    /// Validated hypotheses needed before recommending without replanning.
    pub min_validated_insights: usize,
    /// Dimensions that must be covered by at least one validated hypothesis.
    pub critical_dimensions: Vec<Dimension>,
    /// Standard deviations beyond which a segment is flagged as an anomaly.
    pub anomaly_sigma: f64,
    /// Spend share above which a weak creative type counts as a budget drain.
    pub budget_drain_min_spend_share: f64,
    /// ROAS below which a creative type with a large spend share counts as a budget drain.
    pub budget_drain_max_roas: f64,
    /// Largest tolerated share of malformed input rows.
    pub max_rejected_fraction: f64,
    /// Hypotheses requested from the completion service per round.
    pub hypotheses_per_round: usize,
    /// Hypothesis tests allowed to run at the same time.
    pub max_parallel_validations: usize,
    /// Overall time budget of a run, in seconds.
    pub run_timeout_secs: u64,
    /// Per-call timeout for the completion service; falls back to the run budget.
    pub llm_call_timeout_secs: Option<u64>,
    /// Attempts per completion request, including repairs.
    pub llm_max_attempts: u32,
    /// First backoff interval between completion attempts, in milliseconds.
    pub llm_initial_backoff_ms: u64,
    pub confidence_significance_weight: f64,
    pub confidence_effect_weight: f64,
    /// |d| at which the effect term of the confidence score saturates.
    pub confidence_effect_saturation: f64,
    /// Upper bound on confidence when a group is below the minimum sample size.
    pub insufficient_sample_confidence_cap: f64,
    /// Ask the completion service which dimension to explore on replan.
    pub guided_replanning: bool,
    /// Ask the completion service to write recommendation text.
    pub narrate_recommendations: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            significance_level: 0.05,
            min_effect_size: 0.3,
            min_sample_size: 30,
            max_replans: 2,
            min_validated_insights: 2,
            critical_dimensions: Vec::new(),
            anomaly_sigma: 2.0,
            budget_drain_min_spend_share: 0.15,
            budget_drain_max_roas: 3.0,
            max_rejected_fraction: 0.25,
            hypotheses_per_round: 4,
            max_parallel_validations: 4,
            run_timeout_secs: 300,
            llm_call_timeout_secs: None,
            llm_max_attempts: 3,
            llm_initial_backoff_ms: 500,
            confidence_significance_weight: 0.6,
            confidence_effect_weight: 0.4,
            confidence_effect_saturation: 0.8,
            insufficient_sample_confidence_cap: 0.3,
            guided_replanning: true,
            narrate_recommendations: true,
        }
    }
}

impl AnalysisConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> CoreResult<Self> {
        let config: AnalysisConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Per-call timeout for the completion service.
    pub fn llm_call_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_call_timeout_secs.unwrap_or(self.run_timeout_secs))
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn llm_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.llm_initial_backoff_ms)
    }

    /// Check every threshold for a usable value.
    pub fn validate(&self) -> CoreResult<()> {
        if !(self.significance_level > 0.0 && self.significance_level < 1.0) {
            return Err(CoreError::validation("significance_level must be in (0, 1)"));
        }
        if !(self.min_effect_size >= 0.0 && self.min_effect_size.is_finite()) {
            return Err(CoreError::validation("min_effect_size must be >= 0"));
        }
        if self.min_sample_size < 2 {
            return Err(CoreError::validation("min_sample_size must be >= 2"));
        }
        if self.min_validated_insights == 0 {
            return Err(CoreError::validation("min_validated_insights must be > 0"));
        }
        if !(self.anomaly_sigma > 0.0 && self.anomaly_sigma.is_finite()) {
            return Err(CoreError::validation("anomaly_sigma must be > 0"));
        }
        if !(self.budget_drain_min_spend_share > 0.0 && self.budget_drain_min_spend_share < 1.0) {
            return Err(CoreError::validation(
                "budget_drain_min_spend_share must be in (0, 1)",
            ));
        }
        if !(self.budget_drain_max_roas > 0.0 && self.budget_drain_max_roas.is_finite()) {
            return Err(CoreError::validation("budget_drain_max_roas must be > 0"));
        }
        if !(0.0..=1.0).contains(&self.max_rejected_fraction) {
            return Err(CoreError::validation(
                "max_rejected_fraction must be between 0.0 and 1.0",
            ));
        }
        if self.hypotheses_per_round == 0 {
            return Err(CoreError::validation("hypotheses_per_round must be > 0"));
        }
        if self.max_parallel_validations == 0 {
            return Err(CoreError::validation("max_parallel_validations must be > 0"));
        }
        if self.run_timeout_secs == 0 {
            return Err(CoreError::validation("run_timeout_secs must be > 0"));
        }
        if self.llm_call_timeout_secs == Some(0) {
            return Err(CoreError::validation("llm_call_timeout_secs must be > 0"));
        }
        if self.llm_max_attempts == 0 {
            return Err(CoreError::validation("llm_max_attempts must be > 0"));
        }

        let (w_sig, w_eff) = (
            self.confidence_significance_weight,
            self.confidence_effect_weight,
        );
        if w_sig < 0.0 || w_eff < 0.0 || ((w_sig + w_eff) - 1.0).abs() > 1e-9 {
            return Err(CoreError::validation(
                "confidence weights must be non-negative and sum to 1.0",
            ));
        }
        if !(self.confidence_effect_saturation > 0.0) {
            return Err(CoreError::validation(
                "confidence_effect_saturation must be > 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.insufficient_sample_confidence_cap) {
            return Err(CoreError::validation(
                "insufficient_sample_confidence_cap must be between 0.0 and 1.0",
            ));
        }

        let mut seen = Vec::with_capacity(self.critical_dimensions.len());
        for dim in &self.critical_dimensions {
            if seen.contains(dim) {
                return Err(CoreError::validation(format!(
                    "critical dimension '{}' listed twice",
                    dim
                )));
            }
            seen.push(*dim);
        }

        Ok(())
    }
}

// ============================================================================
// AnalysisConfigBuilder
// ============================================================================

/// Builder for [`AnalysisConfig`] with validation at build time.
///
/// # Example
/// ```ignore
/// let config = AnalysisConfigBuilder::new()
///     .max_replans(3)
///     .critical_dimension(Dimension::Platform)
///     .build()?;
/// ```
#[derive(Debug, Default)]
pub struct AnalysisConfigBuilder {
    significance_level: Option<f64>,
    min_effect_size: Option<f64>,
    min_sample_size: Option<usize>,
    max_replans: Option<u32>,
    min_validated_insights: Option<usize>,
    critical_dimensions: Vec<Dimension>,
    anomaly_sigma: Option<f64>,
    budget_drain: Option<(f64, f64)>,
    max_rejected_fraction: Option<f64>,
    hypotheses_per_round: Option<usize>,
    max_parallel_validations: Option<usize>,
    run_timeout_secs: Option<u64>,
    llm_call_timeout_secs: Option<u64>,
    llm_max_attempts: Option<u32>,
    llm_initial_backoff_ms: Option<u64>,
    confidence_weights: Option<(f64, f64)>,
    guided_replanning: Option<bool>,
    narrate_recommendations: Option<bool>,
}

impl AnalysisConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn significance_level(mut self, alpha: f64) -> Self {
        self.significance_level = Some(alpha);
        self
    }

    pub fn min_effect_size(mut self, d: f64) -> Self {
        self.min_effect_size = Some(d);
        self
    }

    pub fn min_sample_size(mut self, n: usize) -> Self {
        self.min_sample_size = Some(n);
        self
    }

    pub fn max_replans(mut self, n: u32) -> Self {
        self.max_replans = Some(n);
        self
    }

    pub fn min_validated_insights(mut self, n: usize) -> Self {
        self.min_validated_insights = Some(n);
        self
    }

    /// Add a dimension that must end up with a validated hypothesis.
    pub fn critical_dimension(mut self, dim: Dimension) -> Self {
        self.critical_dimensions.push(dim);
        self
    }

    pub fn anomaly_sigma(mut self, sigma: f64) -> Self {
        self.anomaly_sigma = Some(sigma);
        self
    }

    /// Flag creative types above `min_spend_share` of spend with ROAS below `max_roas`.
    pub fn budget_drain(mut self, min_spend_share: f64, max_roas: f64) -> Self {
        self.budget_drain = Some((min_spend_share, max_roas));
        self
    }

    pub fn max_rejected_fraction(mut self, fraction: f64) -> Self {
        self.max_rejected_fraction = Some(fraction);
        self
    }

    pub fn hypotheses_per_round(mut self, n: usize) -> Self {
        self.hypotheses_per_round = Some(n);
        self
    }

    pub fn max_parallel_validations(mut self, n: usize) -> Self {
        self.max_parallel_validations = Some(n);
        self
    }

    pub fn run_timeout_secs(mut self, secs: u64) -> Self {
        self.run_timeout_secs = Some(secs);
        self
    }

    pub fn llm_call_timeout_secs(mut self, secs: u64) -> Self {
        self.llm_call_timeout_secs = Some(secs);
        self
    }

    pub fn llm_max_attempts(mut self, n: u32) -> Self {
        self.llm_max_attempts = Some(n);
        self
    }

    pub fn llm_initial_backoff_ms(mut self, ms: u64) -> Self {
        self.llm_initial_backoff_ms = Some(ms);
        self
    }

    /// Set the significance and effect weights of the confidence score.
    pub fn confidence_weights(mut self, significance: f64, effect: f64) -> Self {
        self.confidence_weights = Some((significance, effect));
        self
    }

    pub fn guided_replanning(mut self, enabled: bool) -> Self {
        self.guided_replanning = Some(enabled);
        self
    }

    pub fn narrate_recommendations(mut self, enabled: bool) -> Self {
        self.narrate_recommendations = Some(enabled);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> CoreResult<AnalysisConfig> {
        let defaults = AnalysisConfig::default();
        let (w_sig, w_eff) = self.confidence_weights.unwrap_or((
            defaults.confidence_significance_weight,
            defaults.confidence_effect_weight,
        ));

        let (drain_share, drain_roas) = self.budget_drain.unwrap_or((
            defaults.budget_drain_min_spend_share,
            defaults.budget_drain_max_roas,
        ));

        let config = AnalysisConfig {
            significance_level: self.significance_level.unwrap_or(defaults.significance_level),
            min_effect_size: self.min_effect_size.unwrap_or(defaults.min_effect_size),
            min_sample_size: self.min_sample_size.unwrap_or(defaults.min_sample_size),
            max_replans: self.max_replans.unwrap_or(defaults.max_replans),
            min_validated_insights: self
                .min_validated_insights
                .unwrap_or(defaults.min_validated_insights),
            critical_dimensions: self.critical_dimensions,
            anomaly_sigma: self.anomaly_sigma.unwrap_or(defaults.anomaly_sigma),
            budget_drain_min_spend_share: drain_share,
            budget_drain_max_roas: drain_roas,
            max_rejected_fraction: self
                .max_rejected_fraction
                .unwrap_or(defaults.max_rejected_fraction),
            hypotheses_per_round: self
                .hypotheses_per_round
                .unwrap_or(defaults.hypotheses_per_round),
            max_parallel_validations: self
                .max_parallel_validations
                .unwrap_or(defaults.max_parallel_validations),
            run_timeout_secs: self.run_timeout_secs.unwrap_or(defaults.run_timeout_secs),
            llm_call_timeout_secs: self.llm_call_timeout_secs.or(defaults.llm_call_timeout_secs),
            llm_max_attempts: self.llm_max_attempts.unwrap_or(defaults.llm_max_attempts),
            llm_initial_backoff_ms: self
                .llm_initial_backoff_ms
                .unwrap_or(defaults.llm_initial_backoff_ms),
            confidence_significance_weight: w_sig,
            confidence_effect_weight: w_eff,
            confidence_effect_saturation: defaults.confidence_effect_saturation,
            insufficient_sample_confidence_cap: defaults.insufficient_sample_confidence_cap,
            guided_replanning: self.guided_replanning.unwrap_or(defaults.guided_replanning),
            narrate_recommendations: self
                .narrate_recommendations
                .unwrap_or(defaults.narrate_recommendations),
        };

        config.validate()?;
        Ok(config)
    }
}
