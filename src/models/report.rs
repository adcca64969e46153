//! Report Models
//!
//! The final output of a completed run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::hypothesis::DiscardedCandidate;
use super::insight::{Insight, Recommendation};
use super::summary::DataSummary;
use crate::services::orchestrator::state::{OrchestratorPhase, ReplanRecord};

/// How the run got to its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub run_id: String,
    /// Replanning cycles performed.
    pub iterations: u32,
    pub replans: Vec<ReplanRecord>,
    pub rejected_rows: usize,
    pub final_phase: OrchestratorPhase,
    /// Replanning was wanted but the configured maximum was reached.
    pub max_iterations_reached: bool,
    /// Replanning was wanted but the plan had nothing left to explore.
    pub plan_exhausted: bool,
    pub hypotheses_tested: usize,
    pub hypotheses_validated: usize,
    pub validation_success_rate: f64,
    pub discarded_candidates: Vec<DiscardedCandidate>,
    pub plan_revisions: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub query: String,
    pub executive_summary: String,
    /// Highest impact first.
    pub insights: Vec<Insight>,
    /// Highest priority first.
    pub recommendations: Vec<Recommendation>,
    pub data_summary: DataSummary,
    pub metadata: RunMetadata,
}
