//! Run State
//!
//! Phases of an analysis run and the per-run state the orchestrator threads
//! through them. Nothing here outlives a single run.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use insight_cascade_core::Dimension;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::{
    ComparisonKey, DataSummary, DiscardedCandidate, Hypothesis, HypothesisStatus, Insight,
};
use crate::services::plan_mode::{ReplanReason, TaskPlan};
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorPhase {
    Planning,
    Summarizing,
    Hypothesizing,
    Validating,
    Replanning,
    Recommending,
    Done,
    Failed,
    Cancelled,
}

impl OrchestratorPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorPhase::Done | OrchestratorPhase::Failed | OrchestratorPhase::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: OrchestratorPhase) -> bool {
        use OrchestratorPhase::*;
        if self.is_terminal() {
            return false;
        }
        match next {
            Failed | Cancelled => true,
            _ => matches!(
                (*self, next),
                (Planning, Summarizing)
                    | (Summarizing, Hypothesizing)
                    | (Hypothesizing, Validating)
                    | (Validating, Replanning)
                    | (Validating, Recommending)
                    | (Replanning, Planning)
                    | (Replanning, Recommending)
                    | (Recommending, Done)
            ),
        }
    }
}

impl fmt::Display for OrchestratorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrchestratorPhase::Planning => "planning",
            OrchestratorPhase::Summarizing => "summarizing",
            OrchestratorPhase::Hypothesizing => "hypothesizing",
            OrchestratorPhase::Validating => "validating",
            OrchestratorPhase::Replanning => "replanning",
            OrchestratorPhase::Recommending => "recommending",
            OrchestratorPhase::Done => "done",
            OrchestratorPhase::Failed => "failed",
            OrchestratorPhase::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// One replanning cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplanRecord {
    /// Iteration whose validation triggered the replan.
    pub iteration: u32,
    pub reason: ReplanReason,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    PhaseChanged,
    PlanCreated,
    PlanRevised,
    RowsRejected,
    SummaryComputed,
    SummaryReused,
    HypothesisDiscarded,
    DuplicateSkipped,
    HypothesisTested,
    InsufficientData,
    ReplanRequested,
    ForcedRecommendation,
    Cancelled,
    Failure,
}

/// A decision or non-fatal condition recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub at: DateTime<Utc>,
    pub phase: OrchestratorPhase,
    pub iteration: u32,
    pub kind: TraceKind,
    pub message: String,
}

/// Everything one run accumulates.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: String,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub phase: OrchestratorPhase,
    /// Replans performed so far.
    pub iteration: u32,
    pub plan: Option<TaskPlan>,
    /// Superseded plans, oldest first.
    pub plan_history: Vec<TaskPlan>,
    pub hypotheses: Vec<Hypothesis>,
    pub insights: Vec<Insight>,
    pub replans: Vec<ReplanRecord>,
    pub discarded: Vec<DiscardedCandidate>,
    pub trace: Vec<TraceEvent>,
    pub max_iterations_reached: bool,
    pub plan_exhausted: bool,
    /// Replan reason decided by the last validation.
    pub pending_replan: Option<ReplanReason>,
    #[serde(skip)]
    pub summary: Option<Arc<DataSummary>>,
    pub summary_fingerprint: Option<u64>,
}

impl RunState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            query: query.into(),
            started_at: Utc::now(),
            phase: OrchestratorPhase::Planning,
            iteration: 0,
            plan: None,
            plan_history: Vec::new(),
            hypotheses: Vec::new(),
            insights: Vec::new(),
            replans: Vec::new(),
            discarded: Vec::new(),
            trace: Vec::new(),
            max_iterations_reached: false,
            plan_exhausted: false,
            pending_replan: None,
            summary: None,
            summary_fingerprint: None,
        }
    }

    pub fn record(&mut self, kind: TraceKind, message: impl Into<String>) {
        let message = message.into();
        debug!(
            run_id = %self.run_id,
            phase = %self.phase,
            iteration = self.iteration,
            kind = ?kind,
            "[Run] {}",
            message
        );
        self.trace.push(TraceEvent {
            at: Utc::now(),
            phase: self.phase,
            iteration: self.iteration,
            kind,
            message,
        });
    }

    /// Move to `next`, rejecting moves the state machine does not allow.
    pub fn transition(&mut self, next: OrchestratorPhase) -> AppResult<()> {
        if !self.phase.can_transition_to(next) {
            return Err(AppError::internal(format!(
                "illegal phase transition {} -> {}",
                self.phase, next
            )));
        }
        info!(
            run_id = %self.run_id,
            iteration = self.iteration,
            from = %self.phase,
            to = %next,
            "[Run] Phase transition"
        );
        let message = format!("{} -> {}", self.phase, next);
        self.phase = next;
        self.record(TraceKind::PhaseChanged, message);
        Ok(())
    }

    pub fn validated(&self) -> impl Iterator<Item = &Hypothesis> {
        self.hypotheses.iter().filter(|h| h.is_validated())
    }

    pub fn validated_count(&self) -> usize {
        self.validated().count()
    }

    /// Hypotheses that received a test result.
    pub fn tested_count(&self) -> usize {
        self.hypotheses
            .iter()
            .filter(|h| h.validation.is_some())
            .count()
    }

    pub fn tested_keys(&self) -> HashSet<ComparisonKey> {
        self.hypotheses
            .iter()
            .filter(|h| h.validation.is_some())
            .map(Hypothesis::comparison_key)
            .collect()
    }

    /// Dimensions any tested hypothesis compared on, in exploration order.
    pub fn covered_dimensions(&self) -> Vec<Dimension> {
        self.hypotheses
            .iter()
            .filter(|h| h.validation.is_some())
            .map(|h| h.dimension)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn current_iteration(&self) -> impl Iterator<Item = &Hypothesis> {
        let iteration = self.iteration;
        self.hypotheses
            .iter()
            .filter(move |h| h.iteration == iteration)
    }

    /// Mark the current iteration's non-validated hypotheses as discarded.
    pub fn discard_current(&mut self) -> usize {
        let iteration = self.iteration;
        let mut discarded = 0;
        for hypothesis in self
            .hypotheses
            .iter_mut()
            .filter(|h| h.iteration == iteration && !h.is_validated())
        {
            hypothesis.discard();
            discarded += 1;
        }
        discarded
    }

    pub fn count_with_status(&self, status: HypothesisStatus) -> usize {
        self.hypotheses.iter().filter(|h| h.status == status).count()
    }
}
