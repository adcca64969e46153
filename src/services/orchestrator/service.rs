//! Orchestrator Service
//!
//! Drives one analysis run through its phases:
//!
//! `Planning -> Summarizing -> Hypothesizing -> Validating -> {Replanning | Recommending} -> Done`
//!
//! with `Failed` and `Cancelled` reachable from any non-terminal phase. The
//! orchestrator only holds configuration and stage components; all run-scoped
//! data lives in a [`RunState`] created per call, so concurrent runs on one
//! orchestrator never share state.

use std::sync::Arc;

use chrono::Utc;
use insight_cascade_core::AnalysisConfig;
use insight_cascade_llm::{LlmError, LlmProvider};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::stage::Stage;
use super::state::{OrchestratorPhase, ReplanRecord, RunState, TraceKind};
use crate::models::{
    AnalysisReport, DataSummary, HypothesisStatus, RawAdRow, RecordSet, RunMetadata,
};
use crate::services::hypothesis::{HypothesisEngine, ProposalRequest};
use crate::services::plan_mode::{
    PlanCommand, PlanFeedback, PlanManager, PlanRevisionOutcome, ReplanReason,
};
use crate::services::recommender::{RecommendationInput, Recommender};
use crate::services::summarizer::DataSummarizer;
use crate::utils::error::{AppError, AppResult};

/// Rejected-row reasons quoted in the trace.
const MAX_QUOTED_REJECTIONS: usize = 5;

/// Why a run ended in `Failed` or `Cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    /// Phase the run was in when it stopped.
    pub phase: OrchestratorPhase,
    pub error: String,
}

/// Result of one run. `report` is present only when `phase` is `Done`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub phase: OrchestratorPhase,
    pub report: Option<AnalysisReport>,
    pub state: RunState,
    pub failure: Option<RunFailure>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.phase == OrchestratorPhase::Done
    }
}

pub struct Orchestrator {
    config: AnalysisConfig,
    planner: PlanManager,
    summarizer: DataSummarizer,
    engine: HypothesisEngine,
    recommender: Recommender,
}

impl Orchestrator {
    /// Build an orchestrator whose stages share `provider`.
    pub fn new(config: AnalysisConfig, provider: Arc<dyn LlmProvider>) -> AppResult<Self> {
        config.validate()?;

        let planner = if config.guided_replanning {
            PlanManager::guided(&config, provider.clone())
        } else {
            PlanManager::new(&config)
        };
        let recommender = if config.narrate_recommendations {
            Recommender::narrated(&config, provider.clone())
        } else {
            Recommender::new(&config)
        };

        Ok(Self {
            planner,
            summarizer: DataSummarizer::from_config(&config),
            engine: HypothesisEngine::new(provider, &config),
            recommender,
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyze `rows` to answer `query`.
    pub async fn run(&self, query: &str, rows: &[RawAdRow]) -> RunOutcome {
        self.run_with_cancellation(query, rows, CancellationToken::new())
            .await
    }

    pub async fn run_with_cancellation(
        &self,
        query: &str,
        rows: &[RawAdRow],
        token: CancellationToken,
    ) -> RunOutcome {
        self.run_records(query, RecordSet::from_rows(rows), token)
            .await
    }

    /// Analyze an already-parsed record set.
    pub async fn run_records(
        &self,
        query: &str,
        records: RecordSet,
        token: CancellationToken,
    ) -> RunOutcome {
        let mut state = RunState::new(query);
        let deadline = Instant::now() + self.config.run_timeout();
        info!(
            run_id = %state.run_id,
            rows = records.total_rows(),
            "[Orchestrator] Run started"
        );

        let result = self
            .drive(&mut state, Arc::new(records), &token, deadline)
            .await;

        match result {
            Ok(report) => {
                info!(
                    run_id = %state.run_id,
                    iterations = state.iteration,
                    insights = report.insights.len(),
                    "[Orchestrator] Run finished"
                );
                RunOutcome {
                    phase: state.phase,
                    report: Some(report),
                    state,
                    failure: None,
                }
            }
            Err(e) => self.stop(state, e),
        }
    }

    /// Move the run to its terminal failure phase, keeping everything
    /// accumulated so far.
    fn stop(&self, mut state: RunState, err: AppError) -> RunOutcome {
        let stopped_in = state.phase;
        let (terminal, kind) = match err {
            AppError::Cancelled(_) => (OrchestratorPhase::Cancelled, TraceKind::Cancelled),
            _ => (OrchestratorPhase::Failed, TraceKind::Failure),
        };

        if terminal == OrchestratorPhase::Cancelled {
            warn!(run_id = %state.run_id, phase = %stopped_in, "[Orchestrator] Run cancelled: {}", err);
        } else {
            error!(run_id = %state.run_id, phase = %stopped_in, "[Orchestrator] Run failed: {}", err);
        }

        state.record(kind, err.to_string());
        if state.phase.can_transition_to(terminal) {
            state.phase = terminal;
        }
        // A cancelled run emits nothing partial
        if terminal == OrchestratorPhase::Cancelled {
            state.insights.clear();
        }

        RunOutcome {
            phase: state.phase,
            report: None,
            failure: Some(RunFailure {
                phase: stopped_in,
                error: err.to_string(),
            }),
            state,
        }
    }

    fn checkpoint(
        &self,
        state: &RunState,
        token: &CancellationToken,
        deadline: Instant,
    ) -> AppResult<()> {
        if token.is_cancelled() {
            return Err(AppError::cancelled(format!("cancelled before {}", state.phase)));
        }
        if Instant::now() >= deadline {
            return Err(self.budget_exceeded());
        }
        Ok(())
    }

    fn budget_exceeded(&self) -> AppError {
        AppError::ExternalService(LlmError::Timeout {
            seconds: self.config.run_timeout_secs,
        })
    }

    /// Run one stage, stopping early on cancellation or when the run budget
    /// runs out.
    async fn guarded<S: Stage>(
        &self,
        stage: &S,
        input: S::Input,
        token: &CancellationToken,
        deadline: Instant,
    ) -> AppResult<S::Output> {
        let kind = stage.kind();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(AppError::cancelled(format!("cancelled during {}", kind))),
            _ = tokio::time::sleep_until(deadline) => Err(self.budget_exceeded()),
            result = stage.run(input) => result,
        }
    }

    async fn drive(
        &self,
        state: &mut RunState,
        records: Arc<RecordSet>,
        token: &CancellationToken,
        deadline: Instant,
    ) -> AppResult<AnalysisReport> {
        loop {
            self.checkpoint(state, token, deadline)?;

            match state.phase {
                OrchestratorPhase::Planning => {
                    self.plan(state, token, deadline).await?;
                    state.transition(OrchestratorPhase::Summarizing)?;
                }
                OrchestratorPhase::Summarizing => {
                    self.summarize(state, &records, token, deadline).await?;
                    state.transition(OrchestratorPhase::Hypothesizing)?;
                }
                OrchestratorPhase::Hypothesizing => {
                    self.hypothesize(state, token, deadline).await?;
                    state.transition(OrchestratorPhase::Validating)?;
                }
                OrchestratorPhase::Validating => {
                    self.validate(state, &records, token, deadline).await?;
                    let next = match self.replan_reason(state) {
                        Some(reason) => {
                            state.record(TraceKind::ReplanRequested, reason.to_string());
                            state.pending_replan = Some(reason);
                            OrchestratorPhase::Replanning
                        }
                        None => OrchestratorPhase::Recommending,
                    };
                    state.transition(next)?;
                }
                OrchestratorPhase::Replanning => {
                    let next = self.replan(state, token, deadline).await?;
                    state.transition(next)?;
                }
                OrchestratorPhase::Recommending => {
                    let report = self.recommend(state, &records, token, deadline).await?;
                    state.transition(OrchestratorPhase::Done)?;
                    return Ok(report);
                }
                terminal => {
                    return Err(AppError::internal(format!(
                        "run loop reached terminal phase {}",
                        terminal
                    )));
                }
            }
        }
    }

    /// Create the first plan, or commit the revision made while replanning.
    async fn plan(
        &self,
        state: &mut RunState,
        token: &CancellationToken,
        deadline: Instant,
    ) -> AppResult<()> {
        if let Some(plan) = &state.plan {
            let message = format!("revision {} committed", plan.revision);
            state.record(TraceKind::PlanRevised, message);
            return Ok(());
        }

        let command = PlanCommand::Create {
            query: state.query.clone(),
        };
        match self.guarded(&self.planner, command, token, deadline).await? {
            PlanRevisionOutcome::Revised(plan) => {
                let message = format!(
                    "plan {} with {} steps in {} batches",
                    plan.id,
                    plan.steps.len(),
                    plan.batches.len()
                );
                state.plan = Some(plan);
                state.record(TraceKind::PlanCreated, message);
                Ok(())
            }
            PlanRevisionOutcome::Exhausted => {
                Err(AppError::invalid_plan("planner produced no initial plan"))
            }
        }
    }

    async fn summarize(
        &self,
        state: &mut RunState,
        records: &Arc<RecordSet>,
        token: &CancellationToken,
        deadline: Instant,
    ) -> AppResult<()> {
        if state.summary.is_some() && state.summary_fingerprint == Some(records.fingerprint()) {
            state.record(TraceKind::SummaryReused, "record set unchanged");
            return Ok(());
        }

        if !records.rejected().is_empty() {
            let quoted: Vec<String> = records
                .rejected()
                .iter()
                .take(MAX_QUOTED_REJECTIONS)
                .map(|r| format!("row {}: {}", r.row, r.reason))
                .collect();
            state.record(
                TraceKind::RowsRejected,
                format!(
                    "{} of {} rows rejected ({})",
                    records.rejected().len(),
                    records.total_rows(),
                    quoted.join("; ")
                ),
            );
        }
        records.check_integrity(self.config.max_rejected_fraction)?;

        let summary: DataSummary = self
            .guarded(&self.summarizer, records.clone(), token, deadline)
            .await?;
        state.record(
            TraceKind::SummaryComputed,
            format!(
                "{} valid rows, {} anomalies, {} trends",
                summary.valid_rows,
                summary.anomalies.len(),
                summary.trends.len()
            ),
        );
        state.summary_fingerprint = Some(summary.source_fingerprint);
        state.summary = Some(Arc::new(summary));
        Ok(())
    }

    async fn hypothesize(
        &self,
        state: &mut RunState,
        token: &CancellationToken,
        deadline: Instant,
    ) -> AppResult<()> {
        let (Some(plan), Some(summary)) = (&state.plan, &state.summary) else {
            return Err(AppError::internal("hypothesizing without a plan and summary"));
        };
        let request = ProposalRequest {
            summary: summary.clone(),
            query: state.query.clone(),
            focus: plan.focus.clone(),
            target: plan.hypothesis_target,
            iteration: state.iteration,
            tested: state.tested_keys(),
        };

        let proposal = self.guarded(&self.engine, request, token, deadline).await?;

        for candidate in proposal.discarded {
            state.record(TraceKind::HypothesisDiscarded, candidate.reason.clone());
            state.discarded.push(candidate);
        }
        for duplicate in proposal.duplicates {
            state.record(
                TraceKind::DuplicateSkipped,
                format!("already tested: {}", duplicate),
            );
        }
        info!(
            run_id = %state.run_id,
            iteration = state.iteration,
            proposed = proposal.hypotheses.len(),
            "[Orchestrator] Hypotheses proposed"
        );
        state.hypotheses.extend(proposal.hypotheses);
        Ok(())
    }

    async fn validate(
        &self,
        state: &mut RunState,
        records: &Arc<RecordSet>,
        token: &CancellationToken,
        deadline: Instant,
    ) -> AppResult<()> {
        let pending: Vec<_> = state
            .hypotheses
            .iter()
            .filter(|h| h.status == HypothesisStatus::Proposed)
            .cloned()
            .collect();

        let tested = self
            .guarded(self.engine.tester(), (pending, records.clone()), token, deadline)
            .await?;

        for hypothesis in tested {
            if let Some(result) = &hypothesis.validation {
                if result.insufficient_data {
                    let note = AppError::insufficient_data(format!(
                        "{} ({}): n_a={}, n_b={}",
                        hypothesis.id,
                        hypothesis.describe_groups(),
                        result.n_a,
                        result.n_b
                    ));
                    state.record(TraceKind::InsufficientData, note.to_string());
                }
                state.record(
                    TraceKind::HypothesisTested,
                    format!("{}: {}", hypothesis.id, result.verdict),
                );
            }
            if let Some(slot) = state.hypotheses.iter_mut().find(|h| h.id == hypothesis.id) {
                *slot = hypothesis;
            }
        }
        Ok(())
    }

    /// Why the run should replan after this validation, if it should.
    fn replan_reason(&self, state: &RunState) -> Option<ReplanReason> {
        let validated = state.validated_count();
        let below_minimum = validated < self.config.min_validated_insights;
        let missing_critical = self
            .config
            .critical_dimensions
            .iter()
            .copied()
            .find(|d| !state.validated().any(|h| h.dimension == *d));

        if !below_minimum && missing_critical.is_none() {
            return None;
        }

        let mut current = state.current_iteration().peekable();
        let all_rejected = current.peek().is_some()
            && current.all(|h| h.status == HypothesisStatus::Rejected);

        if all_rejected {
            Some(ReplanReason::AllRejected)
        } else if below_minimum {
            Some(ReplanReason::InsufficientValidated)
        } else {
            missing_critical.map(ReplanReason::DimensionUnexplored)
        }
    }

    /// Revise the plan, or fall through to recommending when the iteration
    /// limit is hit or the plan has nothing left to try.
    async fn replan(
        &self,
        state: &mut RunState,
        token: &CancellationToken,
        deadline: Instant,
    ) -> AppResult<OrchestratorPhase> {
        let reason = state
            .pending_replan
            .take()
            .ok_or_else(|| AppError::internal("replanning without a reason"))?;

        if state.iteration >= self.config.max_replans {
            state.max_iterations_reached = true;
            state.record(
                TraceKind::ForcedRecommendation,
                format!(
                    "{} after {} replans; max_replans reached",
                    reason, state.iteration
                ),
            );
            return Ok(OrchestratorPhase::Recommending);
        }

        let Some(plan) = state.plan.clone() else {
            return Err(AppError::internal("replanning without a plan"));
        };
        let feedback = PlanFeedback {
            reason,
            covered_dimensions: state.covered_dimensions(),
            validated_so_far: state.validated_count(),
        };
        let command = PlanCommand::Revise {
            plan: Box::new(plan),
            feedback,
        };

        match self.guarded(&self.planner, command, token, deadline).await? {
            PlanRevisionOutcome::Exhausted => {
                state.plan_exhausted = true;
                state.record(
                    TraceKind::ForcedRecommendation,
                    format!("{}; plan has no revision options left", reason),
                );
                Ok(OrchestratorPhase::Recommending)
            }
            PlanRevisionOutcome::Revised(revised) => {
                let discarded = state.discard_current();
                let detail = revised
                    .history
                    .last()
                    .map(|r| r.rationale.clone())
                    .unwrap_or_else(|| reason.to_string());
                state.replans.push(ReplanRecord {
                    iteration: state.iteration,
                    reason,
                    detail: format!("{} ({} hypotheses discarded)", detail, discarded),
                });
                if let Some(previous) = state.plan.replace(revised) {
                    state.plan_history.push(previous);
                }
                state.iteration += 1;
                Ok(OrchestratorPhase::Planning)
            }
        }
    }

    async fn recommend(
        &self,
        state: &mut RunState,
        records: &Arc<RecordSet>,
        token: &CancellationToken,
        deadline: Instant,
    ) -> AppResult<AnalysisReport> {
        let Some(summary) = state.summary.clone() else {
            return Err(AppError::internal("recommending without a summary"));
        };
        let hypotheses_tested = state.tested_count();
        let input = RecommendationInput {
            query: state.query.clone(),
            hypotheses: state.validated().cloned().collect(),
            hypotheses_tested,
            summary: summary.clone(),
            records: records.clone(),
        };

        let set = self
            .guarded(&self.recommender, input, token, deadline)
            .await?;
        state.insights = set.insights.clone();

        let hypotheses_validated = state.validated_count();
        let metadata = RunMetadata {
            run_id: state.run_id.clone(),
            iterations: state.iteration,
            replans: state.replans.clone(),
            rejected_rows: summary.rejected_rows,
            final_phase: OrchestratorPhase::Done,
            max_iterations_reached: state.max_iterations_reached,
            plan_exhausted: state.plan_exhausted,
            hypotheses_tested,
            hypotheses_validated,
            validation_success_rate: if hypotheses_tested == 0 {
                0.0
            } else {
                hypotheses_validated as f64 / hypotheses_tested as f64
            },
            discarded_candidates: state.discarded.clone(),
            plan_revisions: state.plan.as_ref().map(|p| p.revision).unwrap_or(0),
        };

        Ok(AnalysisReport {
            report_id: uuid::Uuid::new_v4().to_string(),
            generated_at: Utc::now(),
            query: state.query.clone(),
            executive_summary: set.executive_summary,
            insights: set.insights,
            recommendations: set.recommendations,
            data_summary: (*summary).clone(),
            metadata,
        })
    }
}
