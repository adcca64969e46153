//! Plan Manager
//!
//! Creates the initial analysis plan from the user's question and revises it
//! when validation falls short. Every revision spends one option from a
//! finite set (unexplored dimensions plus a fixed number of broadenings), so
//! the feedback loop always terminates.
//!
//! When guided replanning is on, the completion service may suggest which
//! dimension to explore next. The suggestion is a single best-effort request;
//! it is only followed when it names one of the offered candidates.

use std::sync::Arc;

use async_trait::async_trait;
use insight_cascade_core::{AnalysisConfig, Dimension};
use insight_cascade_llm::{request_structured, LlmProvider, RetryPolicy, StructuredRequest};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::types::{
    calculate_plan_batches, explore_step_id, PlanFeedback, PlanRevision, PlanStep, ReplanReason,
    RevisionChange, StepKind, TaskPlan, BROADEN_STEP, GENERATE_STEP, RECOMMEND_STEP,
    SUMMARIZE_STEP, VALIDATE_STEP,
};
use crate::services::orchestrator::stage::{Stage, StageKind};
use crate::utils::error::AppResult;

pub const PLAN_REVISION_KIND: &str = "plan_revision";

/// Broadening steps a plan may take over its lifetime.
pub const MAX_BROADENINGS: u32 = 2;
/// Extra hypotheses per round added by one broadening.
pub const BROADEN_INCREMENT: usize = 2;

const REVISION_SYSTEM_PROMPT: &str = "You are planning the next round of an advertising \
performance analysis. Pick the single dimension most likely to yield a statistically \
significant difference, choosing only from the candidates offered.";

/// Completion-service advice on which dimension to explore.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RevisionSuggestion {
    /// One of the candidate dimensions, or null for no preference.
    #[serde(default)]
    pub dimension: Option<String>,
    #[serde(default)]
    pub rationale: String,
}

/// Result of a revision request.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanRevisionOutcome {
    Revised(TaskPlan),
    /// No revision options are left.
    Exhausted,
}

/// Input of the planner stage.
#[derive(Debug, Clone)]
pub enum PlanCommand {
    Create { query: String },
    Revise { plan: Box<TaskPlan>, feedback: PlanFeedback },
}

/// Dimensions with a keyword starting some word of the query, in
/// exploration order.
pub fn infer_focus(query: &str) -> Vec<Dimension> {
    let query = query.to_lowercase();
    let words: Vec<&str> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    Dimension::ALL
        .into_iter()
        .filter(|d| {
            d.keywords()
                .iter()
                .any(|k| words.iter().any(|w| w.starts_with(*k)))
        })
        .collect()
}

#[derive(Clone)]
pub struct PlanManager {
    provider: Option<Arc<dyn LlmProvider>>,
    policy: RetryPolicy,
    hypothesis_target: usize,
}

impl PlanManager {
    /// A manager that revises without consulting the completion service.
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            provider: None,
            // Revision never retries
            policy: RetryPolicy {
                max_attempts: 1,
                ..RetryPolicy::from(config)
            },
            hypothesis_target: config.hypotheses_per_round,
        }
    }

    /// A manager that asks `provider` which dimension to explore next.
    pub fn guided(config: &AnalysisConfig, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider: Some(provider),
            ..Self::new(config)
        }
    }

    /// Build the revision-0 plan for `query`.
    pub fn create_plan(&self, query: &str) -> AppResult<TaskPlan> {
        let focus = infer_focus(query);

        let mut steps = vec![PlanStep::new(SUMMARIZE_STEP, StepKind::Summarize, "Summarize data")
            .with_description("Aggregate metrics per segment, flag anomalies and trends")];
        let mut generate_deps = vec![SUMMARIZE_STEP.to_string()];
        for dimension in &focus {
            let id = explore_step_id(*dimension);
            steps.push(
                PlanStep::new(
                    &id,
                    StepKind::ExploreDimension(*dimension),
                    format!("Explore {}", dimension),
                )
                .depends_on(&[SUMMARIZE_STEP]),
            );
            generate_deps.push(id);
        }
        let mut generate = PlanStep::new(
            GENERATE_STEP,
            StepKind::GenerateHypotheses,
            "Generate hypotheses",
        )
        .with_description(format!("Propose {} testable comparisons", self.hypothesis_target));
        generate.dependencies = generate_deps;
        steps.push(generate);
        steps.push(
            PlanStep::new(VALIDATE_STEP, StepKind::Validate, "Validate hypotheses")
                .depends_on(&[GENERATE_STEP]),
        );
        steps.push(
            PlanStep::new(RECOMMEND_STEP, StepKind::Recommend, "Recommend actions")
                .depends_on(&[VALIDATE_STEP]),
        );

        let batches = calculate_plan_batches(&steps)?;
        let plan = TaskPlan {
            id: uuid::Uuid::new_v4().to_string(),
            query: query.to_string(),
            revision: 0,
            steps,
            batches,
            focus: focus.clone(),
            explored_dimensions: focus,
            hypothesis_target: self.hypothesis_target,
            broadenings_left: MAX_BROADENINGS,
            history: Vec::new(),
        };

        info!(
            plan_id = %plan.id,
            steps = plan.steps.len(),
            focus = ?plan.focus,
            "[Plan] Initial plan created"
        );
        Ok(plan)
    }

    /// Produce the next revision of `plan` in response to `feedback`.
    pub async fn revise(
        &self,
        plan: &TaskPlan,
        feedback: &PlanFeedback,
    ) -> AppResult<PlanRevisionOutcome> {
        let Some(mut change) = choose_change(plan, feedback) else {
            info!(plan_id = %plan.id, "[Plan] No revision options left");
            return Ok(PlanRevisionOutcome::Exhausted);
        };

        let mut rationale = format!("{} after revision {}", feedback.reason, plan.revision);
        if let RevisionChange::ExploreDimension { dimension } = change {
            let pinned = feedback.reason == ReplanReason::DimensionUnexplored(dimension);
            if !pinned {
                if let Some((suggested, note)) = self.suggest(plan, feedback, dimension).await {
                    if suggested != dimension {
                        debug!(from = %dimension, to = %suggested, "[Plan] Following suggestion");
                    }
                    change = RevisionChange::ExploreDimension {
                        dimension: suggested,
                    };
                    rationale = note;
                }
            }
        }

        let revised = apply_change(plan, feedback.reason, change, rationale)?;
        info!(
            plan_id = %revised.id,
            revision = revised.revision,
            reason = %feedback.reason,
            change = ?change,
            options_left = revised.remaining_options(),
            "[Plan] Plan revised"
        );
        Ok(PlanRevisionOutcome::Revised(revised))
    }

    /// Ask for a dimension to explore instead of `default`. Returns `None`
    /// when there is nothing to choose between, guidance is off, or the
    /// advice is unusable.
    ///
    /// When `default` has no tested hypotheses yet, dimensions that already
    /// do are not offered.
    async fn suggest(
        &self,
        plan: &TaskPlan,
        feedback: &PlanFeedback,
        default: Dimension,
    ) -> Option<(Dimension, String)> {
        let provider = self.provider.as_ref()?;
        let uncovered_only = !feedback.covered_dimensions.contains(&default);
        let candidates: Vec<Dimension> = plan
            .unexplored()
            .into_iter()
            .filter(|d| !uncovered_only || !feedback.covered_dimensions.contains(d))
            .collect();
        if candidates.len() < 2 {
            return None;
        }

        let names: Vec<&str> = candidates.iter().map(Dimension::as_str).collect();
        let covered: Vec<&str> = feedback
            .covered_dimensions
            .iter()
            .map(Dimension::as_str)
            .collect();
        let request = StructuredRequest {
            kind: PLAN_REVISION_KIND,
            system: REVISION_SYSTEM_PROMPT.to_string(),
            prompt: format!(
                "## Question\n{}\n\n## Situation\nReplan reason: {}\nValidated hypotheses so far: {}\n\
                 Dimensions already tested: {}\n\n## Candidates\n{}",
                plan.query,
                feedback.reason,
                feedback.validated_so_far,
                if covered.is_empty() { "none".to_string() } else { covered.join(", ") },
                names.join(", ")
            ),
        };

        let suggestion: RevisionSuggestion = match request_structured(
            provider.as_ref(),
            &self.policy,
            &request,
            |_| Ok(()),
        )
        .await
        {
            Ok(suggestion) => suggestion,
            Err(e) => {
                warn!("[Plan] Revision guidance unavailable, using default order: {}", e);
                return None;
            }
        };

        let dimension: Dimension = suggestion.dimension.as_deref()?.parse().ok()?;
        if !candidates.contains(&dimension) {
            warn!(
                suggested = %dimension,
                "[Plan] Suggested dimension is not a candidate, ignoring"
            );
            return None;
        }
        let note = if suggestion.rationale.trim().is_empty() {
            format!("{}: explore {} as suggested", feedback.reason, dimension)
        } else {
            format!("{}: {}", feedback.reason, suggestion.rationale.trim())
        };
        Some((dimension, note))
    }
}

/// Deterministic choice of the next change, with the fallback order each
/// reason prescribes. `None` when the option set is empty.
fn choose_change(plan: &TaskPlan, feedback: &PlanFeedback) -> Option<RevisionChange> {
    let unexplored = plan.unexplored();
    let uncovered = unexplored
        .iter()
        .copied()
        .find(|d| !feedback.covered_dimensions.contains(d));
    let any_unexplored = unexplored.first().copied();
    let explore = |d: Dimension| RevisionChange::ExploreDimension { dimension: d };
    let broaden = (plan.broadenings_left > 0).then(|| RevisionChange::Broaden {
        hypothesis_target: plan.hypothesis_target + BROADEN_INCREMENT,
    });

    match feedback.reason {
        ReplanReason::AllRejected => uncovered
            .map(explore)
            .or(broaden)
            .or_else(|| any_unexplored.map(explore)),
        ReplanReason::InsufficientValidated => broaden
            .or_else(|| uncovered.map(explore))
            .or_else(|| any_unexplored.map(explore)),
        ReplanReason::DimensionUnexplored(d) => unexplored
            .contains(&d)
            .then(|| explore(d))
            .or_else(|| uncovered.map(explore))
            .or_else(|| any_unexplored.map(explore))
            .or(broaden),
    }
}

fn apply_change(
    plan: &TaskPlan,
    reason: ReplanReason,
    change: RevisionChange,
    rationale: String,
) -> AppResult<TaskPlan> {
    let mut next = plan.clone();
    next.revision += 1;

    let step = match change {
        RevisionChange::ExploreDimension { dimension } => {
            next.explored_dimensions.push(dimension);
            next.focus = vec![dimension];
            PlanStep::new(
                explore_step_id(dimension),
                StepKind::ExploreDimension(dimension),
                format!("Explore {}", dimension),
            )
            .with_description(format!("Revision {}: {}", next.revision, reason))
        }
        RevisionChange::Broaden { hypothesis_target } => {
            let ordinal = MAX_BROADENINGS - next.broadenings_left + 1;
            next.broadenings_left -= 1;
            next.hypothesis_target = hypothesis_target;
            next.focus = Vec::new();
            let id = if ordinal == 1 {
                BROADEN_STEP.to_string()
            } else {
                format!("{}-{}", BROADEN_STEP, ordinal)
            };
            PlanStep::new(id, StepKind::BroadenHypotheses, "Broaden hypotheses")
                .with_description(format!(
                    "Revision {}: {}; target {} hypotheses",
                    next.revision, reason, hypothesis_target
                ))
        }
    }
    .depends_on(&[SUMMARIZE_STEP])
    .in_revision(next.revision);

    if let Some(generate) = next.steps.iter_mut().find(|s| s.id == GENERATE_STEP) {
        generate.dependencies.push(step.id.clone());
    }
    next.steps.push(step);
    next.batches = calculate_plan_batches(&next.steps)?;
    next.history.push(PlanRevision {
        revision: next.revision,
        reason,
        change,
        rationale,
    });
    Ok(next)
}

#[async_trait]
impl Stage for PlanManager {
    type Input = PlanCommand;
    type Output = PlanRevisionOutcome;

    fn kind(&self) -> StageKind {
        StageKind::Planner
    }

    /// `Create` always yields `Revised` holding the revision-0 plan.
    async fn run(&self, input: Self::Input) -> AppResult<Self::Output> {
        match input {
            PlanCommand::Create { query } => {
                self.create_plan(&query).map(PlanRevisionOutcome::Revised)
            }
            PlanCommand::Revise { plan, feedback } => self.revise(&plan, &feedback).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use insight_cascade_llm::ScriptedProvider;

    use super::*;

    fn manager() -> PlanManager {
        PlanManager::new(&AnalysisConfig::default())
    }

    fn feedback(reason: ReplanReason, covered: &[Dimension]) -> PlanFeedback {
        PlanFeedback {
            reason,
            covered_dimensions: covered.to_vec(),
            validated_so_far: 0,
        }
    }

    fn revised(outcome: PlanRevisionOutcome) -> TaskPlan {
        match outcome {
            PlanRevisionOutcome::Revised(plan) => plan,
            PlanRevisionOutcome::Exhausted => panic!("expected a revised plan"),
        }
    }

    #[test]
    fn test_infer_focus_from_keywords() {
        assert_eq!(
            infer_focus("Which creative formats perform best?"),
            vec![Dimension::CreativeType]
        );
        assert_eq!(
            infer_focus("Compare Instagram performance across countries"),
            vec![Dimension::Platform, Dimension::Country]
        );
        assert!(infer_focus("Why did sales drop?").is_empty());
        assert!(infer_focus("overall performance").is_empty());
    }

    #[test]
    fn test_initial_plan_shape() {
        let plan = manager().create_plan("Which creative performs best?").unwrap();
        assert_eq!(plan.revision, 0);
        assert_eq!(plan.explored_dimensions, vec![Dimension::CreativeType]);
        assert!(plan.step("explore-creative_type").is_some());
        assert_eq!(plan.batches.first().unwrap().step_ids, vec!["summarize"]);
        assert_eq!(plan.batches.last().unwrap().step_ids, vec!["recommend"]);
        assert_eq!(plan.remaining_options(), 3 + MAX_BROADENINGS as usize);
    }

    #[tokio::test]
    async fn test_all_rejected_explores_uncovered_dimension() {
        let plan = manager().create_plan("Which creative performs best?").unwrap();
        let next = revised(
            manager()
                .revise(
                    &plan,
                    &feedback(ReplanReason::AllRejected, &[Dimension::CreativeType, Dimension::AudienceType]),
                )
                .await
                .unwrap(),
        );

        assert_eq!(next.revision, 1);
        assert_eq!(next.focus, vec![Dimension::Platform]);
        assert!(next.explored_dimensions.contains(&Dimension::Platform));
        let step = next.step("explore-platform").unwrap();
        assert_eq!(step.added_in_revision, 1);
        assert!(next
            .step(GENERATE_STEP)
            .unwrap()
            .dependencies
            .contains(&"explore-platform".to_string()));
        assert_eq!(next.history.len(), 1);
        assert!(next.remaining_options() < plan.remaining_options());
    }

    #[tokio::test]
    async fn test_insufficient_validated_broadens() {
        let plan = manager().create_plan("overall performance").unwrap();
        let m = manager();
        let once = revised(
            m.revise(&plan, &feedback(ReplanReason::InsufficientValidated, &[]))
                .await
                .unwrap(),
        );
        assert_eq!(once.hypothesis_target, plan.hypothesis_target + BROADEN_INCREMENT);
        assert!(once.step(BROADEN_STEP).is_some());

        let twice = revised(
            m.revise(&once, &feedback(ReplanReason::InsufficientValidated, &[]))
                .await
                .unwrap(),
        );
        assert!(twice.step("broaden-hypotheses-2").is_some());
        assert_eq!(twice.broadenings_left, 0);

        // Out of broadenings, falls back to exploring
        let third = revised(
            m.revise(&twice, &feedback(ReplanReason::InsufficientValidated, &[]))
                .await
                .unwrap(),
        );
        assert_eq!(third.focus, vec![Dimension::CreativeType]);
    }

    #[tokio::test]
    async fn test_revisions_terminate_in_exhaustion() {
        let m = manager();
        let mut plan = m.create_plan("anything").unwrap();
        let mut options = plan.remaining_options();
        let mut revisions = 0;
        loop {
            match m
                .revise(&plan, &feedback(ReplanReason::AllRejected, &[]))
                .await
                .unwrap()
            {
                PlanRevisionOutcome::Revised(next) => {
                    assert!(next.remaining_options() < options);
                    options = next.remaining_options();
                    plan = next;
                    revisions += 1;
                }
                PlanRevisionOutcome::Exhausted => break,
            }
        }
        assert_eq!(revisions, Dimension::ALL.len() + MAX_BROADENINGS as usize);
        assert!(plan.is_exhausted());
    }

    #[tokio::test]
    async fn test_dimension_unexplored_is_pinned() {
        let provider = Arc::new(ScriptedProvider::new(vec![]).with_kind(
            PLAN_REVISION_KIND,
            vec![Ok(r#"{"dimension": "platform", "rationale": "placements vary"}"#.into())],
        ));
        let m = PlanManager::guided(&AnalysisConfig::default(), provider.clone());
        let plan = m.create_plan("creative").unwrap();

        let next = revised(
            m.revise(
                &plan,
                &feedback(ReplanReason::DimensionUnexplored(Dimension::Country), &[]),
            )
            .await
            .unwrap(),
        );
        assert_eq!(next.focus, vec![Dimension::Country]);
        assert_eq!(provider.request_count(), 0);
    }

    #[tokio::test]
    async fn test_guidance_followed_when_unexplored() {
        let provider = Arc::new(ScriptedProvider::new(vec![]).with_kind(
            PLAN_REVISION_KIND,
            vec![Ok(r#"{"dimension": "country", "rationale": "geo spread is wide"}"#.into())],
        ));
        let m = PlanManager::guided(&AnalysisConfig::default(), provider.clone());
        let plan = m.create_plan("creative").unwrap();

        let next = revised(
            m.revise(&plan, &feedback(ReplanReason::AllRejected, &[]))
                .await
                .unwrap(),
        );
        assert_eq!(next.focus, vec![Dimension::Country]);
        assert!(next.history[0].rationale.contains("geo spread is wide"));
    }

    #[tokio::test]
    async fn test_guidance_ignored_when_explored_or_failing() {
        let provider = Arc::new(ScriptedProvider::new(vec![]).with_kind(
            PLAN_REVISION_KIND,
            vec![Ok(r#"{"dimension": "creative_type", "rationale": "again"}"#.into())],
        ));
        let m = PlanManager::guided(&AnalysisConfig::default(), provider.clone());
        let plan = m.create_plan("creative").unwrap();

        let next = revised(
            m.revise(&plan, &feedback(ReplanReason::AllRejected, &[]))
                .await
                .unwrap(),
        );
        assert_eq!(next.focus, vec![Dimension::AudienceType]);

        // Empty queue: guidance fails, default order still applies
        let after = revised(
            m.revise(&next, &feedback(ReplanReason::AllRejected, &[]))
                .await
                .unwrap(),
        );
        assert_eq!(after.focus, vec![Dimension::Platform]);
        assert_eq!(provider.request_count(), 2);
    }

    #[tokio::test]
    async fn test_guidance_cannot_revisit_rejected_dimension() {
        let provider = Arc::new(ScriptedProvider::new(vec![]).with_kind(
            PLAN_REVISION_KIND,
            vec![Ok(r#"{"dimension": "platform", "rationale": "try placements"}"#.into())],
        ));
        let m = PlanManager::guided(&AnalysisConfig::default(), provider.clone());
        let plan = m.create_plan("creative").unwrap();

        let next = revised(
            m.revise(
                &plan,
                &feedback(
                    ReplanReason::AllRejected,
                    &[Dimension::CreativeType, Dimension::Platform],
                ),
            )
            .await
            .unwrap(),
        );

        assert_eq!(next.focus, vec![Dimension::AudienceType]);
        assert!(!next.explored_dimensions.contains(&Dimension::Platform));
        assert_eq!(provider.request_count(), 1);
        let prompt = provider.requests()[0].last_message().to_string();
        let candidates = prompt
            .split("## Candidates")
            .nth(1)
            .and_then(|rest| rest.split("Respond with").next())
            .unwrap();
        assert!(!candidates.contains("platform"));
        assert!(candidates.contains("audience_type"));
    }
}
