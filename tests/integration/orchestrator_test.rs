//! Orchestrator Integration Tests
//!
//! Full runs over the fixture campaign set with scripted hypothesis rounds.

use std::sync::Arc;

use insight_cascade::models::{HypothesisStatus, RecommendationType};
use insight_cascade::services::orchestrator::TraceKind;
use insight_cascade::services::plan_mode::ReplanReason;
use insight_cascade::{
    AnalysisConfig, Dimension, Orchestrator, OrchestratorPhase, ScriptedProvider,
};
use serde_json::json;

use crate::fixtures::{
    batch, campaign_rows, creative_hypothesis, hypothesis, offline_config, rejected_round, QUERY,
};

fn has_trace(outcome: &insight_cascade::RunOutcome, kind: TraceKind) -> bool {
    outcome.state.trace.iter().any(|e| e.kind == kind)
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_validated_creative_insight_reaches_report() {
    let narration = json!({
        "recommendations": [{
            "id": "rec-1",
            "title": "Shift budget to Image ads",
            "action": "Move 20% of Video budget to Image creatives",
            "rationale": "Image ads return twice the ROAS of Video",
            "implementation_steps": ["Duplicate top Image ad sets", "Cap Video spend"]
        }],
        "executive_summary": "Image creatives clearly outperform Video."
    });
    let provider = Arc::new(
        ScriptedProvider::new(vec![])
            .with_kind(
                "hypotheses",
                vec![Ok(batch(vec![
                    creative_hypothesis(),
                    hypothesis("device", "roas", "mobile", "desktop"),
                ]))],
            )
            .with_kind("recommendations", vec![Ok(narration.to_string())]),
    );
    let config = AnalysisConfig {
        min_validated_insights: 1,
        narrate_recommendations: true,
        ..offline_config()
    };
    let orchestrator = Orchestrator::new(config, provider.clone()).unwrap();

    let outcome = orchestrator.run(QUERY, &campaign_rows()).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    let report = outcome.report.as_ref().unwrap();
    assert_eq!(report.query, QUERY);
    assert_eq!(report.executive_summary, "Image creatives clearly outperform Video.");

    assert_eq!(report.insights.len(), 1);
    let insight = &report.insights[0];
    assert_eq!(insight.dimension, Dimension::CreativeType);
    assert_eq!(insight.winner, "Image");
    assert_eq!(insight.loser, "Video");
    assert!(insight.confidence > 0.8);

    assert_eq!(report.recommendations.len(), 1);
    let rec = &report.recommendations[0];
    assert_eq!(rec.recommendation_type, RecommendationType::ScaleCreative);
    assert_eq!(rec.target_segment, "Image");
    assert_eq!(rec.title, "Shift budget to Image ads");
    assert_eq!(rec.implementation_steps.len(), 2);

    let meta = &report.metadata;
    assert_eq!(meta.final_phase, OrchestratorPhase::Done);
    assert_eq!(meta.iterations, 0);
    assert_eq!(meta.hypotheses_tested, 1);
    assert_eq!(meta.hypotheses_validated, 1);
    assert_eq!(meta.discarded_candidates.len(), 1);
    assert!(meta.discarded_candidates[0].reason.contains("unknown dimension 'device'"));
    assert!(!meta.max_iterations_reached);

    assert_eq!(report.data_summary.valid_rows, 80);
    assert_eq!(report.data_summary.rejected_rows, 0);
    assert!(has_trace(&outcome, TraceKind::HypothesisDiscarded));
    assert_eq!(provider.request_count(), 2);
}

#[tokio::test]
async fn test_run_states_are_isolated() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(batch(vec![creative_hypothesis()])),
        Ok(batch(vec![creative_hypothesis()])),
    ]));
    let config = AnalysisConfig {
        min_validated_insights: 1,
        ..offline_config()
    };
    let orchestrator = Orchestrator::new(config, provider).unwrap();
    let rows = campaign_rows();

    let first = orchestrator.run(QUERY, &rows).await;
    let second = orchestrator.run(QUERY, &rows).await;

    assert!(first.is_success() && second.is_success());
    assert_ne!(first.state.run_id, second.state.run_id);
    assert_eq!(first.state.hypotheses.len(), 1);
    assert_eq!(second.state.hypotheses.len(), 1);
    assert_eq!(second.state.hypotheses[0].id, "it0-h1");
}

// ============================================================================
// Replanning
// ============================================================================

#[tokio::test]
async fn test_all_rejected_explores_new_dimension() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(rejected_round()),
        Ok(batch(vec![
            hypothesis("platform", "roas", "facebook", "instagram"),
            creative_hypothesis(),
        ])),
    ]));
    let config = AnalysisConfig {
        min_validated_insights: 1,
        ..offline_config()
    };
    let orchestrator = Orchestrator::new(config, provider).unwrap();

    let outcome = orchestrator.run(QUERY, &campaign_rows()).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    let state = &outcome.state;
    assert_eq!(state.iteration, 1);
    assert_eq!(state.replans.len(), 1);
    assert_eq!(state.replans[0].reason, ReplanReason::AllRejected);
    assert_eq!(state.replans[0].iteration, 0);

    // The first plan only explored creative_type; the revision moves on
    // to a dimension no hypothesis has touched yet.
    let first_plan = &state.plan_history[0];
    assert_eq!(first_plan.explored_dimensions, vec![Dimension::CreativeType]);
    let plan = state.plan.as_ref().unwrap();
    assert_eq!(plan.revision, 1);
    assert_eq!(plan.focus, vec![Dimension::AudienceType]);
    assert!(plan.step("explore-audience_type").is_some());

    // Round one was discarded by the replan; the repeated platform
    // comparison was skipped instead of being tested again.
    assert_eq!(state.count_with_status(HypothesisStatus::Discarded), 4);
    assert_eq!(state.count_with_status(HypothesisStatus::Validated), 1);
    assert!(has_trace(&outcome, TraceKind::DuplicateSkipped));
    assert!(has_trace(&outcome, TraceKind::SummaryReused));
    assert!(has_trace(&outcome, TraceKind::PlanRevised));
}

#[tokio::test]
async fn test_max_replans_forces_recommending() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(rejected_round()),
        Ok(batch(vec![hypothesis("platform", "cpc", "facebook", "instagram")])),
        Ok(batch(vec![hypothesis("country", "conversion_rate", "US", "UK")])),
    ]));
    let orchestrator = Orchestrator::new(offline_config(), provider.clone()).unwrap();

    let outcome = orchestrator.run(QUERY, &campaign_rows()).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    let report = outcome.report.as_ref().unwrap();
    assert!(report.metadata.max_iterations_reached);
    assert!(!report.metadata.plan_exhausted);
    assert_eq!(report.metadata.iterations, 2);
    assert_eq!(report.metadata.replans.len(), 2);
    assert!(report
        .metadata
        .replans
        .iter()
        .all(|r| r.reason == ReplanReason::AllRejected));
    assert_eq!(report.metadata.hypotheses_tested, 6);
    assert_eq!(report.metadata.hypotheses_validated, 0);
    assert_eq!(report.metadata.validation_success_rate, 0.0);
    assert!(report.insights.is_empty());
    assert!(report.recommendations.is_empty());
    assert!(report.executive_summary.contains("No difference"));
    assert!(has_trace(&outcome, TraceKind::ForcedRecommendation));
    assert_eq!(provider.request_count(), 3);
}

#[tokio::test]
async fn test_critical_dimension_pins_revision() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(batch(vec![creative_hypothesis()])),
        Ok(batch(vec![hypothesis("country", "roas", "US", "UK")])),
    ]));
    let config = AnalysisConfig {
        min_validated_insights: 1,
        critical_dimensions: vec![Dimension::Country],
        max_replans: 1,
        // Guidance is never consulted for a pinned dimension.
        guided_replanning: true,
        ..offline_config()
    };
    let orchestrator = Orchestrator::new(config, provider.clone()).unwrap();

    let outcome = orchestrator.run(QUERY, &campaign_rows()).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    let state = &outcome.state;
    assert_eq!(
        state.replans[0].reason,
        ReplanReason::DimensionUnexplored(Dimension::Country)
    );
    let plan = state.plan.as_ref().unwrap();
    assert_eq!(plan.focus, vec![Dimension::Country]);
    assert!(plan.step("explore-country").is_some());
    assert!(state.max_iterations_reached);
    assert_eq!(provider.request_count(), 2);

    let report = outcome.report.unwrap();
    assert_eq!(report.insights.len(), 1);
}
