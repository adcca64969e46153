//! Resilience Integration Tests
//!
//! Malformed input, unusable completions, cancellation and the run budget.

use std::sync::Arc;
use std::time::Duration;

use insight_cascade::services::orchestrator::TraceKind;
use insight_cascade::{AnalysisConfig, LlmError, Orchestrator, OrchestratorPhase, ScriptedProvider};
use tokio_util::sync::CancellationToken;

use crate::fixtures::{batch, campaign_rows, creative_hypothesis, offline_config, QUERY};

fn single_round_config() -> AnalysisConfig {
    AnalysisConfig {
        min_validated_insights: 1,
        ..offline_config()
    }
}

fn with_bad_rows(count: usize) -> Vec<insight_cascade::RawAdRow> {
    let mut rows = campaign_rows();
    for i in 0..count {
        let mut bad = rows[i].clone();
        bad.spend = "n/a".to_string();
        rows.push(bad);
    }
    rows
}

// ============================================================================
// Input Integrity
// ============================================================================

#[tokio::test]
async fn test_few_bad_rows_are_reported_and_skipped() {
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(batch(vec![
        creative_hypothesis(),
    ]))]));
    let orchestrator = Orchestrator::new(single_round_config(), provider).unwrap();

    let outcome = orchestrator.run(QUERY, &with_bad_rows(5)).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    let report = outcome.report.as_ref().unwrap();
    assert_eq!(report.data_summary.total_rows, 85);
    assert_eq!(report.data_summary.valid_rows, 80);
    assert_eq!(report.metadata.rejected_rows, 5);
    let rejected = outcome
        .state
        .trace
        .iter()
        .find(|e| e.kind == TraceKind::RowsRejected)
        .unwrap();
    assert!(rejected.message.contains("5 of 85 rows rejected"));
    assert!(rejected.message.contains("spend is not numeric"));
}

#[tokio::test]
async fn test_too_many_bad_rows_fail_before_any_completion() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let orchestrator = Orchestrator::new(single_round_config(), provider.clone()).unwrap();

    let outcome = orchestrator.run(QUERY, &with_bad_rows(40)).await;

    assert_eq!(outcome.phase, OrchestratorPhase::Failed);
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.phase, OrchestratorPhase::Summarizing);
    assert!(failure.error.contains("Data integrity error"));
    assert_eq!(provider.request_count(), 0);
}

// ============================================================================
// Completion Failures
// ============================================================================

#[tokio::test]
async fn test_unparseable_reply_repaired_within_budget() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok("Here are some ideas: Image ads look strong.".to_string()),
        Ok(batch(vec![creative_hypothesis()])),
    ]));
    let orchestrator = Orchestrator::new(single_round_config(), provider.clone()).unwrap();

    let outcome = orchestrator.run(QUERY, &campaign_rows()).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure);
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].response_kind.as_deref(), Some("hypotheses"));
    assert!(requests[1].last_message().contains("could not be used"));
    assert_eq!(outcome.report.unwrap().insights.len(), 1);
}

#[tokio::test]
async fn test_exhausted_repairs_fail_with_state_kept() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok("no".to_string()),
        Ok("still no".to_string()),
        Ok("{\"hypotheses\": 3}".to_string()),
    ]));
    let orchestrator = Orchestrator::new(single_round_config(), provider.clone()).unwrap();

    let outcome = orchestrator.run(QUERY, &campaign_rows()).await;

    assert_eq!(outcome.phase, OrchestratorPhase::Failed);
    assert!(outcome.report.is_none());
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.phase, OrchestratorPhase::Hypothesizing);
    assert!(failure.error.contains("Gave up after 3 attempts"));

    // Work done before the failure is still inspectable.
    assert!(outcome.state.plan.is_some());
    assert!(outcome.state.summary.is_some());
    assert!(outcome
        .state
        .trace
        .iter()
        .any(|e| e.kind == TraceKind::Failure));
    assert_eq!(provider.request_count(), 3);
}

#[tokio::test]
async fn test_non_retryable_error_fails_immediately() {
    let provider = Arc::new(ScriptedProvider::new(vec![Err(
        LlmError::AuthenticationFailed {
            message: "bad key".to_string(),
        },
    )]));
    let orchestrator = Orchestrator::new(single_round_config(), provider.clone()).unwrap();

    let outcome = orchestrator.run(QUERY, &campaign_rows()).await;

    assert_eq!(outcome.phase, OrchestratorPhase::Failed);
    assert!(outcome.failure.unwrap().error.contains("External service failure"));
    assert_eq!(provider.request_count(), 1);
}

// ============================================================================
// Cancellation and Budget
// ============================================================================

#[tokio::test]
async fn test_cancel_during_proposal() {
    let provider = Arc::new(
        ScriptedProvider::new(vec![Ok(batch(vec![creative_hypothesis()]))])
            .with_latency(Duration::from_secs(30)),
    );
    let orchestrator = Orchestrator::new(single_round_config(), provider.clone()).unwrap();
    let token = CancellationToken::new();

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let outcome = orchestrator
        .run_with_cancellation(QUERY, &campaign_rows(), token)
        .await;

    assert_eq!(outcome.phase, OrchestratorPhase::Cancelled);
    assert!(outcome.report.is_none());
    assert_eq!(
        outcome.failure.unwrap().phase,
        OrchestratorPhase::Hypothesizing
    );
    assert!(outcome.state.insights.is_empty());
    assert_eq!(provider.request_count(), 1);
}

#[tokio::test]
async fn test_run_budget_exceeded() {
    let provider = Arc::new(
        ScriptedProvider::new(vec![Ok(batch(vec![creative_hypothesis()]))])
            .with_latency(Duration::from_secs(30)),
    );
    let config = AnalysisConfig {
        run_timeout_secs: 1,
        ..single_round_config()
    };
    let orchestrator = Orchestrator::new(config, provider).unwrap();

    let outcome = orchestrator.run(QUERY, &campaign_rows()).await;

    assert_eq!(outcome.phase, OrchestratorPhase::Failed);
    let failure = outcome.failure.unwrap();
    assert_eq!(failure.phase, OrchestratorPhase::Hypothesizing);
    assert!(failure.error.contains("Timed out after 1s"));
}
