//! Hypothesis Engine
//!
//! Proposes hypotheses through the completion service and tests them against
//! the record set. Proposal output is checked candidate by candidate: a bad
//! candidate is dropped with its reason, never retried. Testing is pure and
//! runs on the blocking pool, bounded by a semaphore.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use insight_cascade_core::{AnalysisConfig, Dimension, Metric};
use insight_cascade_llm::{request_structured, LlmProvider, RetryPolicy, StructuredRequest};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::prompts::{proposal_prompt, HYPOTHESIS_SYSTEM_PROMPT};
use crate::models::{
    ComparisonGroup, ComparisonKey, DataSummary, DiscardedCandidate, Direction, Hypothesis,
    HypothesisStatus, RecordSet, ValidationResult,
};
use crate::services::orchestrator::stage::{Stage, StageKind};
use crate::services::stats::StatisticalValidator;
use crate::utils::error::{AppError, AppResult};

pub const HYPOTHESES_KIND: &str = "hypotheses";

/// Spellings of `group_b` meaning "every other segment".
const REST_ALIASES: [&str; 5] = ["rest", "others", "other", "all others", "all_others"];

/// One hypothesis as returned by the completion service.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HypothesisCandidate {
    /// Your own identifier for the hypothesis.
    #[serde(default)]
    pub id: Option<String>,
    /// One-sentence claim, e.g. "Image ads deliver higher ROAS than Video ads".
    pub statement: String,
    #[serde(default)]
    pub rationale: String,
    /// One of: creative_type, audience_type, platform, country.
    pub dimension: String,
    /// One of: roas, ctr, cpc, conversion_rate.
    pub metric: String,
    /// A segment of the dimension that appears in the data.
    pub group_a: String,
    /// Another segment of the same dimension, or omitted / "rest" for all others.
    #[serde(default)]
    pub group_b: Option<String>,
    /// increase, decrease, or change: expected movement of group_a relative to group_b.
    #[serde(default)]
    pub expected_direction: Option<String>,
}

/// The full proposal response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HypothesisBatch {
    pub hypotheses: Vec<HypothesisCandidate>,
    #[serde(default)]
    pub reasoning: String,
}

/// Everything one proposal round needs.
#[derive(Debug, Clone)]
pub struct ProposalRequest {
    pub summary: Arc<DataSummary>,
    pub query: String,
    pub focus: Vec<Dimension>,
    pub target: usize,
    pub iteration: u32,
    /// Comparisons tested in earlier iterations.
    pub tested: HashSet<ComparisonKey>,
}

/// Result of one proposal round.
#[derive(Debug, Clone, Default)]
pub struct Proposal {
    pub hypotheses: Vec<Hypothesis>,
    pub discarded: Vec<DiscardedCandidate>,
    /// Comparisons skipped because they were already tested.
    pub duplicates: Vec<String>,
    pub reasoning: String,
}

fn parse_direction(raw: Option<&str>) -> Direction {
    match raw.map(|s| s.trim().to_lowercase()).as_deref() {
        Some("increase" | "higher" | "up" | "greater") => Direction::Increase,
        Some("decrease" | "lower" | "down" | "less") => Direction::Decrease,
        _ => Direction::Change,
    }
}

fn describe_key(key: &ComparisonKey) -> String {
    format!(
        "{} on {}: {} vs {}",
        key.metric,
        key.dimension,
        key.group_a,
        key.group_b.label(key.dimension)
    )
}

/// Turn a candidate into a testable hypothesis, or explain why it is not one.
fn accept_candidate(
    candidate: &HypothesisCandidate,
    summary: &DataSummary,
    iteration: u32,
    id: String,
) -> Result<Hypothesis, String> {
    let dimension: Dimension = candidate
        .dimension
        .parse()
        .map_err(|_| format!("unknown dimension '{}'", candidate.dimension))?;
    let metric: Metric = candidate
        .metric
        .parse()
        .map_err(|_| format!("unknown metric '{}'", candidate.metric))?;
    if !summary.metric_available(metric) {
        return Err(format!("metric {} has no defined values in the data", metric));
    }

    let group_a = candidate.group_a.trim();
    if group_a.is_empty() {
        return Err("group_a is empty".to_string());
    }
    if summary.segment(dimension, group_a).is_none() {
        return Err(format!("segment '{}' not present in {}", group_a, dimension));
    }

    let group_b = match candidate.group_b.as_deref().map(str::trim) {
        None | Some("") => ComparisonGroup::Rest,
        Some(b) if b == group_a => {
            return Err(format!("group_b equals group_a ('{}')", b));
        }
        // A real segment wins over the complement spelling
        Some(b) if summary.segment(dimension, b).is_some() => {
            ComparisonGroup::Segment(b.to_string())
        }
        Some(b) if REST_ALIASES.contains(&b.to_lowercase().as_str()) => ComparisonGroup::Rest,
        Some(b) => {
            return Err(format!("segment '{}' not present in {}", b, dimension));
        }
    };
    if group_b == ComparisonGroup::Rest && summary.segments(dimension).len() < 2 {
        return Err(format!("{} has no segments besides '{}'", dimension, group_a));
    }

    let statement = match candidate.statement.trim() {
        "" => format!(
            "{} differs between {} and {}",
            metric,
            group_a,
            group_b.label(dimension)
        ),
        s => s.to_string(),
    };

    Ok(Hypothesis {
        id,
        source_id: candidate.id.clone(),
        iteration,
        statement,
        rationale: candidate.rationale.clone(),
        dimension,
        metric,
        group_a: group_a.to_string(),
        group_b,
        expected_direction: parse_direction(candidate.expected_direction.as_deref()),
        status: HypothesisStatus::Proposed,
        validation: None,
    })
}

/// Proposes hypotheses and tests them.
#[derive(Clone)]
pub struct HypothesisEngine {
    provider: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
    tester: HypothesisTester,
}

impl HypothesisEngine {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &AnalysisConfig) -> Self {
        Self {
            provider,
            policy: RetryPolicy::from(config),
            tester: HypothesisTester::from_config(config),
        }
    }

    pub fn tester(&self) -> &HypothesisTester {
        &self.tester
    }

    /// Ask the completion service for hypotheses and keep the testable ones.
    pub async fn propose(&self, request: &ProposalRequest) -> AppResult<Proposal> {
        let mut already_tested: Vec<String> = request.tested.iter().map(describe_key).collect();
        already_tested.sort();

        let structured = StructuredRequest {
            kind: HYPOTHESES_KIND,
            system: HYPOTHESIS_SYSTEM_PROMPT.to_string(),
            prompt: proposal_prompt(
                &request.summary,
                &request.query,
                &request.focus,
                request.target,
                &already_tested,
            ),
        };

        let batch: HypothesisBatch =
            request_structured(self.provider.as_ref(), &self.policy, &structured, |_| Ok(()))
                .await?;

        let mut proposal = Proposal {
            reasoning: batch.reasoning,
            ..Default::default()
        };
        let mut seen: HashSet<ComparisonKey> = HashSet::new();

        for (index, candidate) in batch.hypotheses.iter().enumerate() {
            let id = format!("it{}-h{}", request.iteration, proposal.hypotheses.len() + 1);
            match accept_candidate(candidate, &request.summary, request.iteration, id) {
                Ok(hypothesis) => {
                    let key = hypothesis.comparison_key();
                    if request.tested.contains(&key) || !seen.insert(key.clone()) {
                        debug!(comparison = %describe_key(&key), "[Hypothesis] Duplicate skipped");
                        proposal.duplicates.push(describe_key(&key));
                        continue;
                    }
                    proposal.hypotheses.push(hypothesis);
                }
                Err(reason) => {
                    let label = candidate
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("candidate-{}", index + 1));
                    let error = AppError::malformed_hypothesis(&label, &reason);
                    warn!(iteration = request.iteration, "[Hypothesis] {}", error);
                    proposal.discarded.push(DiscardedCandidate {
                        source_id: candidate.id.clone(),
                        iteration: request.iteration,
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            iteration = request.iteration,
            accepted = proposal.hypotheses.len(),
            discarded = proposal.discarded.len(),
            duplicates = proposal.duplicates.len(),
            "[Hypothesis] Proposal round finished"
        );
        Ok(proposal)
    }

    pub fn test(&self, hypothesis: &Hypothesis, records: &RecordSet) -> ValidationResult {
        self.tester.test(hypothesis, records)
    }
}

#[async_trait]
impl Stage for HypothesisEngine {
    type Input = ProposalRequest;
    type Output = Proposal;

    fn kind(&self) -> StageKind {
        StageKind::HypothesisProposer
    }

    async fn run(&self, input: Self::Input) -> AppResult<Self::Output> {
        self.propose(&input).await
    }
}

/// Tests hypotheses against records, concurrently when given a batch.
#[derive(Debug, Clone)]
pub struct HypothesisTester {
    validator: StatisticalValidator,
    max_parallel: usize,
}

impl HypothesisTester {
    pub fn new(validator: StatisticalValidator, max_parallel: usize) -> Self {
        Self {
            validator,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(
            StatisticalValidator::from_config(config),
            config.max_parallel_validations,
        )
    }

    /// Split records into the two groups and compare them on the metric.
    /// Rows whose metric is undefined are left out of both samples.
    pub fn test(&self, hypothesis: &Hypothesis, records: &RecordSet) -> ValidationResult {
        let mut group_a = Vec::new();
        let mut group_b = Vec::new();

        for record in records.records() {
            let Some(value) = record.metric(hypothesis.metric) else {
                continue;
            };
            let segment = record.segment(hypothesis.dimension);
            if segment == hypothesis.group_a {
                group_a.push(value);
            } else if hypothesis.group_b.contains(segment, &hypothesis.group_a) {
                group_b.push(value);
            }
        }

        self.validator
            .validate(&group_a, &group_b, hypothesis.metric)
    }

    /// Test every hypothesis and attach its result, keeping input order.
    pub async fn test_all(
        &self,
        hypotheses: Vec<Hypothesis>,
        records: Arc<RecordSet>,
    ) -> AppResult<Vec<Hypothesis>> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        let futures = hypotheses.into_iter().map(|mut hypothesis| {
            let semaphore = semaphore.clone();
            let records = records.clone();
            let tester = self.clone();
            async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| AppError::internal(format!("validation semaphore closed: {}", e)))?;
                let id = hypothesis.id.clone();
                tokio::task::spawn_blocking(move || {
                    let result = tester.test(&hypothesis, &records);
                    hypothesis.attach(result);
                    hypothesis
                })
                .await
                .map_err(|e| AppError::internal(format!("validation of {} panicked: {}", id, e)))
            }
        });

        join_all(futures).await.into_iter().collect()
    }
}

#[async_trait]
impl Stage for HypothesisTester {
    type Input = (Vec<Hypothesis>, Arc<RecordSet>);
    type Output = Vec<Hypothesis>;

    fn kind(&self) -> StageKind {
        StageKind::HypothesisTester
    }

    async fn run(&self, input: Self::Input) -> AppResult<Self::Output> {
        let (hypotheses, records) = input;
        self.test_all(hypotheses, records).await
    }
}

#[cfg(test)]
mod tests {
    use insight_cascade_llm::ScriptedProvider;

    use super::*;
    use crate::models::{AdRecord, ValidationStatus};
    use crate::services::summarizer::DataSummarizer;

    fn record(creative: &str, country: &str, spend: f64, revenue: f64) -> AdRecord {
        AdRecord {
            campaign_name: "Always On".into(),
            adset_name: "Prospecting".into(),
            date: chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            spend,
            impressions: 1000,
            clicks: 25,
            purchases: 2,
            revenue,
            creative_type: creative.into(),
            audience_type: "Broad".into(),
            platform: "Instagram".into(),
            country: country.into(),
        }
    }

    fn records() -> RecordSet {
        let mut rows = Vec::new();
        for i in 0..40 {
            let jitter = (i % 5) as f64 * 10.0;
            rows.push(record("Image", "US", 100.0, 600.0 + jitter));
            rows.push(record("Video", "UK", 100.0, 400.0 + jitter));
        }
        rows.push(record("Carousel", "US", 0.0, 50.0));
        RecordSet::from_records(rows)
    }

    fn engine(responses: Vec<&str>) -> (HypothesisEngine, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(vec![]).with_kind(
            HYPOTHESES_KIND,
            responses.into_iter().map(|r| Ok(r.to_string())).collect(),
        ));
        let config = AnalysisConfig {
            llm_initial_backoff_ms: 1,
            ..AnalysisConfig::default()
        };
        (HypothesisEngine::new(provider.clone(), &config), provider)
    }

    fn request(tested: HashSet<ComparisonKey>) -> ProposalRequest {
        ProposalRequest {
            summary: Arc::new(DataSummarizer::default().summarize(&records())),
            query: "Which creatives work best?".into(),
            focus: vec![Dimension::CreativeType],
            target: 4,
            iteration: 0,
            tested,
        }
    }

    #[tokio::test]
    async fn test_propose_filters_malformed_candidates() {
        let (engine, provider) = engine(vec![
            r#"```json
            {"hypotheses": [
              {"id": "h1", "statement": "Image beats Video on ROAS", "dimension": "creative_type",
               "metric": "roas", "group_a": "Image", "group_b": "Video", "expected_direction": "increase"},
              {"id": "h2", "statement": "Mobile wins", "dimension": "device",
               "metric": "roas", "group_a": "Mobile"},
              {"id": "h3", "statement": "Image vs Image", "dimension": "creative_type",
               "metric": "ctr", "group_a": "Image", "group_b": "Image"},
              {"id": "h4", "statement": "Reels lag", "dimension": "creative_type",
               "metric": "roas", "group_a": "Reels"},
              {"id": "h5", "statement": "US outperforms", "dimension": "country",
               "metric": "roas", "group_a": "US", "group_b": "rest"}
            ], "reasoning": "creative mix drives ROAS"}
            ```"#,
        ]);

        let proposal = engine.propose(&request(HashSet::new())).await.unwrap();

        assert_eq!(provider.request_count(), 1);
        assert_eq!(proposal.hypotheses.len(), 2);
        assert_eq!(proposal.hypotheses[0].id, "it0-h1");
        assert_eq!(proposal.hypotheses[0].expected_direction, Direction::Increase);
        assert_eq!(
            proposal.hypotheses[0].group_b,
            ComparisonGroup::Segment("Video".into())
        );
        assert_eq!(proposal.hypotheses[1].id, "it0-h2");
        assert_eq!(proposal.hypotheses[1].group_b, ComparisonGroup::Rest);
        assert_eq!(proposal.discarded.len(), 3);
        assert!(proposal.discarded[0].reason.contains("unknown dimension"));
        assert!(proposal.discarded[1].reason.contains("group_b equals group_a"));
        assert!(proposal.discarded[2].reason.contains("not present"));
        assert_eq!(proposal.reasoning, "creative mix drives ROAS");
    }

    #[test]
    fn test_segment_named_other_is_not_the_complement() {
        let mut rows = records().records().to_vec();
        rows.push(record("Other", "US", 100.0, 300.0));
        let summary = DataSummarizer::default().summarize(&RecordSet::from_records(rows));
        let candidate = |group_b: &str| -> HypothesisCandidate {
            serde_json::from_value(serde_json::json!({
                "statement": "Image beats the field",
                "dimension": "creative_type",
                "metric": "roas",
                "group_a": "Image",
                "group_b": group_b,
            }))
            .unwrap()
        };

        let named = accept_candidate(&candidate("Other"), &summary, 0, "h1".into()).unwrap();
        assert_eq!(named.group_b, ComparisonGroup::Segment("Other".into()));

        let alias = accept_candidate(&candidate("rest"), &summary, 0, "h2".into()).unwrap();
        assert_eq!(alias.group_b, ComparisonGroup::Rest);

        // Without an "Other" segment the spelling still means the complement
        let plain = DataSummarizer::default().summarize(&records());
        let fallback = accept_candidate(&candidate("Other"), &plain, 0, "h3".into()).unwrap();
        assert_eq!(fallback.group_b, ComparisonGroup::Rest);
    }

    #[tokio::test]
    async fn test_propose_skips_tested_comparisons() {
        let (engine, _provider) = engine(vec![
            r#"{"hypotheses": [
              {"statement": "Video trails Image", "dimension": "creative_type",
               "metric": "roas", "group_a": "Video", "group_b": "Image"},
              {"statement": "Image CTR", "dimension": "creative_type",
               "metric": "ctr", "group_a": "Image", "group_b": "Video"}
            ]}"#,
        ]);
        let tested = HashSet::from([ComparisonKey {
            dimension: Dimension::CreativeType,
            metric: Metric::Roas,
            group_a: "Image".into(),
            group_b: ComparisonGroup::Segment("Video".into()),
        }]);

        let proposal = engine.propose(&request(tested)).await.unwrap();
        assert_eq!(proposal.hypotheses.len(), 1);
        assert_eq!(proposal.hypotheses[0].metric, Metric::Ctr);
        assert_eq!(proposal.duplicates.len(), 1);
    }

    #[tokio::test]
    async fn test_propose_repairs_unparseable_reply() {
        let (engine, provider) = engine(vec![
            "Here are some ideas: Image is better.",
            r#"{"hypotheses": [{"statement": "Image beats Video", "dimension": "creative",
               "metric": "ROAS", "group_a": "Image", "group_b": "Video"}]}"#,
        ]);

        let proposal = engine.propose(&request(HashSet::new())).await.unwrap();
        assert_eq!(proposal.hypotheses.len(), 1);
        assert_eq!(provider.request_count(), 2);
        let requests = provider.requests();
        assert!(requests[1].last_message().contains("could not be used"));
    }

    #[tokio::test]
    async fn test_propose_exhaustion_is_external_failure() {
        let (engine, _provider) = engine(vec!["nope", "still nope", "no json here"]);
        let err = engine.propose(&request(HashSet::new())).await.unwrap_err();
        assert!(matches!(err, AppError::ExternalService(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_partitions_records_by_group() {
        let tester = HypothesisTester::from_config(&AnalysisConfig::default());
        let hypothesis = Hypothesis {
            id: "it0-h1".into(),
            source_id: None,
            iteration: 0,
            statement: "Image beats the rest".into(),
            rationale: String::new(),
            dimension: Dimension::CreativeType,
            metric: Metric::Roas,
            group_a: "Image".into(),
            group_b: ComparisonGroup::Rest,
            expected_direction: Direction::Increase,
            status: HypothesisStatus::Proposed,
            validation: None,
        };

        let result = tester.test(&hypothesis, &records());
        assert_eq!(result.n_a, 40);
        // The zero-spend Carousel row has no ROAS
        assert_eq!(result.n_b, 40);
        assert_eq!(result.status, ValidationStatus::Validated);
        assert!(result.mean_a > result.mean_b);
    }

    #[tokio::test]
    async fn test_batch_keeps_input_order() {
        let tester = HypothesisTester::new(StatisticalValidator::default(), 2);
        let make = |id: &str, metric: Metric| Hypothesis {
            id: id.into(),
            source_id: None,
            iteration: 0,
            statement: String::new(),
            rationale: String::new(),
            dimension: Dimension::Country,
            metric,
            group_a: "US".into(),
            group_b: ComparisonGroup::Segment("UK".into()),
            expected_direction: Direction::Change,
            status: HypothesisStatus::Proposed,
            validation: None,
        };
        let batch = vec![
            make("a", Metric::Roas),
            make("b", Metric::Ctr),
            make("c", Metric::Cpc),
        ];

        let tested = tester.test_all(batch, Arc::new(records())).await.unwrap();
        let ids: Vec<&str> = tested.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(tested.iter().all(|h| h.validation.is_some()));
        assert_eq!(tested[0].status, HypothesisStatus::Validated);
        // Identical CTR in both groups
        assert_ne!(tested[1].status, HypothesisStatus::Validated);
    }
}
