//! Recommender
//!
//! Turns validated hypotheses into scored insights, groups insights into
//! recommended actions, and optionally has the completion service reword the
//! actions. Scores and ordering are computed here, never by the model.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use insight_cascade_core::{AnalysisConfig, Dimension, Metric};
use insight_cascade_llm::{request_structured, LlmProvider, RetryPolicy, StructuredRequest};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::{
    ComparisonGroup, DataSummary, Hypothesis, Insight, InsightCategory, Recommendation,
    RecommendationType, RecordSet, TrendKind, Urgency,
};
use crate::services::orchestrator::stage::{Stage, StageKind};
use crate::utils::error::{AppError, AppResult};

pub const RECOMMENDATIONS_KIND: &str = "recommendations";

/// Share of average daily revenue a fully confident insight is assumed to move.
const REVENUE_IMPACT_RATE: f64 = 0.1;
/// Cohen's d treated as the full effect contribution to impact.
const IMPACT_EFFECT_SATURATION: f64 = 0.8;
/// Relative lift from which a winner is worth scaling.
const SCALE_LIFT_THRESHOLD: f64 = 0.2;
/// Segments with ROAS below this lose money.
const BREAK_EVEN_ROAS: f64 = 1.0;
const MAX_AFFECTED_CAMPAIGNS: usize = 3;

const NARRATION_SYSTEM_PROMPT: &str = "You are a performance-marketing strategist. Rewrite \
each recommendation so a media buyer can act on it today. Keep every number you are given; \
do not invent new figures and do not add or remove recommendations.";

/// Reworded text for one recommendation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NarratedRecommendation {
    /// The id of the recommendation being reworded, unchanged.
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub implementation_steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecommendationNarrative {
    pub recommendations: Vec<NarratedRecommendation>,
    #[serde(default)]
    pub executive_summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RecommendationInput {
    pub query: String,
    /// Validated hypotheses from every iteration.
    pub hypotheses: Vec<Hypothesis>,
    pub hypotheses_tested: usize,
    pub summary: Arc<DataSummary>,
    pub records: Arc<RecordSet>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecommendationSet {
    pub insights: Vec<Insight>,
    pub recommendations: Vec<Recommendation>,
    pub executive_summary: String,
}

fn urgency_for(confidence: f64, impact: f64) -> Urgency {
    if confidence > 0.8 && impact >= 7.0 {
        Urgency::Critical
    } else if confidence > 0.8 {
        Urgency::High
    } else if confidence > 0.6 {
        Urgency::Medium
    } else {
        Urgency::Low
    }
}

fn spend_share(summary: &DataSummary, dimension: Dimension, segment: &str) -> f64 {
    summary
        .segment(dimension, segment)
        .and_then(|s| s.spend_share.value())
        .unwrap_or(0.0)
}

/// Which side of a comparison won.
struct Outcome {
    a_wins: bool,
    relative_lift: Option<f64>,
}

fn outcome(metric: Metric, mean_a: f64, mean_b: f64) -> Outcome {
    let a_wins = if metric.lower_is_better() {
        mean_a <= mean_b
    } else {
        mean_a >= mean_b
    };
    let (winner, loser) = if a_wins { (mean_a, mean_b) } else { (mean_b, mean_a) };
    let relative_lift = (loser.abs() > f64::EPSILON).then(|| {
        if metric.lower_is_better() {
            (loser - winner) / loser
        } else {
            (winner - loser) / loser
        }
    });
    Outcome {
        a_wins,
        relative_lift,
    }
}

fn affected_campaigns(hypothesis: &Hypothesis, records: &RecordSet) -> Vec<String> {
    records
        .records()
        .iter()
        .filter(|r| {
            let segment = r.segment(hypothesis.dimension);
            segment == hypothesis.group_a
                || hypothesis.group_b.contains(segment, &hypothesis.group_a)
        })
        .map(|r| r.campaign_name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .take(MAX_AFFECTED_CAMPAIGNS)
        .collect()
}

fn by_priority(a: &Recommendation, b: &Recommendation) -> Ordering {
    b.priority_score
        .partial_cmp(&a.priority_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.target_segment.cmp(&b.target_segment))
}

#[derive(Clone)]
pub struct Recommender {
    provider: Option<Arc<dyn LlmProvider>>,
    policy: RetryPolicy,
}

impl Recommender {
    /// A recommender that keeps its generated wording.
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            provider: None,
            policy: RetryPolicy::from(config),
        }
    }

    /// A recommender that has `provider` reword its recommendations.
    pub fn narrated(config: &AnalysisConfig, provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider: Some(provider),
            ..Self::new(config)
        }
    }

    /// One insight per validated hypothesis, highest impact first.
    pub fn build_insights(
        &self,
        hypotheses: &[Hypothesis],
        summary: &DataSummary,
        records: &RecordSet,
    ) -> Vec<Insight> {
        let time_period = match summary.date_range {
            Some(range) => format!("{} to {}", range.start, range.end),
            None => "all data".to_string(),
        };

        let mut insights: Vec<Insight> = hypotheses
            .iter()
            .filter(|h| h.is_validated())
            .filter_map(|h| h.validation.as_ref().map(|r| (h, r)))
            .map(|(hypothesis, result)| {
                let dim = hypothesis.dimension;
                let group_b = hypothesis.group_b.label(dim);
                let Outcome {
                    a_wins,
                    relative_lift,
                } = outcome(result.metric, result.mean_a, result.mean_b);
                let (winner, loser) = if a_wins {
                    (hypothesis.group_a.clone(), group_b)
                } else {
                    (group_b, hypothesis.group_a.clone())
                };

                let share_a = spend_share(summary, dim, &hypothesis.group_a);
                let share_b = match &hypothesis.group_b {
                    ComparisonGroup::Segment(name) => spend_share(summary, dim, name),
                    ComparisonGroup::Rest => 1.0 - share_a,
                };
                let effect = result
                    .effect_size
                    .map(|d| (d.abs() / IMPACT_EFFECT_SATURATION).min(1.0))
                    .unwrap_or(0.0);
                let impact_score =
                    (10.0 * (0.5 * effect + 0.5 * (share_a + share_b).min(1.0))).clamp(0.0, 10.0);

                let lift_text = relative_lift
                    .map(|l| format!(" by {:.1}%", l * 100.0))
                    .unwrap_or_default();

                Insight {
                    id: format!("insight-{}", hypothesis.id),
                    hypothesis_id: hypothesis.id.clone(),
                    title: format!(
                        "{} outperforms {} on {}",
                        winner,
                        loser,
                        result.metric.as_str().to_uppercase()
                    ),
                    description: format!(
                        "{} beats {}{} ({:.4} vs {:.4}). {}",
                        winner,
                        loser,
                        lift_text,
                        if a_wins { result.mean_a } else { result.mean_b },
                        if a_wins { result.mean_b } else { result.mean_a },
                        result.verdict
                    ),
                    dimension: dim,
                    metric: result.metric,
                    winner,
                    loser,
                    relative_lift,
                    impact_score,
                    confidence: result.confidence,
                    urgency: urgency_for(result.confidence, impact_score),
                    category: InsightCategory::from(dim),
                    estimated_revenue_impact: summary.avg_daily_revenue()
                        * REVENUE_IMPACT_RATE
                        * result.confidence,
                    affected_campaigns: affected_campaigns(hypothesis, records),
                    time_period: time_period.clone(),
                    hypothesis: hypothesis.clone(),
                }
            })
            .collect();

        insights.sort_by(|a, b| {
            b.impact_score
                .partial_cmp(&a.impact_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        });
        insights
    }

    /// The action an insight calls for and the segment it targets.
    fn action_for(&self, insight: &Insight, summary: &DataSummary) -> (RecommendationType, String) {
        let winner_named = summary.segment(insight.dimension, &insight.winner).is_some();
        let loser_roas = summary
            .segment(insight.dimension, &insight.loser)
            .and_then(|s| s.roas.value());

        if winner_named && insight.relative_lift.unwrap_or(0.0) >= SCALE_LIFT_THRESHOLD {
            return (RecommendationType::ScaleCreative, insight.winner.clone());
        }
        let draining = insight.dimension == Dimension::CreativeType
            && summary.is_budget_drain(&insight.loser);
        if draining || matches!(loser_roas, Some(roas) if roas < BREAK_EVEN_ROAS) {
            return (RecommendationType::PauseCreative, insight.loser.clone());
        }
        if loser_roas.is_some() {
            (RecommendationType::OptimizeExisting, insight.loser.clone())
        } else {
            (RecommendationType::OptimizeExisting, insight.winner.clone())
        }
    }

    /// Group insights by the action they call for, highest priority first.
    pub fn build_recommendations(
        &self,
        insights: &[Insight],
        summary: &DataSummary,
    ) -> Vec<Recommendation> {
        let mut groups: BTreeMap<(RecommendationType, Dimension, String), Vec<&Insight>> =
            BTreeMap::new();
        for insight in insights {
            let (kind, target) = self.action_for(insight, summary);
            groups
                .entry((kind, insight.dimension, target))
                .or_default()
                .push(insight);
        }

        // Declining CTR calls for fresh creatives in the best creative format
        let fatigued = summary
            .trends
            .iter()
            .any(|t| t.kind == TrendKind::CreativeFatigue);
        if fatigued {
            let creative_insights: Vec<&Insight> = insights
                .iter()
                .filter(|i| i.dimension == Dimension::CreativeType)
                .collect();
            if let Some(best) = creative_insights.first() {
                let target = summary
                    .best_segment
                    .as_ref()
                    .map(|b| b.creative_type.clone())
                    .unwrap_or_else(|| best.winner.clone());
                groups
                    .entry((RecommendationType::NewCreative, Dimension::CreativeType, target))
                    .or_default()
                    .extend(creative_insights);
            }
        }

        let mut recommendations: Vec<Recommendation> = groups
            .into_iter()
            .filter_map(|((kind, dimension, target), members)| {
                let strongest = members.iter().copied().max_by(|a, b| {
                    (a.impact_score * a.confidence)
                        .partial_cmp(&(b.impact_score * b.confidence))
                        .unwrap_or(Ordering::Equal)
                })?;
                Some(self.recommendation(kind, dimension, target, strongest, &members))
            })
            .collect();

        recommendations.sort_by(by_priority);
        for (index, recommendation) in recommendations.iter_mut().enumerate() {
            recommendation.id = format!("rec-{}", index + 1);
        }
        recommendations
    }

    fn recommendation(
        &self,
        kind: RecommendationType,
        dimension: Dimension,
        target: String,
        strongest: &Insight,
        members: &[&Insight],
    ) -> Recommendation {
        let mut expected_improvement: BTreeMap<String, f64> = BTreeMap::new();
        for insight in members {
            if let Some(lift) = insight.relative_lift {
                let entry = expected_improvement
                    .entry(insight.metric.as_str().to_string())
                    .or_insert(lift);
                *entry = entry.max(lift);
            }
        }

        let metric = strongest.metric.as_str().to_uppercase();
        let (title, action, steps) = match kind {
            RecommendationType::ScaleCreative => (
                format!("Scale {}", target),
                format!(
                    "Shift budget toward {} ({}), which leads on {}",
                    target, dimension, metric
                ),
                vec![
                    format!("Raise daily budget on {} by 20-30%", target),
                    format!("Hold {} at or above its current level for 7 days", metric),
                    "Repeat the increase while performance holds".to_string(),
                ],
            ),
            RecommendationType::PauseCreative => (
                format!("Pause {}", target),
                format!(
                    "Pause spend on {} ({}), which returns too little for its spend",
                    target, dimension
                ),
                vec![
                    format!("Pause active ads in {}", target),
                    format!("Move the freed budget to {}", strongest.winner),
                ],
            ),
            RecommendationType::OptimizeExisting => (
                format!("Optimize {}", target),
                format!(
                    "Rework {} ({}) using what works in {}",
                    target, dimension, strongest.winner
                ),
                vec![
                    format!("Compare top ads of {} and {}", strongest.winner, strongest.loser),
                    format!("Test 2-3 variations of {} against its current ads", target),
                ],
            ),
            RecommendationType::NewCreative => (
                format!("Launch new {} creatives", target),
                format!("Counter creative fatigue with fresh {} creatives", target),
                vec![
                    "Retire ads with the steepest CTR decline".to_string(),
                    format!("Launch 3 new {} concepts", target),
                ],
            ),
        };

        let rationale = members
            .iter()
            .map(|i| i.title.clone())
            .collect::<Vec<_>>()
            .join("; ");

        Recommendation {
            id: String::new(),
            recommendation_type: kind,
            dimension,
            target_segment: target,
            title,
            action,
            rationale,
            expected_improvement,
            implementation_steps: steps,
            impact: strongest.impact_score,
            confidence: strongest.confidence,
            priority_score: strongest.impact_score * strongest.confidence,
            insight_ids: members.iter().map(|i| i.id.clone()).collect(),
        }
    }

    pub fn executive_summary(
        &self,
        insights: &[Insight],
        recommendations: &[Recommendation],
        hypotheses_tested: usize,
    ) -> String {
        let mut summary = format!(
            "{} of {} tested hypotheses were validated.",
            insights.len(),
            hypotheses_tested
        );
        if let Some(top) = insights.first() {
            summary.push_str(&format!(
                " Strongest finding: {} (confidence {:.0}%).",
                top.title,
                top.confidence * 100.0
            ));
        }
        if let Some(rec) = recommendations.first() {
            summary.push_str(&format!(" Top priority: {}.", rec.action));
        }
        if insights.is_empty() {
            summary.push_str(" No difference was strong enough to act on.");
        }
        summary
    }

    /// Reword `recommendations` through the completion service. Ids, scores,
    /// and order stay as they are.
    async fn narrate(
        &self,
        provider: &dyn LlmProvider,
        query: &str,
        recommendations: &mut [Recommendation],
    ) -> AppResult<Option<String>> {
        let ids: BTreeSet<String> = recommendations.iter().map(|r| r.id.clone()).collect();
        let listing = serde_json::to_string_pretty(&recommendations)?;
        let request = StructuredRequest {
            kind: RECOMMENDATIONS_KIND,
            system: NARRATION_SYSTEM_PROMPT.to_string(),
            prompt: format!(
                "## Question\n{}\n\n## Recommendations\n{}\n\nReturn one entry per recommendation id, \
                 plus a 2-3 sentence executive summary.",
                query, listing
            ),
        };

        let narrative: RecommendationNarrative =
            request_structured(provider, &self.policy, &request, |n: &RecommendationNarrative| {
                match n.recommendations.iter().find(|r| !ids.contains(&r.id)) {
                    Some(unknown) => Err(format!("unknown recommendation id '{}'", unknown.id)),
                    None => Ok(()),
                }
            })
            .await?;

        for narrated in narrative.recommendations {
            let Some(target) = recommendations.iter_mut().find(|r| r.id == narrated.id) else {
                continue;
            };
            if let Some(title) = narrated.title.filter(|t| !t.trim().is_empty()) {
                target.title = title;
            }
            if let Some(action) = narrated.action.filter(|t| !t.trim().is_empty()) {
                target.action = action;
            }
            if let Some(rationale) = narrated.rationale.filter(|t| !t.trim().is_empty()) {
                target.rationale = rationale;
            }
            if !narrated.implementation_steps.is_empty() {
                target.implementation_steps = narrated.implementation_steps;
            }
        }
        debug!(count = recommendations.len(), "[Recommender] Narration applied");

        Ok(narrative
            .executive_summary
            .filter(|s| !s.trim().is_empty()))
    }

    pub async fn recommend(&self, input: &RecommendationInput) -> AppResult<RecommendationSet> {
        let insights = self.build_insights(&input.hypotheses, &input.summary, &input.records);
        let mut recommendations = self.build_recommendations(&insights, &input.summary);
        let mut executive_summary =
            self.executive_summary(&insights, &recommendations, input.hypotheses_tested);

        if let Some(provider) = &self.provider {
            if !recommendations.is_empty() {
                if let Some(text) = self
                    .narrate(provider.as_ref(), &input.query, &mut recommendations)
                    .await?
                {
                    executive_summary = text;
                }
            }
        }

        info!(
            insights = insights.len(),
            recommendations = recommendations.len(),
            "[Recommender] Recommendations ready"
        );
        Ok(RecommendationSet {
            insights,
            recommendations,
            executive_summary,
        })
    }
}

#[async_trait]
impl Stage for Recommender {
    type Input = RecommendationInput;
    type Output = RecommendationSet;

    fn kind(&self) -> StageKind {
        StageKind::Recommender
    }

    async fn run(&self, input: Self::Input) -> AppResult<Self::Output> {
        if input.hypotheses.iter().any(|h| !h.is_validated()) {
            return Err(AppError::internal(
                "recommender received a hypothesis that is not validated",
            ));
        }
        self.recommend(&input).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use insight_cascade_llm::ScriptedProvider;

    use super::*;
    use crate::models::{
        AdRecord, Direction, HypothesisStatus, ValidationResult, ValidationStatus,
    };
    use crate::services::summarizer::DataSummarizer;

    fn record(creative: &str, platform: &str, spend: f64, revenue: f64) -> AdRecord {
        AdRecord {
            campaign_name: format!("{} Push", creative),
            adset_name: "Core".into(),
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            spend,
            impressions: 2000,
            clicks: 40,
            purchases: 4,
            revenue,
            creative_type: creative.into(),
            audience_type: "Lookalike".into(),
            platform: platform.into(),
            country: "US".into(),
        }
    }

    fn fixtures() -> (DataSummary, RecordSet) {
        let records = RecordSet::from_records(vec![
            record("Image", "Facebook", 300.0, 1800.0),
            record("Video", "Facebook", 300.0, 1200.0),
            record("Carousel", "Instagram", 200.0, 100.0),
            record("UGC", "Instagram", 200.0, 900.0),
        ]);
        (DataSummarizer::default().summarize(&records), records)
    }

    fn validated(
        id: &str,
        dimension: Dimension,
        metric: Metric,
        group_a: &str,
        group_b: ComparisonGroup,
        mean_a: f64,
        mean_b: f64,
        confidence: f64,
    ) -> Hypothesis {
        Hypothesis {
            id: id.into(),
            source_id: None,
            iteration: 0,
            statement: format!("{} vs {}", group_a, group_b.label(dimension)),
            rationale: String::new(),
            dimension,
            metric,
            group_a: group_a.into(),
            group_b,
            expected_direction: Direction::Change,
            status: HypothesisStatus::Validated,
            validation: Some(ValidationResult {
                metric,
                test: "welch_t_test".into(),
                statistic: 5.0,
                degrees_of_freedom: 80.0,
                p_value: 0.001,
                effect_size: Some(if mean_a > mean_b { 0.9 } else { -0.9 }),
                mean_a,
                mean_b,
                std_a: 1.0,
                std_b: 1.0,
                n_a: 40,
                n_b: 40,
                confidence,
                status: ValidationStatus::Validated,
                insufficient_data: false,
                verdict: "Supported".into(),
            }),
        }
    }

    fn image_vs_video() -> Hypothesis {
        validated(
            "it0-h1",
            Dimension::CreativeType,
            Metric::Roas,
            "Image",
            ComparisonGroup::Segment("Video".into()),
            6.0,
            4.0,
            0.9,
        )
    }

    #[test]
    fn test_insight_scoring() {
        let (summary, records) = fixtures();
        let insights = Recommender::new(&AnalysisConfig::default()).build_insights(
            &[image_vs_video()],
            &summary,
            &records,
        );

        assert_eq!(insights.len(), 1);
        let insight = &insights[0];
        assert_eq!(insight.winner, "Image");
        assert_eq!(insight.loser, "Video");
        assert!((insight.relative_lift.unwrap() - 0.5).abs() < 1e-9);
        // d saturates; Image and Video hold 60% of spend
        assert!((insight.impact_score - 8.0).abs() < 1e-9);
        assert_eq!(insight.urgency, Urgency::Critical);
        assert_eq!(insight.category, InsightCategory::Creative);
        assert_eq!(
            insight.affected_campaigns,
            vec!["Image Push".to_string(), "Video Push".to_string()]
        );
        let expected_revenue = summary.avg_daily_revenue() * 0.1 * 0.9;
        assert!((insight.estimated_revenue_impact - expected_revenue).abs() < 1e-9);
    }

    #[test]
    fn test_lower_cpc_wins() {
        let (summary, records) = fixtures();
        let h = validated(
            "it0-h2",
            Dimension::Platform,
            Metric::Cpc,
            "Facebook",
            ComparisonGroup::Rest,
            2.0,
            1.5,
            0.7,
        );
        let insights =
            Recommender::new(&AnalysisConfig::default()).build_insights(&[h], &summary, &records);
        assert_eq!(insights[0].winner, "other platform");
        assert_eq!(insights[0].loser, "Facebook");
        assert!((insights[0].relative_lift.unwrap() - 0.25).abs() < 1e-9);
        assert_eq!(insights[0].urgency, Urgency::Medium);
    }

    #[test]
    fn test_recommendation_types() {
        let (summary, records) = fixtures();
        let recommender = Recommender::new(&AnalysisConfig::default());
        let hypotheses = vec![
            image_vs_video(),
            // Carousel loses money
            validated(
                "it0-h3",
                Dimension::CreativeType,
                Metric::Ctr,
                "Carousel",
                ComparisonGroup::Segment("UGC".into()),
                0.020,
                0.022,
                0.75,
            ),
        ];
        let insights = recommender.build_insights(&hypotheses, &summary, &records);
        let recs = recommender.build_recommendations(&insights, &summary);

        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].id, "rec-1");
        assert_eq!(recs[0].recommendation_type, RecommendationType::ScaleCreative);
        assert_eq!(recs[0].target_segment, "Image");
        assert!(recs[0].priority_score >= recs[1].priority_score);
        assert_eq!(recs[1].recommendation_type, RecommendationType::PauseCreative);
        assert_eq!(recs[1].target_segment, "Carousel");
        assert_eq!(recs[1].insight_ids, vec!["insight-it0-h3".to_string()]);
    }

    #[test]
    fn test_budget_drain_loser_is_paused() {
        let records = RecordSet::from_records(vec![
            record("Image", "Facebook", 400.0, 2400.0),
            record("Video", "Facebook", 400.0, 800.0),
            record("UGC", "Instagram", 200.0, 1000.0),
        ]);
        let summary = DataSummarizer::default().summarize(&records);
        assert!(summary.is_budget_drain("Video"));

        // Lift stays under the scaling threshold, and Video is above break-even
        let h = validated(
            "it0-h4",
            Dimension::CreativeType,
            Metric::Ctr,
            "Image",
            ComparisonGroup::Segment("Video".into()),
            0.021,
            0.020,
            0.8,
        );
        let recommender = Recommender::new(&AnalysisConfig::default());
        let insights = recommender.build_insights(&[h], &summary, &records);
        let recs = recommender.build_recommendations(&insights, &summary);

        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].recommendation_type, RecommendationType::PauseCreative);
        assert_eq!(recs[0].target_segment, "Video");
        assert!(recs[0].implementation_steps[1].contains("Image"));
    }

    #[test]
    fn test_insights_for_same_action_are_grouped() {
        let (summary, records) = fixtures();
        let recommender = Recommender::new(&AnalysisConfig::default());
        let mut ctr = image_vs_video();
        ctr.id = "it1-h1".into();
        if let Some(v) = ctr.validation.as_mut() {
            v.metric = Metric::Ctr;
            v.confidence = 0.7;
        }
        ctr.metric = Metric::Ctr;

        let insights = recommender.build_insights(&[image_vs_video(), ctr], &summary, &records);
        let recs = recommender.build_recommendations(&insights, &summary);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].insight_ids.len(), 2);
        assert!((recs[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(recs[0].expected_improvement.len(), 2);
    }

    #[tokio::test]
    async fn test_narration_rewrites_text_but_keeps_scores() {
        let (summary, records) = fixtures();
        let provider = Arc::new(ScriptedProvider::new(vec![]).with_kind(
            RECOMMENDATIONS_KIND,
            vec![
                Ok(r#"{"recommendations": [{"id": "rec-9", "title": "??"}]}"#.into()),
                Ok(r#"{"recommendations": [{"id": "rec-1", "action": "Move 25% of Video budget to Image ads"}],
                      "executive_summary": "Image ads are your best lever."}"#
                    .into()),
            ],
        ));
        let config = AnalysisConfig {
            llm_initial_backoff_ms: 1,
            ..AnalysisConfig::default()
        };
        let recommender = Recommender::narrated(&config, provider.clone());

        let set = recommender
            .recommend(&RecommendationInput {
                query: "What should I scale?".into(),
                hypotheses: vec![image_vs_video()],
                hypotheses_tested: 3,
                summary: Arc::new(summary),
                records: Arc::new(records),
            })
            .await
            .unwrap();

        assert_eq!(provider.request_count(), 2);
        assert_eq!(set.recommendations[0].action, "Move 25% of Video budget to Image ads");
        assert_eq!(set.recommendations[0].title, "Scale Image");
        assert!((set.recommendations[0].priority_score - 7.2).abs() < 1e-9);
        assert_eq!(set.executive_summary, "Image ads are your best lever.");
    }

    #[test]
    fn test_executive_summary_without_insights() {
        let text = Recommender::new(&AnalysisConfig::default()).executive_summary(&[], &[], 5);
        assert!(text.starts_with("0 of 5 tested hypotheses were validated."));
        assert!(text.contains("No difference"));
    }
}
