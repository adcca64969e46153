//! Data Summarizer
//!
//! Aggregates a record set overall, per dimension segment, and per day, then
//! flags anomalous segments and declining trends. Output ordering is fully
//! determined by the input, so repeated calls give equal summaries.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use insight_cascade_core::{AnalysisConfig, Dimension, Metric};
use tracing::{debug, info};

use crate::models::{
    AdRecord, Anomaly, AnomalySeverity, BudgetDrain, DailyMetrics, DataSummary, DateRange, Ratio, RecordSet,
    SegmentHighlight, SegmentMetrics, TrendKind, TrendSignal,
};
use crate::services::orchestrator::stage::{Stage, StageKind};
use crate::services::stats::population_mean_std;
use crate::utils::error::AppResult;

/// Days compared at each end of the daily series.
const TREND_WINDOW_DAYS: usize = 7;
/// Relative ROAS drop flagged as a decline.
const ROAS_DECLINE_THRESHOLD: f64 = 0.2;
/// Relative CTR drop flagged as creative fatigue.
const FATIGUE_THRESHOLD: f64 = 0.15;
/// Minimum share of spend for a creative/platform pairing to be highlighted.
const HIGHLIGHT_MIN_SPEND_SHARE: f64 = 0.05;
/// Fewer segments than this give no meaningful spread.
const MIN_SEGMENTS_FOR_ANOMALIES: usize = 3;
/// Floor on the spread of the other segments, relative to their mean.
const MIN_RELATIVE_SPREAD: f64 = 0.1;

#[derive(Debug, Clone, Default)]
struct Totals {
    rows: usize,
    spend: f64,
    revenue: f64,
    /// Revenue of rows with non-zero spend.
    roas_revenue: f64,
    impressions: u64,
    clicks: u64,
    purchases: u64,
}

impl Totals {
    fn add(&mut self, record: &AdRecord) {
        self.rows += 1;
        self.spend += record.spend;
        self.revenue += record.revenue;
        if record.spend > 0.0 {
            self.roas_revenue += record.revenue;
        }
        self.impressions = self.impressions.saturating_add(record.impressions);
        self.clicks = self.clicks.saturating_add(record.clicks);
        self.purchases = self.purchases.saturating_add(record.purchases);
    }

    fn merge(&mut self, other: &Totals) {
        self.rows += other.rows;
        self.spend += other.spend;
        self.revenue += other.revenue;
        self.roas_revenue += other.roas_revenue;
        self.impressions = self.impressions.saturating_add(other.impressions);
        self.clicks = self.clicks.saturating_add(other.clicks);
        self.purchases = self.purchases.saturating_add(other.purchases);
    }

    fn roas(&self) -> Ratio {
        Ratio::of(self.roas_revenue, self.spend)
    }

    fn ctr(&self) -> Ratio {
        Ratio::of(self.clicks as f64, self.impressions as f64)
    }

    fn finish(&self, segment: impl Into<String>, total_spend: f64) -> SegmentMetrics {
        SegmentMetrics {
            segment: segment.into(),
            rows: self.rows,
            spend: self.spend,
            revenue: self.revenue,
            impressions: self.impressions,
            clicks: self.clicks,
            purchases: self.purchases,
            roas: self.roas(),
            ctr: self.ctr(),
            cpc: Ratio::of(self.spend, self.clicks as f64),
            conversion_rate: Ratio::of(self.purchases as f64, self.clicks as f64),
            spend_share: Ratio::of(self.spend, total_spend),
        }
    }
}

fn by_revenue_desc(a: &SegmentMetrics, b: &SegmentMetrics) -> Ordering {
    b.revenue
        .partial_cmp(&a.revenue)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.segment.cmp(&b.segment))
}

#[derive(Debug, Clone)]
pub struct DataSummarizer {
    anomaly_sigma: f64,
    drain_min_spend_share: f64,
    drain_max_roas: f64,
}

impl Default for DataSummarizer {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

impl DataSummarizer {
    pub fn new(anomaly_sigma: f64) -> Self {
        let defaults = AnalysisConfig::default();
        Self {
            anomaly_sigma,
            drain_min_spend_share: defaults.budget_drain_min_spend_share,
            drain_max_roas: defaults.budget_drain_max_roas,
        }
    }

    /// Flag creative types above `min_spend_share` of spend with ROAS below `max_roas`.
    pub fn with_budget_drain(mut self, min_spend_share: f64, max_roas: f64) -> Self {
        self.drain_min_spend_share = min_spend_share;
        self.drain_max_roas = max_roas;
        self
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::new(config.anomaly_sigma).with_budget_drain(
            config.budget_drain_min_spend_share,
            config.budget_drain_max_roas,
        )
    }

    /// Summarize every valid record of `records`.
    pub fn summarize(&self, records: &RecordSet) -> DataSummary {
        let rows = records.records();

        let mut overall = Totals::default();
        let mut per_dimension: BTreeMap<Dimension, BTreeMap<&str, Totals>> = BTreeMap::new();
        let mut per_day: BTreeMap<NaiveDate, Totals> = BTreeMap::new();
        let mut per_pairing: BTreeMap<(&str, &str), Totals> = BTreeMap::new();
        let mut campaigns = BTreeSet::new();

        for record in rows {
            overall.add(record);
            for dim in Dimension::ALL {
                per_dimension
                    .entry(dim)
                    .or_default()
                    .entry(record.segment(dim))
                    .or_default()
                    .add(record);
            }
            per_day.entry(record.date).or_default().add(record);
            per_pairing
                .entry((record.creative_type.as_str(), record.platform.as_str()))
                .or_default()
                .add(record);
            campaigns.insert(record.campaign_name.clone());
        }

        let total_spend = overall.spend;
        let dimensions: BTreeMap<Dimension, Vec<SegmentMetrics>> = per_dimension
            .into_iter()
            .map(|(dim, segments)| {
                let mut metrics: Vec<SegmentMetrics> = segments
                    .iter()
                    .map(|(name, totals)| totals.finish(*name, total_spend))
                    .collect();
                metrics.sort_by(by_revenue_desc);
                (dim, metrics)
            })
            .collect();

        let date_range = match (per_day.keys().next(), per_day.keys().next_back()) {
            (Some(start), Some(end)) => Some(DateRange {
                start: *start,
                end: *end,
            }),
            _ => None,
        };

        let daily: Vec<DailyMetrics> = per_day
            .iter()
            .map(|(date, totals)| DailyMetrics {
                date: *date,
                spend: totals.spend,
                revenue: totals.revenue,
                roas: totals.roas(),
                ctr: totals.ctr(),
            })
            .collect();

        let anomalies = self.detect_anomalies(&dimensions);
        let budget_drains = self.detect_budget_drains(&dimensions);
        let trends = detect_trends(&per_day.values().cloned().collect::<Vec<_>>());
        let best_segment = best_pairing(&per_pairing, total_spend);

        let summary = DataSummary {
            total_rows: records.total_rows(),
            valid_rows: rows.len(),
            rejected_rows: records.rejected().len(),
            date_range,
            campaigns: campaigns.into_iter().collect(),
            overall: overall.finish("all", total_spend),
            dimensions,
            anomalies,
            daily,
            trends,
            budget_drains,
            best_segment,
            source_fingerprint: records.fingerprint(),
        };

        info!(
            rows = summary.valid_rows,
            rejected = summary.rejected_rows,
            anomalies = summary.anomalies.len(),
            trends = summary.trends.len(),
            budget_drains = summary.budget_drains.len(),
            "[Summarizer] Data summary computed"
        );
        summary
    }

    /// Segments deviating from the other segments of their dimension by
    /// more than `anomaly_sigma` standard deviations, largest deviation first.
    ///
    /// Each segment is scored against the mean and spread of the remaining
    /// segments of the same dimension.
    fn detect_anomalies(
        &self,
        dimensions: &BTreeMap<Dimension, Vec<SegmentMetrics>>,
    ) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();

        for (dim, segments) in dimensions {
            for metric in Metric::ALL {
                let defined: Vec<(&SegmentMetrics, f64)> = segments
                    .iter()
                    .filter_map(|s| s.metric(metric).value().map(|v| (s, v)))
                    .collect();
                if defined.len() < MIN_SEGMENTS_FOR_ANOMALIES {
                    continue;
                }

                for (i, (segment, value)) in defined.iter().enumerate() {
                    let others: Vec<f64> = defined
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, (_, v))| *v)
                        .collect();
                    let Some((mean, spread)) = population_mean_std(&others) else {
                        continue;
                    };
                    let std_dev = spread.max(MIN_RELATIVE_SPREAD * mean.abs());
                    if std_dev <= f64::EPSILON {
                        continue;
                    }

                    let z_score = (value - mean) / std_dev;
                    if z_score.abs() > self.anomaly_sigma {
                        debug!(
                            dimension = %dim,
                            segment = %segment.segment,
                            metric = %metric,
                            z_score,
                            "[Summarizer] Anomalous segment"
                        );
                        anomalies.push(Anomaly {
                            dimension: *dim,
                            segment: segment.segment.clone(),
                            metric,
                            value: *value,
                            dimension_mean: mean,
                            std_dev,
                            z_score,
                            severity: AnomalySeverity::classify(z_score.abs(), self.anomaly_sigma),
                        });
                    }
                }
            }
        }

        anomalies.sort_by(|a, b| {
            b.magnitude()
                .partial_cmp(&a.magnitude())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.dimension.cmp(&b.dimension))
                .then_with(|| a.metric.cmp(&b.metric))
                .then_with(|| a.segment.cmp(&b.segment))
        });
        anomalies
    }

    /// Creative types holding more than the configured share of spend while
    /// returning less than the configured ROAS, largest share first.
    fn detect_budget_drains(
        &self,
        dimensions: &BTreeMap<Dimension, Vec<SegmentMetrics>>,
    ) -> Vec<BudgetDrain> {
        let Some(creatives) = dimensions.get(&Dimension::CreativeType) else {
            return Vec::new();
        };
        let mut drains: Vec<BudgetDrain> = creatives
            .iter()
            .filter_map(|segment| {
                let share = segment.spend_share.value()?;
                let roas = segment.roas.value()?;
                (share > self.drain_min_spend_share && roas < self.drain_max_roas).then(|| {
                    BudgetDrain {
                        creative_type: segment.segment.clone(),
                        spend: segment.spend,
                        spend_share: share,
                        roas,
                    }
                })
            })
            .collect();
        drains.sort_by(|a, b| {
            b.spend_share
                .partial_cmp(&a.spend_share)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.creative_type.cmp(&b.creative_type))
        });
        for drain in &drains {
            debug!(
                creative_type = %drain.creative_type,
                spend_share = drain.spend_share,
                roas = drain.roas,
                "[Summarizer] Budget drain"
            );
        }
        drains
    }
}

fn window_totals(days: &[Totals]) -> Totals {
    let mut totals = Totals::default();
    for day in days {
        totals.merge(day);
    }
    totals
}

/// Compare the first and last `TREND_WINDOW_DAYS` of the daily series.
fn detect_trends(days: &[Totals]) -> Vec<TrendSignal> {
    if days.len() < TREND_WINDOW_DAYS * 2 {
        return Vec::new();
    }
    let early = window_totals(&days[..TREND_WINDOW_DAYS]);
    let recent = window_totals(&days[days.len() - TREND_WINDOW_DAYS..]);

    let checks = [
        (TrendKind::RoasDecline, Metric::Roas, early.roas(), recent.roas(), ROAS_DECLINE_THRESHOLD),
        (TrendKind::CreativeFatigue, Metric::Ctr, early.ctr(), recent.ctr(), FATIGUE_THRESHOLD),
    ];

    checks
        .into_iter()
        .filter_map(|(kind, metric, early, recent, threshold)| {
            let (early, recent) = (early.value()?, recent.value()?);
            if early <= 0.0 {
                return None;
            }
            let relative_change = (recent - early) / early;
            (relative_change < -threshold).then_some(TrendSignal {
                kind,
                metric,
                early_value: early,
                recent_value: recent,
                relative_change,
                window_days: TREND_WINDOW_DAYS,
            })
        })
        .collect()
}

fn best_pairing(
    pairings: &BTreeMap<(&str, &str), Totals>,
    total_spend: f64,
) -> Option<SegmentHighlight> {
    pairings
        .iter()
        .filter_map(|((creative, platform), totals)| {
            let share = Ratio::of(totals.spend, total_spend).value()?;
            let roas = totals.roas().value()?;
            (share >= HIGHLIGHT_MIN_SPEND_SHARE).then(|| SegmentHighlight {
                creative_type: creative.to_string(),
                platform: platform.to_string(),
                roas,
                spend_share: share,
            })
        })
        // Ties keep the first pairing in key order
        .fold(None, |best: Option<SegmentHighlight>, candidate| match best {
            Some(b) if b.roas >= candidate.roas => Some(b),
            _ => Some(candidate),
        })
}

#[async_trait]
impl Stage for DataSummarizer {
    type Input = Arc<RecordSet>;
    type Output = DataSummary;

    fn kind(&self) -> StageKind {
        StageKind::Summarizer
    }

    async fn run(&self, input: Self::Input) -> AppResult<Self::Output> {
        Ok(self.summarize(&input))
    }
}
