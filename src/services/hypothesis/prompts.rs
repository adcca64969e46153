//! Hypothesis Prompts
//!
//! Renders the data summary into a compact digest and builds the proposal
//! request around it.

use std::fmt::Write;

use insight_cascade_core::{Dimension, Metric};

use crate::models::{DataSummary, SegmentMetrics};

/// Anomalies listed in the digest.
const MAX_DIGEST_ANOMALIES: usize = 8;

pub const HYPOTHESIS_SYSTEM_PROMPT: &str = "You are a senior performance-marketing analyst. \
You propose testable hypotheses about advertising performance. Every hypothesis compares two \
groups of ONE dimension on ONE metric, using only segment names that appear in the data \
summary. Prefer comparisons suggested by anomalies, large spend, or declining trends.";

fn format_segment(line: &mut String, s: &SegmentMetrics) {
    let _ = writeln!(
        line,
        "  - {}: rows={} spend={:.2} revenue={:.2} roas={} ctr={} cpc={} cvr={} spend_share={}",
        s.segment,
        s.rows,
        s.spend,
        s.revenue,
        s.roas,
        s.ctr,
        s.cpc,
        s.conversion_rate,
        s.spend_share
    );
}

/// Plain-text digest of a summary, small enough for a prompt.
pub fn summary_digest(summary: &DataSummary) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Rows: {} valid, {} rejected",
        summary.valid_rows, summary.rejected_rows
    );
    if let Some(range) = summary.date_range {
        let _ = writeln!(
            out,
            "Period: {} to {} ({} days)",
            range.start,
            range.end,
            range.days()
        );
    }
    let _ = writeln!(out, "Campaigns: {}", summary.campaigns.len());
    let _ = writeln!(out, "Overall:");
    format_segment(&mut out, &summary.overall);

    for (dimension, segments) in &summary.dimensions {
        let _ = writeln!(out, "\nDimension {}:", dimension);
        for segment in segments {
            format_segment(&mut out, segment);
        }
    }

    if !summary.anomalies.is_empty() {
        let _ = writeln!(out, "\nAnomalies (|z| above threshold):");
        for a in summary.anomalies.iter().take(MAX_DIGEST_ANOMALIES) {
            let _ = writeln!(
                out,
                "  - {} {} {}: {:.4} vs others {:.4} (z={:.2})",
                a.dimension, a.segment, a.metric, a.value, a.dimension_mean, a.z_score
            );
        }
    }

    if !summary.trends.is_empty() {
        let _ = writeln!(out, "\nTrends:");
        for t in &summary.trends {
            let _ = writeln!(
                out,
                "  - {:?}: {} moved {:.1}% between the first and last {} days",
                t.kind,
                t.metric,
                t.relative_change * 100.0,
                t.window_days
            );
        }
    }

    if !summary.budget_drains.is_empty() {
        let _ = writeln!(out, "\nBudget drains (large spend share, weak ROAS):");
        for d in &summary.budget_drains {
            let _ = writeln!(
                out,
                "  - {}: {:.1}% of spend at roas {:.2}",
                d.creative_type,
                d.spend_share * 100.0,
                d.roas
            );
        }
    }

    if let Some(best) = &summary.best_segment {
        let _ = writeln!(
            out,
            "\nBest creative/platform pairing: {} on {} (roas {:.2}, {:.1}% of spend)",
            best.creative_type,
            best.platform,
            best.roas,
            best.spend_share * 100.0
        );
    }

    out
}

/// Build the user prompt for one proposal round.
pub fn proposal_prompt(
    summary: &DataSummary,
    query: &str,
    focus: &[Dimension],
    target: usize,
    already_tested: &[String],
) -> String {
    let mut prompt = format!("## Question\n{}\n\n## Data Summary\n{}\n", query, summary_digest(summary));

    let focus_list = if focus.is_empty() {
        Dimension::ALL.iter().map(Dimension::as_str).collect::<Vec<_>>()
    } else {
        focus.iter().map(Dimension::as_str).collect::<Vec<_>>()
    };
    let metrics: Vec<&str> = Metric::ALL
        .iter()
        .filter(|m| summary.metric_available(**m))
        .map(Metric::as_str)
        .collect();

    let _ = writeln!(
        prompt,
        "## Task\nPropose {} hypotheses. Focus on these dimensions: {}.",
        target,
        focus_list.join(", ")
    );
    let _ = writeln!(prompt, "Allowed metrics: {}.", metrics.join(", "));
    let _ = writeln!(
        prompt,
        "`group_b` may name another segment of the same dimension, or be omitted to compare \
         `group_a` against all other segments."
    );

    if !already_tested.is_empty() {
        let _ = writeln!(prompt, "\n## Already Tested (do not repeat)");
        for item in already_tested {
            let _ = writeln!(prompt, "- {}", item);
        }
    }

    prompt
}
