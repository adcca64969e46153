//! Insight Cascade
//!
//! Planner/evaluator orchestration that turns ad-performance rows into
//! statistically validated insights and recommendations. It includes:
//! - Data models for records, summaries, hypotheses and reports
//! - Analysis services (summarizer, hypothesis engine, validator, recommender)
//! - The plan manager and the orchestrator state machine

pub mod models;
pub mod services;
pub mod utils;

pub use insight_cascade_core::{AnalysisConfig, AnalysisConfigBuilder, Dimension, Metric};
pub use insight_cascade_llm::{AnthropicProvider, LlmError, LlmProvider, ScriptedProvider};

pub use models::{AnalysisReport, DataSummary, Hypothesis, Insight, RawAdRow, Recommendation};
pub use services::orchestrator::{Orchestrator, OrchestratorPhase, RunOutcome};
pub use utils::error::{AppError, AppResult};
