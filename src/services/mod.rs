//! Services
//!
//! Analysis stages and the orchestrator that sequences them.

pub mod hypothesis;
pub mod orchestrator;
pub mod plan_mode;
pub mod recommender;
pub mod stats;
pub mod summarizer;

pub use hypothesis::{HypothesisEngine, HypothesisTester};
pub use orchestrator::{Orchestrator, OrchestratorPhase, RunOutcome, RunState};
pub use plan_mode::{PlanManager, TaskPlan};
pub use recommender::Recommender;
pub use stats::StatisticalValidator;
pub use summarizer::DataSummarizer;
