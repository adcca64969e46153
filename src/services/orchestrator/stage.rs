//! Stage Trait
//!
//! Every agent role in a run is one of a closed set of stages sharing a
//! uniform run signature. The orchestrator drives them through the same
//! entry point, which is where cancellation and logging are applied.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::utils::error::AppResult;

/// The closed set of stage roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Planner,
    Summarizer,
    HypothesisProposer,
    HypothesisTester,
    Recommender,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Planner => write!(f, "planner"),
            StageKind::Summarizer => write!(f, "summarizer"),
            StageKind::HypothesisProposer => write!(f, "hypothesis_proposer"),
            StageKind::HypothesisTester => write!(f, "hypothesis_tester"),
            StageKind::Recommender => write!(f, "recommender"),
        }
    }
}

#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    fn kind(&self) -> StageKind;

    async fn run(&self, input: Self::Input) -> AppResult<Self::Output>;
}
