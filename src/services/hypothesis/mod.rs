//! Hypothesis Service
//!
//! - Proposal of comparison hypotheses through the completion service
//! - Candidate checks against the data summary
//! - Concurrent statistical testing of proposed hypotheses

pub mod engine;
pub mod prompts;

pub use engine::{
    HypothesisBatch, HypothesisCandidate, HypothesisEngine, HypothesisTester, Proposal,
    ProposalRequest, HYPOTHESES_KIND,
};
