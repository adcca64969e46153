//! Orchestrator Module
//!
//! Runs the analysis state machine over the plan, summary, hypothesis and
//! recommendation stages, with cancellation and a run-wide time budget.

pub mod service;
pub mod stage;
pub mod state;

pub use service::{Orchestrator, RunFailure, RunOutcome};
pub use stage::{Stage, StageKind};
pub use state::{OrchestratorPhase, ReplanRecord, RunState, TraceEvent, TraceKind};
