//! Plan Mode Service
//!
//! Analysis plans as step DAGs with dependency-resolved batching, and the
//! manager that creates and revises them.

pub mod manager;
pub mod types;

pub use manager::{
    infer_focus, PlanCommand, PlanManager, PlanRevisionOutcome, RevisionSuggestion,
    PLAN_REVISION_KIND,
};
pub use types::{
    calculate_plan_batches, PlanBatch, PlanFeedback, PlanRevision, PlanStep, ReplanReason,
    RevisionChange, StepKind, TaskPlan,
};
