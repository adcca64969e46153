//! Plan Core Types
//!
//! An analysis plan is a DAG of named steps. Steps are grouped into
//! dependency-resolved batches; revisions append steps and record why.

use std::collections::{HashMap, HashSet};
use std::fmt;

use insight_cascade_core::Dimension;
use serde::{Deserialize, Serialize};

use crate::utils::error::{AppError, AppResult};

pub const SUMMARIZE_STEP: &str = "summarize";
pub const GENERATE_STEP: &str = "generate-hypotheses";
pub const BROADEN_STEP: &str = "broaden-hypotheses";
pub const VALIDATE_STEP: &str = "validate";
pub const RECOMMEND_STEP: &str = "recommend";

// ============================================================================
// Plan Step Types
// ============================================================================

/// What a step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "dimension", rename_all = "snake_case")]
pub enum StepKind {
    Summarize,
    GenerateHypotheses,
    /// Direct hypothesis generation at one dimension.
    ExploreDimension(Dimension),
    /// Ask for more hypotheses per round.
    BroadenHypotheses,
    Validate,
    Recommend,
}

/// A single step in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    /// Unique step identifier (e.g., "explore-country")
    pub id: String,
    pub kind: StepKind,
    pub title: String,
    pub description: String,
    /// IDs of steps this step depends on
    pub dependencies: Vec<String>,
    /// Plan revision that introduced the step
    pub added_in_revision: u32,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, kind: StepKind, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            description: String::new(),
            dependencies: Vec::new(),
            added_in_revision: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.dependencies = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn in_revision(mut self, revision: u32) -> Self {
        self.added_in_revision = revision;
        self
    }
}

pub fn explore_step_id(dimension: Dimension) -> String {
    format!("explore-{}", dimension)
}

/// A batch of steps whose dependencies are all in earlier batches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanBatch {
    /// Batch index (0-based)
    pub index: usize,
    /// Step IDs in this batch
    pub step_ids: Vec<String>,
}

// ============================================================================
// Revision Types
// ============================================================================

/// Why validation asked for a new plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", content = "dimension", rename_all = "snake_case")]
pub enum ReplanReason {
    AllRejected,
    InsufficientValidated,
    DimensionUnexplored(Dimension),
}

impl fmt::Display for ReplanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplanReason::AllRejected => write!(f, "all_rejected"),
            ReplanReason::InsufficientValidated => write!(f, "insufficient_validated"),
            ReplanReason::DimensionUnexplored(d) => write!(f, "dimension_unexplored({})", d),
        }
    }
}

/// Validation outcome handed to the plan manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanFeedback {
    pub reason: ReplanReason,
    /// Dimensions that tested hypotheses already covered.
    pub covered_dimensions: Vec<Dimension>,
    pub validated_so_far: usize,
}

/// The change a revision made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RevisionChange {
    ExploreDimension { dimension: Dimension },
    Broaden { hypothesis_target: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRevision {
    pub revision: u32,
    pub reason: ReplanReason,
    pub change: RevisionChange,
    pub rationale: String,
}

// ============================================================================
// Plan Type
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPlan {
    pub id: String,
    pub query: String,
    pub revision: u32,
    pub steps: Vec<PlanStep>,
    pub batches: Vec<PlanBatch>,
    /// Dimensions the next hypothesis round concentrates on; empty means all.
    pub focus: Vec<Dimension>,
    /// Dimensions the plan has explicitly steered toward.
    pub explored_dimensions: Vec<Dimension>,
    pub hypothesis_target: usize,
    pub broadenings_left: u32,
    pub history: Vec<PlanRevision>,
}

impl TaskPlan {
    /// Dimensions not yet explored, in exploration order.
    pub fn unexplored(&self) -> Vec<Dimension> {
        Dimension::ALL
            .into_iter()
            .filter(|d| !self.explored_dimensions.contains(d))
            .collect()
    }

    /// Revision options still available.
    pub fn remaining_options(&self) -> usize {
        self.unexplored().len() + self.broadenings_left as usize
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_options() == 0
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Check step ids are unique and every dependency names a step.
pub fn validate_steps(steps: &[PlanStep]) -> AppResult<()> {
    let mut ids = HashSet::new();
    for step in steps {
        if !ids.insert(step.id.as_str()) {
            return Err(AppError::invalid_plan(format!("duplicate step id '{}'", step.id)));
        }
    }
    for step in steps {
        for dep in &step.dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(AppError::invalid_plan(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                )));
            }
        }
    }
    Ok(())
}

/// Calculate execution batches from step dependencies using Kahn's
/// topological sort. Steps with no dependencies go in batch 0, and so on.
pub fn calculate_plan_batches(steps: &[PlanStep]) -> AppResult<Vec<PlanBatch>> {
    validate_steps(steps)?;

    // Build in-degree map
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for step in steps {
        in_degree.entry(step.id.as_str()).or_insert(0);
        for dep in &step.dependencies {
            *in_degree.entry(step.id.as_str()).or_insert(0) += 1;
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(step.id.as_str());
        }
    }

    let mut batches = Vec::new();
    let mut remaining = in_degree;

    while !remaining.is_empty() {
        let mut batch_ids: Vec<String> = remaining
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id.to_string())
            .collect();

        if batch_ids.is_empty() {
            let mut cyclic: Vec<&str> = remaining.keys().copied().collect();
            cyclic.sort_unstable();
            return Err(AppError::invalid_plan(format!(
                "dependency cycle among steps: {}",
                cyclic.join(", ")
            )));
        }

        for id in &batch_ids {
            remaining.remove(id.as_str());
            if let Some(deps) = dependents.get(id.as_str()) {
                for dep_id in deps {
                    if let Some(deg) = remaining.get_mut(dep_id) {
                        *deg = deg.saturating_sub(1);
                    }
                }
            }
        }

        batch_ids.sort();
        batches.push(PlanBatch {
            index: batches.len(),
            step_ids: batch_ids,
        });
    }

    Ok(batches)
}
