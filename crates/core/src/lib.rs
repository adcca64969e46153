//! Insight Cascade Core
//!
//! Foundational types shared by every crate in the workspace. This crate has
//! no dependency on the completion service or on the analysis services.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `config` - Analysis thresholds and budgets (`AnalysisConfig`, `AnalysisConfigBuilder`)
//! - `taxonomy` - Segmentation dimensions and test metrics (`Dimension`, `Metric`)

pub mod config;
pub mod error;
pub mod taxonomy;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Configuration ──────────────────────────────────────────────────────
pub use config::{AnalysisConfig, AnalysisConfigBuilder};

// ── Vocabulary ─────────────────────────────────────────────────────────
pub use taxonomy::{Dimension, Metric};
