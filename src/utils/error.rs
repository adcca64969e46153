//! Error Handling
//!
//! Unified error type for the analysis services.
//! Uses thiserror for ergonomic error definitions.

use insight_cascade_core::CoreError;
use insight_cascade_llm::LlmError;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Plan has a cycle, a duplicate step, or a dangling dependency
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// A proposed hypothesis could not be tested as stated
    #[error("Malformed hypothesis {id}: {reason}")]
    MalformedHypothesis { id: String, reason: String },

    /// A comparison group is below the minimum sample size
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// The completion service failed after all retries
    #[error("External service failure: {0}")]
    ExternalService(#[from] LlmError),

    /// Input rows are unusable
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// The run was cancelled by its caller
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Create an invalid plan error
    pub fn invalid_plan(msg: impl Into<String>) -> Self {
        Self::InvalidPlan(msg.into())
    }

    /// Create a malformed hypothesis error
    pub fn malformed_hypothesis(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedHypothesis {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an insufficient data error
    pub fn insufficient_data(msg: impl Into<String>) -> Self {
        Self::InsufficientData(msg.into())
    }

    /// Create a data integrity error
    pub fn data_integrity(msg: impl Into<String>) -> Self {
        Self::DataIntegrity(msg.into())
    }

    /// Create a cancellation error
    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error ends the run.
    ///
    /// Malformed hypotheses and insufficient data are recorded and the run
    /// continues; a single rejected row is only fatal once the rejection
    /// ceiling is crossed, which is reported as its own `DataIntegrity` error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AppError::MalformedHypothesis { .. } | AppError::InsufficientData(_)
        )
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Convert AppError to a string
impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.to_string()
    }
}
