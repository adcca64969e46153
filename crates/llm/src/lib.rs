//! Insight Cascade LLM
//!
//! Completion-service port for the analysis services:
//! - `LlmProvider` trait plus the Anthropic Messages API implementation
//! - a scripted in-memory provider for offline runs and tests
//! - per-call timeouts with bounded exponential-backoff retries
//! - structured (schema-described, validated) JSON responses with repair prompts

pub mod anthropic;
pub mod http_client;
pub mod provider;
pub mod retry;
pub mod scripted;
pub mod structured;
pub mod types;

// Re-export main types
pub use anthropic::AnthropicProvider;
pub use http_client::build_http_client;
pub use provider::LlmProvider;
pub use retry::{call_with_timeout, send_with_retry, RetryPolicy};
pub use scripted::{RecordedRequest, ScriptedProvider};
pub use structured::{
    extract_json_object, parse_structured, request_structured, schema_description,
    StructuredRequest,
};
pub use types::*;
