//! HTTP Client Factory
//!
//! Builds the reqwest client shared by HTTP-backed providers.

use std::time::Duration;

use crate::types::{LlmError, LlmResult};

/// Build a `reqwest::Client` with an optional request timeout.
///
/// Proxy settings from the environment are ignored so runs behave the same on
/// every host.
pub fn build_http_client(timeout: Option<Duration>) -> LlmResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().no_proxy();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(|e| LlmError::ProviderUnavailable {
        message: format!("failed to build HTTP client: {}", e),
    })
}
