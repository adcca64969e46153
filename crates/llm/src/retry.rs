//! Retry Policy
//!
//! Bounded retry with exponential backoff and a per-call timeout around
//! completion requests. Only errors classified retryable by
//! [`LlmError::is_retryable`] are attempted again.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use insight_cascade_core::AnalysisConfig;
use tokio::time::timeout;

use crate::provider::LlmProvider;
use crate::types::{LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message};

/// Attempt budget and pacing for completion requests.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Time allowed for a single provider call.
    pub call_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            call_timeout: Duration::from_secs(300),
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl From<&AnalysisConfig> for RetryPolicy {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            max_attempts: config.llm_max_attempts,
            call_timeout: config.llm_call_timeout(),
            initial_backoff: config.llm_initial_backoff(),
            ..Self::default()
        }
    }
}

impl RetryPolicy {
    /// Deterministic exponential schedule (no jitter) for one request.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(0.0)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Wait before the next attempt, honouring a server-requested delay.
    pub async fn pause(&self, schedule: &mut ExponentialBackoff, error: &LlmError) {
        let scheduled = schedule.next_backoff().unwrap_or(self.max_backoff);
        let delay = match error.retry_after_secs() {
            Some(secs) => scheduled.max(Duration::from_secs(secs as u64)),
            None => scheduled,
        };
        tokio::time::sleep(delay).await;
    }
}

/// Run one provider call under the policy's timeout.
pub async fn call_with_timeout(
    provider: &dyn LlmProvider,
    policy: &RetryPolicy,
    messages: Vec<Message>,
    system: Option<String>,
    options: LlmRequestOptions,
) -> LlmResult<LlmResponse> {
    match timeout(
        policy.call_timeout,
        provider.send_message(messages, system, options),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout {
            seconds: policy.call_timeout.as_secs(),
        }),
    }
}

/// Send a request, retrying transient failures within the attempt budget.
pub async fn send_with_retry(
    provider: &dyn LlmProvider,
    policy: &RetryPolicy,
    messages: Vec<Message>,
    system: Option<String>,
    options: LlmRequestOptions,
) -> LlmResult<LlmResponse> {
    let mut schedule = policy.backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = call_with_timeout(
            provider,
            policy,
            messages.clone(),
            system.clone(),
            options.clone(),
        )
        .await;

        match result {
            Ok(response) => return Ok(response),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= policy.max_attempts => {
                return Err(LlmError::RetriesExhausted {
                    attempts: attempt,
                    last_error: e.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    provider = provider.name(),
                    attempt,
                    max_attempts = policy.max_attempts,
                    "[Retry] Transient completion failure: {}",
                    e
                );
                policy.pause(&mut schedule, &e).await;
            }
        }
    }
}
