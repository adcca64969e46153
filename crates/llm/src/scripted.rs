//! Scripted Provider
//!
//! An in-memory `LlmProvider` that replays canned completions in order and
//! records every request it receives. Used for offline dry runs and tests.
//!
//! Responses can be queued per response kind (matched against
//! `LlmRequestOptions::response_kind`); requests of a kind without its own
//! queue draw from the shared queue.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::provider::LlmProvider;
use crate::types::{
    LlmError, LlmRequestOptions, LlmResponse, LlmResult, Message, ProviderConfig, ProviderType,
};

const SCRIPTED_MODEL: &str = "scripted";

/// A request as seen by the scripted provider.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub system: Option<String>,
    pub response_kind: Option<String>,
}

impl RecordedRequest {
    /// Text of the last message in the request.
    pub fn last_message(&self) -> &str {
        self.messages.last().map(|m| m.content.as_str()).unwrap_or("")
    }
}

pub struct ScriptedProvider {
    config: ProviderConfig,
    shared: Mutex<VecDeque<LlmResult<String>>>,
    by_kind: Mutex<HashMap<String, VecDeque<LlmResult<String>>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    latency: Option<Duration>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ScriptedProvider {
    /// Create a provider that replays `responses` in order.
    pub fn new(responses: Vec<LlmResult<String>>) -> Self {
        Self {
            config: ProviderConfig {
                provider: ProviderType::Scripted,
                model: SCRIPTED_MODEL.to_string(),
                ..ProviderConfig::default()
            },
            shared: Mutex::new(responses.into()),
            by_kind: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            latency: None,
        }
    }

    /// Queue responses reserved for one response kind.
    pub fn with_kind(self, kind: impl Into<String>, responses: Vec<LlmResult<String>>) -> Self {
        lock(&self.by_kind).insert(kind.into(), responses.into());
        self
    }

    /// Delay every response, e.g. to exercise timeouts.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Snapshot of every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// Responses still queued across all queues.
    pub fn remaining(&self) -> usize {
        lock(&self.shared).len() + lock(&self.by_kind).values().map(VecDeque::len).sum::<usize>()
    }

    fn next_response(&self, kind: Option<&str>) -> Option<LlmResult<String>> {
        if let Some(kind) = kind {
            let mut by_kind = lock(&self.by_kind);
            if let Some(queue) = by_kind.get_mut(kind) {
                return queue.pop_front();
            }
        }
        lock(&self.shared).pop_front()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn send_message(
        &self,
        messages: Vec<Message>,
        system: Option<String>,
        request_options: LlmRequestOptions,
    ) -> LlmResult<LlmResponse> {
        let kind = request_options.response_kind.clone();
        lock(&self.requests).push(RecordedRequest {
            messages,
            system,
            response_kind: kind.clone(),
        });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.next_response(kind.as_deref()) {
            Some(Ok(text)) => Ok(LlmResponse::text(text, SCRIPTED_MODEL)),
            Some(Err(e)) => Err(e),
            None => Err(LlmError::InvalidRequest {
                message: format!(
                    "no scripted response left for kind '{}'",
                    kind.as_deref().unwrap_or("any")
                ),
            }),
        }
    }

    async fn health_check(&self) -> LlmResult<()> {
        Ok(())
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}
