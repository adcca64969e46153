//! Structured Responses
//!
//! Requests whose answer must be a JSON object of a known shape. The prompt
//! carries the JSON schema of the expected type; the reply is extracted from
//! surrounding prose or markdown fences, deserialized, and checked by a
//! caller-supplied validator. A reply that fails any of these steps is sent
//! back with a repair prompt, within the same attempt budget that covers
//! transient transport failures.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::provider::LlmProvider;
use crate::retry::{call_with_timeout, RetryPolicy};
use crate::types::{LlmError, LlmRequestOptions, LlmResult, Message};

/// Temperature used when asking the model to repair a previous reply.
const REPAIR_TEMPERATURE: f32 = 0.0;

/// A request for one structured response.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// Short label of the response kind, e.g. `hypotheses`.
    pub kind: &'static str,
    pub system: String,
    pub prompt: String,
}

/// Pretty-printed JSON schema of `T`.
pub fn schema_description<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// Extract the first JSON object from model output.
///
/// Accepts a ```json fence, a bare ``` fence holding an object, or the span
/// from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<String> {
    if let Some(start) = text.find("```json") {
        let after_fence = &text[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return Some(after_fence[..end].trim().to_string());
        }
    }
    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        let after_lang = match after_fence.find('\n') {
            Some(nl) => &after_fence[nl + 1..],
            None => after_fence,
        };
        if let Some(end) = after_lang.find("```") {
            let content = after_lang[..end].trim();
            if content.starts_with('{') {
                return Some(content.to_string());
            }
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end > start {
        Some(text[start..=end].to_string())
    } else {
        None
    }
}

/// Parse model output into `T`, returning a human-readable reason on failure.
pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let json = extract_json_object(text).ok_or_else(|| "no JSON object found".to_string())?;
    serde_json::from_str(&json).map_err(|e| format!("JSON does not match the schema: {}", e))
}

/// Build the follow-up prompt asking the model to fix its previous reply.
pub fn build_repair_prompt(kind: &str, parse_error: &str) -> String {
    format!(
        "Your previous {} response could not be used.\n\n\
         Problem: {}\n\n\
         Respond again with ONLY one JSON object that follows the schema given earlier. \
         No explanatory text.",
        kind, parse_error
    )
}

fn with_schema<T: JsonSchema>(prompt: &str) -> String {
    format!(
        "{}\n\nRespond with a single JSON object matching this JSON schema:\n{}",
        prompt,
        schema_description::<T>()
    )
}

/// Send a structured request and return the first reply that parses and
/// passes `validate`.
///
/// Non-retryable provider errors are returned as-is. When every attempt
/// fails, the result is [`LlmError::RetriesExhausted`] carrying the last
/// failure.
pub async fn request_structured<T, F>(
    provider: &dyn LlmProvider,
    policy: &RetryPolicy,
    request: &StructuredRequest,
    validate: F,
) -> LlmResult<T>
where
    T: DeserializeOwned + JsonSchema,
    F: Fn(&T) -> Result<(), String>,
{
    let base = Message::user(with_schema::<T>(&request.prompt));
    let mut messages = vec![base.clone()];
    let mut schedule = policy.backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let options = LlmRequestOptions {
            response_kind: Some(request.kind.to_string()),
            temperature_override: if messages.len() > 1 {
                Some(REPAIR_TEMPERATURE)
            } else {
                None
            },
            ..Default::default()
        };

        let failure = match call_with_timeout(
            provider,
            policy,
            messages.clone(),
            Some(request.system.clone()),
            options,
        )
        .await
        {
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
            Ok(response) => {
                let text = response.content.unwrap_or_default();
                let parsed = parse_structured::<T>(&text)
                    .and_then(|value| validate(&value).map(|_| value));
                match parsed {
                    Ok(value) => {
                        debug!(kind = request.kind, attempt, "[Structured] Response accepted");
                        return Ok(value);
                    }
                    Err(reason) => {
                        messages = vec![
                            base.clone(),
                            Message::assistant(text),
                            Message::user(build_repair_prompt(request.kind, &reason)),
                        ];
                        LlmError::ParseError { message: reason }
                    }
                }
            }
        };

        if attempt >= policy.max_attempts {
            return Err(LlmError::RetriesExhausted {
                attempts: attempt,
                last_error: failure.to_string(),
            });
        }

        warn!(
            kind = request.kind,
            attempt,
            max_attempts = policy.max_attempts,
            "[Structured] Attempt failed, retrying: {}",
            failure
        );
        if !matches!(failure, LlmError::ParseError { .. }) {
            policy.pause(&mut schedule, &failure).await;
        }
    }
}
