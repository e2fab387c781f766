//! The `JsonCompleter` abstraction (spec.md §4.3/§4.4).
//!
//! Generalizes the teacher's blocking `ureq`-based `LlmProvider` trait
//! (`rpg-lift::provider::LlmProvider`) into an async trait, since the
//! orchestrator drives many batches concurrently via bounded `tokio`
//! tasks rather than one call at a time. Response parsing (think-block
//! stripping, fenced-JSON extraction) follows the teacher's
//! `rpg-encoder::llm::parse_json_response` / `strip_think_blocks`.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CompleterError;

/// One completion call: the prompts, sampling knobs, and (optionally) a
/// JSON schema the completer should enforce server-side.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub json_schema: Option<Value>,
    /// Per-call deadline (spec.md §5: "each `JsonCompleter.complete` call
    /// enforces a deadline"). `None` disables the timeout wrapper.
    pub deadline: Option<std::time::Duration>,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature: 0.0,
            max_tokens: 4096,
            json_schema: None,
            deadline: None,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.json_schema = Some(schema);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_deadline(mut self, deadline: std::time::Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A backend capable of turning a prompt into a parsed JSON value.
/// Implemented per-provider in [`crate::providers`]; `kgx-extract` and
/// `kgx-orchestrate` depend only on this trait, never on a concrete
/// provider.
#[async_trait]
pub trait JsonCompleter: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Value, CompleterError>;

    /// Human-readable identifier used in trace events and error
    /// messages (e.g. `"anthropic:claude-opus-4"`).
    fn name(&self) -> &str;

    /// Total context window, in tokens, this completer's backing model
    /// supports. `kgx-batch`'s `ChunkBatcher` subtracts system-prompt and
    /// response-reserve overhead from this to derive the chunk budget.
    fn context_limit(&self) -> usize;
}

/// Retries a completion call, raising the sampling temperature on each
/// attempt so a retry is not a verbatim repeat of a failed call. Mirrors
/// `rpg-encoder::llm::complete_with_retry`'s escalation, generalized
/// over any [`JsonCompleter`].
pub async fn complete_with_retry(
    completer: &dyn JsonCompleter,
    mut request: CompletionRequest,
    max_retries: usize,
) -> Result<Value, CompleterError> {
    let base_temperature = request.temperature;
    let mut last_err = None;

    for attempt in 0..=max_retries {
        request.temperature = base_temperature + (attempt as f32) * 0.2;
        match complete_once(completer, request.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                tracing::warn!(completer = completer.name(), attempt, error = %err, "completion attempt failed");
                last_err = Some(err);
            }
        }
    }

    Err(last_err.expect("loop runs at least once"))
}

/// Runs one completion call, enforcing `request.deadline` when set.
async fn complete_once(completer: &dyn JsonCompleter, request: CompletionRequest) -> Result<Value, CompleterError> {
    let Some(deadline) = request.deadline else {
        return completer.complete(request).await;
    };
    match tokio::time::timeout(deadline, completer.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(CompleterError::CompletionTimeout {
            seconds: deadline.as_secs(),
        }),
    }
}

/// Strips `<think>...</think>` reasoning blocks some providers prepend
/// to their response before the JSON payload.
pub fn strip_think_blocks(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        result.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => return result,
        }
    }
    result.push_str(rest);
    result
}

/// Extracts a single JSON value from raw completion text: unwraps a
/// fenced ```json code block when present, otherwise parses the
/// stripped text directly.
pub fn parse_json_response(raw: &str) -> Result<Value, CompleterError> {
    let stripped = strip_think_blocks(raw);
    let candidate = extract_fenced_json(&stripped).unwrap_or_else(|| stripped.trim().to_string());

    serde_json::from_str(&candidate).map_err(|err| CompleterError::ParseFailure {
        details: err.to_string(),
    })
}

fn extract_fenced_json(text: &str) -> Option<String> {
    let start_marker = text.find("```json").map(|i| i + "```json".len())?;
    let rest = &text[start_marker..];
    let end = rest.find("```")?;
    Some(rest[..end].trim().to_string())
}
