//! A fixture completer for tests in `kgx-extract` and `kgx-orchestrate`:
//! returns a queued sequence of canned responses instead of calling a
//! network provider.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::completer::{CompletionRequest, JsonCompleter};
use crate::error::CompleterError;

/// Replays a fixed queue of responses, one per call, in order.
pub struct MockCompleter {
    responses: Mutex<Vec<Result<Value, CompleterError>>>,
    calls: Mutex<Vec<CompletionRequest>>,
    delay: Option<std::time::Duration>,
    context_limit: usize,
}

impl MockCompleter {
    /// `responses` is consumed front-to-back; the last entry repeats
    /// once exhausted so tests with unknown call counts don't panic.
    pub fn new(responses: Vec<Result<Value, CompleterError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
            delay: None,
            context_limit: 8_000,
        }
    }

    /// Sleeps for `delay` before returning each response, to exercise
    /// `CompletionRequest::deadline` handling in tests.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_context_limit(mut self, context_limit: usize) -> Self {
        self.context_limit = context_limit;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock completer mutex poisoned").len()
    }
}

#[async_trait]
impl JsonCompleter for MockCompleter {
    async fn complete(&self, request: CompletionRequest) -> Result<Value, CompleterError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().expect("mock completer mutex poisoned").push(request);

        let mut responses = self.responses.lock().expect("mock completer mutex poisoned");
        if responses.len() > 1 {
            responses.remove(0)
        } else {
            responses
                .first()
                .cloned()
                .unwrap_or_else(|| Err(CompleterError::CompletionFailure {
                    details: "mock completer has no queued responses".to_string(),
                }))
        }
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn context_limit(&self) -> usize {
        self.context_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn replays_queued_responses_in_order() {
        let mock = MockCompleter::new(vec![Ok(json!({"a": 1})), Ok(json!({"a": 2}))]);
        let request = CompletionRequest::new("sys", "user");
        let first = mock.complete(request.clone()).await.unwrap();
        let second = mock.complete(request).await.unwrap();
        assert_eq!(first["a"], 1);
        assert_eq!(second["a"], 2);
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn repeats_final_response_once_exhausted() {
        let mock = MockCompleter::new(vec![Ok(json!({"a": 1}))]);
        let request = CompletionRequest::new("sys", "user");
        mock.complete(request.clone()).await.unwrap();
        let second = mock.complete(request).await.unwrap();
        assert_eq!(second["a"], 1);
    }
}
