//! Concrete [`JsonCompleter`] backends, grounded on
//! `rpg-lift::provider::{AnthropicProvider, OpenAiProvider}` re-expressed
//! against an async `reqwest::Client` instead of blocking `ureq`.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::completer::{parse_json_response, CompletionRequest, JsonCompleter};
use crate::error::CompleterError;

/// Calls the Anthropic Messages API.
pub struct AnthropicCompleter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    context_limit: usize,
}

impl AnthropicCompleter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
            context_limit: 200_000,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_context_limit(mut self, context_limit: usize) -> Self {
        self.context_limit = context_limit;
        self
    }
}

#[async_trait]
impl JsonCompleter for AnthropicCompleter {
    async fn complete(&self, request: CompletionRequest) -> Result<Value, CompleterError> {
        let body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system_prompt,
            "messages": [{ "role": "user", "content": request.user_prompt }],
        });

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|err| CompleterError::CompletionFailure { details: err.to_string() })?;

        if !response.status().is_success() {
            return Err(CompleterError::CompletionFailure {
                details: format!("anthropic returned status {}", response.status()),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| CompleterError::CompletionFailure { details: err.to_string() })?;

        let text = payload["content"][0]["text"]
            .as_str()
            .ok_or_else(|| CompleterError::ParseFailure {
                details: "anthropic response missing content[0].text".to_string(),
            })?;

        parse_json_response(text)
    }

    fn name(&self) -> &str {
        "anthropic"
    }

    fn context_limit(&self) -> usize {
        self.context_limit
    }
}

/// Calls any OpenAI-chat-completions-compatible endpoint (OpenAI itself,
/// or a locally hosted compatible server).
pub struct OpenAiCompatibleCompleter {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    context_limit: usize,
}

impl OpenAiCompatibleCompleter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
            context_limit: 128_000,
        }
    }

    pub fn with_context_limit(mut self, context_limit: usize) -> Self {
        self.context_limit = context_limit;
        self
    }
}

#[async_trait]
impl JsonCompleter for OpenAiCompatibleCompleter {
    async fn complete(&self, request: CompletionRequest) -> Result<Value, CompleterError> {
        let mut body = json!({
            "model": self.model,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
        });

        if request.json_schema.is_some() {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| CompleterError::CompletionFailure { details: err.to_string() })?;

        if !response.status().is_success() {
            return Err(CompleterError::CompletionFailure {
                details: format!("provider returned status {}", response.status()),
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| CompleterError::CompletionFailure { details: err.to_string() })?;

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| CompleterError::ParseFailure {
                details: "response missing choices[0].message.content".to_string(),
            })?;

        parse_json_response(text)
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn context_limit(&self) -> usize {
        self.context_limit
    }
}

/// Resolves a [`JsonCompleter`] from environment variables, in the same
/// provider-cascade order as `rpg-encoder::llm::providers::LlmProvider::from_env_and_config_async`:
/// Anthropic first, then any OpenAI-compatible endpoint. `KGX_MODEL`
/// overrides the model name for whichever provider is selected.
pub fn from_env() -> Result<Box<dyn JsonCompleter>, CompleterError> {
    if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
        let model = std::env::var("KGX_MODEL").unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string());
        return Ok(Box::new(AnthropicCompleter::new(api_key, model)));
    }

    if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
        let model = std::env::var("KGX_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        return Ok(Box::new(OpenAiCompatibleCompleter::new(api_key, model, base_url)));
    }

    Err(CompleterError::CompletionFailure {
        details: "no completer provider configured: set ANTHROPIC_API_KEY or OPENAI_API_KEY".to_string(),
    })
}
