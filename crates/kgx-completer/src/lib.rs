//! Async JSON-completion abstraction (C3) over LLM providers.
//!
//! Generalizes the teacher's blocking `LlmProvider` trait
//! (`rpg-lift::provider`) and `LlmClient` response-parsing helpers
//! (`rpg-encoder::llm`) into a single async `JsonCompleter` trait, since
//! `kgx-orchestrate` dispatches many batches concurrently.

mod completer;
mod error;
mod mock;
mod providers;

pub use completer::{complete_with_retry, parse_json_response, strip_think_blocks, CompletionRequest, JsonCompleter};
pub use error::CompleterError;
pub use mock::MockCompleter;
pub use providers::{from_env, AnthropicCompleter, OpenAiCompatibleCompleter};
