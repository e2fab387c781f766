//! Error taxonomy for completion calls (spec.md §7).

#[derive(Debug, Clone, thiserror::Error)]
pub enum CompleterError {
    #[error("completion request timed out after {seconds}s")]
    CompletionTimeout { seconds: u64 },

    #[error("completion request failed: {details}")]
    CompletionFailure { details: String },

    #[error("completer did not honor the requested JSON schema: {details}")]
    SchemaEnforcementFailure { details: String },

    #[error("could not parse a JSON object out of the completion response: {details}")]
    ParseFailure { details: String },
}
