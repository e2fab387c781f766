//! Error taxonomy for `kgx-core` (spec.md §7).

/// Errors surfaced by schema compilation, node identity, and configuration.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("configuration error: {details}")]
    ConfigurationError { details: String },

    #[error("schema cycle detected: {details}")]
    SchemaCycle { details: String },

    #[error("chunk of {tokens} tokens exceeds the batch budget of {budget} tokens")]
    OversizedChunk { tokens: usize, budget: usize },

    #[error("path '{path}' is not present in the catalog")]
    UnknownPath { path: String },

    #[error("parent for node at '{path}' with ids {ids:?} could not be resolved or salvaged")]
    ParentLookupMiss { path: String, ids: Vec<(String, String)> },
}
