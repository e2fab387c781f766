//! Error taxonomy for `kgx-extract` (spec.md §7).

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error(transparent)]
    Core(#[from] kgx_core::CoreError),

    #[error(transparent)]
    Completer(#[from] kgx_completer::CompleterError),

    #[error("batch {batch_id} failed strict path validation: unknown path '{path}'")]
    StrictUnknownPath { batch_id: usize, path: String },

    #[error("completer response did not match the batch IR envelope: {details}")]
    MalformedEnvelope { details: String },

    #[error("quality gate failed after all gleaning passes: {}", .reasons.join("; "))]
    QualityGateFailure { reasons: Vec<String> },
}
