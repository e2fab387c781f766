//! The orchestrator's own catchall error (spec.md §7 `ExtractionFailure`).
//!
//! `extract()` itself never returns this — it always returns a whole
//! [`ExtractionResult`], folding failures into `errors` (spec.md §7). This
//! type exists for callers that prefer `Result`-based composition around
//! the pipeline, such as `kgx-cli`'s exit-code mapping, and for internal
//! early-outs before a partial result exists to return. Grounded on
//! `rpg-lift::pipeline::PipelineError`'s thiserror-with-partial-report
//! shape.

use crate::result::ExtractionResult;

#[derive(Debug, thiserror::Error)]
#[error("extraction failed: {details}")]
pub struct ExtractionFailure {
    pub details: String,
    pub partial: Box<ExtractionResult>,
}

impl ExtractionFailure {
    pub fn new(details: impl Into<String>, partial: ExtractionResult) -> Self {
        Self {
            details: details.into(),
            partial: Box::new(partial),
        }
    }

    /// Unwraps into the partial result, stamping `details` onto its
    /// error list first.
    pub fn into_result(self) -> ExtractionResult {
        let mut result = *self.partial;
        result.errors.push(self.details);
        result
    }
}
