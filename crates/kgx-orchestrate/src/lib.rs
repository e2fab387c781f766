//! Orchestrates the delta and staged extraction pipelines (C9/C10):
//! chunking, batching, extraction, normalization, merging, projection, the
//! quality gate, gleaning, and the delta→direct fallback.

pub mod document;
pub mod error;
pub mod orchestrator;
pub mod result;
pub mod staged;
pub mod state;

#[cfg(test)]
pub mod testing;

pub use document::DocumentSource;
pub use error::ExtractionFailure;
pub use orchestrator::extract;
pub use result::{ExtractionResult, ExtractionStats};
pub use state::OrchestratorState;
