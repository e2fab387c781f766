//! Delta extraction pipeline: batch extraction (C4), IR normalization
//! (C5), graph merging (C6), template projection (C7), and the quality
//! gate (C8). Orchestration across chunks/batches/passes lives in
//! `kgx-orchestrate`; this crate implements the per-batch and
//! whole-graph transformations it drives.

pub mod dedup;
pub mod error;
pub mod extractor;
pub mod ir;
pub mod merger;
pub mod normalizer;
pub mod projector;
pub mod quality;

pub use dedup::DedupPolicy;
pub use error::ExtractError;
pub use extractor::{system_prompt_token_estimate, DeltaBatchExtractor, RESPONSE_BUFFER_TOKENS};
pub use ir::{BatchIr, NormalizedBatchIr, NormalizedNode, NormalizedRelationship, NormalizerStats, RawNode, RawRef, RawRelationship};
pub use merger::{GraphMerger, MergeStats};
pub use normalizer::{IrNormalizer, SiblingIndex};
pub use projector::{ProjectionStats, TemplateProjector};
pub use quality::{QualityGate, QualityReport};
