//! `DocumentSource` (spec.md §6): the external collaborator that turns a
//! document into Markdown, whole or chunked. No implementation ships here —
//! document-to-Markdown conversion is explicitly out of scope (spec.md §1) —
//! but [`crate::testing::StaticDocumentSource`] provides an in-memory
//! fixture for tests.

use kgx_batch::ChunkMeta;

/// Supplies document text to the orchestrator: whole (direct contract) or
/// pre-chunked with token estimates (delta/staged contracts).
pub trait DocumentSource: Send + Sync {
    /// The full document as one Markdown string.
    fn to_full_markdown(&self) -> String;

    /// The document split into token-annotated chunks. `chunk_max_tokens`
    /// is a hint to the source's own chunking strategy; the real budget
    /// is still enforced downstream by `kgx_batch::ChunkBatcher`.
    fn to_chunks(&self, chunk_max_tokens: usize) -> Vec<ChunkMeta>;
}
