//! Ambient test scaffolding: an in-memory [`DocumentSource`] fixture
//! (SPEC_FULL.md §6), grounded on the teacher's convention of constructing
//! fixtures inline rather than hitting the network — the same convention
//! `kgx_completer::mock::MockCompleter` follows.

use kgx_batch::ChunkMeta;

use crate::document::DocumentSource;

/// A [`DocumentSource`] backed by pre-chunked, in-memory text.
/// `full_markdown` and `chunks` are independent: construct whichever the
/// contract under test needs.
pub struct StaticDocumentSource {
    full_markdown: String,
    chunks: Vec<ChunkMeta>,
}

impl StaticDocumentSource {
    pub fn new(full_markdown: impl Into<String>, chunks: Vec<ChunkMeta>) -> Self {
        Self {
            full_markdown: full_markdown.into(),
            chunks,
        }
    }

    /// A single chunk holding the whole text, with a naive token estimate
    /// (chars / 4 + 1, the same fallback `kgx_batch::ChunkBatcher` uses for
    /// fixed-text overhead).
    pub fn single_chunk(text: impl Into<String>) -> Self {
        let text = text.into();
        let token_count = text.len() / 4 + 1;
        let chunk = ChunkMeta {
            text: text.clone(),
            page_numbers: vec![1],
            token_count,
        };
        Self {
            full_markdown: text,
            chunks: vec![chunk],
        }
    }
}

impl DocumentSource for StaticDocumentSource {
    fn to_full_markdown(&self) -> String {
        self.full_markdown.clone()
    }

    fn to_chunks(&self, _chunk_max_tokens: usize) -> Vec<ChunkMeta> {
        self.chunks.clone()
    }
}
