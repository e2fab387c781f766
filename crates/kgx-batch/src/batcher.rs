//! Greedy first-fit chunk batching with a tail-merge pass.
//!
//! Grounded on `rpg-encoder::lift::build_token_aware_batches`'s packing
//! loop (pack chunks into a running batch until the next chunk would
//! exceed the token budget, then start a new batch), generalized here
//! with a trailing-batch merge step and the `[Chunk i/n]` header /
//! `---CHUNK BOUNDARY---` text format pinned down by the original
//! `test_chunk_batcher.py` fixtures.

use serde::{Deserialize, Serialize};

const BOUNDARY_MARKER: &str = "---CHUNK BOUNDARY---";

/// One chunk of source text awaiting batching, carrying a precomputed
/// token estimate (produced upstream by the document chunker, outside
/// this crate's scope).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub text: String,
    pub page_numbers: Vec<usize>,
    pub token_count: usize,
}

/// A packed group of chunks, ready to hand to a [`JsonCompleter`] call.
///
/// [`JsonCompleter`]: https://docs.rs/kgx-completer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: usize,
    pub chunk_indices: Vec<usize>,
    pub combined_text: String,
    pub total_tokens: usize,
}

impl Batch {
    pub fn chunk_count(&self) -> usize {
        self.chunk_indices.len()
    }
}

/// A chunk whose own token count exceeds the batcher's budget. Batched
/// alone rather than dropped or treated as fatal (spec.md §4.2 "an
/// oversized chunk is signalled, not rejected").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OversizedChunk {
    pub chunk_index: usize,
    pub token_count: usize,
}

/// Packs [`ChunkMeta`] into token-bounded [`Batch`]es.
pub struct ChunkBatcher {
    context_limit: usize,
    system_prompt_tokens: usize,
    response_buffer_tokens: usize,
    merge_threshold: f64,
}

impl ChunkBatcher {
    pub fn new(context_limit: usize, system_prompt_tokens: usize, response_buffer_tokens: usize) -> Self {
        Self {
            context_limit,
            system_prompt_tokens,
            response_buffer_tokens,
            merge_threshold: 0.85,
        }
    }

    pub fn with_merge_threshold(mut self, merge_threshold: f64) -> Self {
        self.merge_threshold = merge_threshold;
        self
    }

    /// Tokens left for chunk content once the system prompt and the
    /// model's response headroom are reserved.
    pub fn available_tokens(&self) -> usize {
        self.context_limit
            .saturating_sub(self.system_prompt_tokens)
            .saturating_sub(self.response_buffer_tokens)
    }

    /// Pack `chunks` (in order) into batches, preserving chunk order both
    /// within and across batches. Returns the batches plus any chunks
    /// that alone exceed the budget (still included, solo, in a batch).
    pub fn batch_chunks(&self, chunks: &[ChunkMeta]) -> (Vec<Batch>, Vec<OversizedChunk>) {
        let budget = self.available_tokens();
        let header_overhead = estimate_tokens("[Chunk 1/1]\n");
        let boundary_overhead = estimate_tokens(&format!("\n\n{BOUNDARY_MARKER}\n\n"));

        let mut oversized = Vec::new();
        let mut raw_batches: Vec<Vec<usize>> = Vec::new();
        let mut current: Vec<usize> = Vec::new();
        let mut current_tokens = 0usize;

        for (index, chunk) in chunks.iter().enumerate() {
            if chunk.token_count > budget {
                oversized.push(OversizedChunk {
                    chunk_index: index,
                    token_count: chunk.token_count,
                });
            }

            let marginal_if_appended = header_overhead
                + chunk.token_count
                + if current.is_empty() { 0 } else { boundary_overhead };

            if !current.is_empty() && current_tokens + marginal_if_appended > budget {
                raw_batches.push(std::mem::take(&mut current));
                current_tokens = 0;
            }

            let marginal = header_overhead + chunk.token_count + if current.is_empty() { 0 } else { boundary_overhead };
            current_tokens += marginal;
            current.push(index);
        }
        if !current.is_empty() {
            raw_batches.push(current);
        }

        merge_trailing_batches(&mut raw_batches, chunks, budget, self.merge_threshold, header_overhead, boundary_overhead);

        let batches = raw_batches
            .into_iter()
            .enumerate()
            .map(|(batch_id, chunk_indices)| build_batch(batch_id, chunk_indices, chunks))
            .collect();

        (batches, oversized)
    }
}

/// Folds a trailing batch into its predecessor while it remains under
/// `merge_threshold * budget` and the merge still fits the budget.
fn merge_trailing_batches(
    raw_batches: &mut Vec<Vec<usize>>,
    chunks: &[ChunkMeta],
    budget: usize,
    merge_threshold: f64,
    header_overhead: usize,
    boundary_overhead: usize,
) {
    let threshold_tokens = (budget as f64 * merge_threshold) as usize;

    loop {
        if raw_batches.len() < 2 {
            return;
        }
        let last = raw_batches.last().expect("len checked above");
        let last_tokens = batch_tokens(last, chunks, header_overhead, boundary_overhead);
        if last_tokens >= threshold_tokens {
            return;
        }

        let prev = &raw_batches[raw_batches.len() - 2];
        let prev_tokens = batch_tokens(prev, chunks, header_overhead, boundary_overhead);
        let merged_tokens = prev_tokens + boundary_overhead + last_tokens;
        if merged_tokens > budget {
            return;
        }

        let last = raw_batches.pop().expect("len checked above");
        raw_batches.last_mut().expect("len checked above").extend(last);
    }
}

fn batch_tokens(indices: &[usize], chunks: &[ChunkMeta], header_overhead: usize, boundary_overhead: usize) -> usize {
    indices
        .iter()
        .enumerate()
        .map(|(position, &chunk_index)| {
            header_overhead
                + chunks[chunk_index].token_count
                + if position == 0 { 0 } else { boundary_overhead }
        })
        .sum()
}

fn build_batch(batch_id: usize, chunk_indices: Vec<usize>, chunks: &[ChunkMeta]) -> Batch {
    let total = chunk_indices.len();
    let combined_text = chunk_indices
        .iter()
        .enumerate()
        .map(|(position, &chunk_index)| format!("[Chunk {}/{}]\n{}", position + 1, total, chunks[chunk_index].text))
        .collect::<Vec<_>>()
        .join(&format!("\n\n{BOUNDARY_MARKER}\n\n"));
    let total_tokens = chunk_indices.iter().map(|&i| chunks[i].token_count).sum();

    Batch {
        batch_id,
        chunk_indices,
        combined_text,
        total_tokens,
    }
}

/// Fallback token estimator for the fixed-text overhead of batch
/// headers and boundary markers (chars / 4, rounded up by one).
fn estimate_tokens(text: &str) -> usize {
    text.len() / 4 + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str, tokens: usize) -> ChunkMeta {
        ChunkMeta {
            text: text.to_string(),
            page_numbers: vec![1],
            token_count: tokens,
        }
    }

    #[test]
    fn single_small_batch_combines_all_chunks() {
        let batcher = ChunkBatcher::new(1000, 0, 0);
        let chunks = vec![chunk("alpha", 50), chunk("beta", 50)];
        let (batches, oversized) = batcher.batch_chunks(&chunks);
        assert_eq!(batches.len(), 1);
        assert!(oversized.is_empty());
        assert_eq!(batches[0].chunk_indices, vec![0, 1]);
        assert!(batches[0].combined_text.contains("[Chunk 1/2]"));
        assert!(batches[0].combined_text.contains("[Chunk 2/2]"));
        assert!(batches[0].combined_text.contains(BOUNDARY_MARKER));
    }

    #[test]
    fn splits_into_multiple_batches_when_budget_exceeded() {
        let batcher = ChunkBatcher::new(1000, 250, 250); // available = 500
        let chunks = vec![chunk("first", 400), chunk("second", 300)];
        let (batches, _) = batcher.batch_chunks(&chunks);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].chunk_indices, vec![0]);
        assert_eq!(batches[1].chunk_indices, vec![1]);
    }

    #[test]
    fn preserves_chunk_order_across_batches() {
        let batcher = ChunkBatcher::new(1000, 400, 400); // available = 200
        let chunks = vec![chunk("a", 150), chunk("b", 150), chunk("c", 150)];
        let (batches, _) = batcher.batch_chunks(&chunks);
        let ordered: Vec<usize> = batches.iter().flat_map(|b| b.chunk_indices.clone()).collect();
        assert_eq!(ordered, vec![0, 1, 2]);
    }

    #[test]
    fn merges_undersized_trailing_batch_into_predecessor() {
        // available = 600. First batch fills to ~500, second chunk alone
        // (80 tokens) is well under 0.85 * 600 and fits merged.
        let batcher = ChunkBatcher::new(1000, 200, 200);
        let chunks = vec![chunk("big", 500), chunk("tail", 80)];
        let (batches, _) = batcher.batch_chunks(&chunks);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].chunk_indices, vec![0, 1]);
    }

    #[test]
    fn leaves_trailing_batch_unmerged_when_it_would_overflow() {
        let batcher = ChunkBatcher::new(1000, 250, 250); // available = 500
        let chunks = vec![chunk("first", 400), chunk("second", 300)];
        let (batches, _) = batcher.batch_chunks(&chunks);
        // 300 tokens is below 0.85*500=425, but 400+overhead+300 > 500, so no merge.
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn oversized_chunk_is_batched_alone_and_flagged() {
        let batcher = ChunkBatcher::new(1000, 400, 400); // available = 200
        let chunks = vec![chunk("huge", 500)];
        let (batches, oversized) = batcher.batch_chunks(&chunks);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].chunk_indices, vec![0]);
        assert_eq!(oversized.len(), 1);
        assert_eq!(oversized[0].chunk_index, 0);
    }

    #[test]
    fn batching_is_deterministic() {
        let batcher = ChunkBatcher::new(1000, 250, 250);
        let chunks = vec![chunk("a", 200), chunk("b", 150), chunk("c", 100), chunk("d", 90)];
        let (first, _) = batcher.batch_chunks(&chunks);
        let (second, _) = batcher.batch_chunks(&chunks);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_input_produces_no_batches() {
        let batcher = ChunkBatcher::new(1000, 0, 0);
        let (batches, oversized) = batcher.batch_chunks(&[]);
        assert!(batches.is_empty());
        assert!(oversized.is_empty());
    }
}
