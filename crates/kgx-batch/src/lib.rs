//! Chunk batching (C2): packs ordered text chunks into token-bounded
//! batches with tail merging and ordering preservation (spec.md §4.2).
//!
//! Grounded on `rpg-encoder::lift::build_token_aware_batches`'s greedy
//! token-budget packing loop, generalized with a `merge_threshold`-based
//! tail-merge pass and the `[Chunk i/n]` / `---CHUNK BOUNDARY---` text
//! format.

mod batcher;

pub use batcher::{Batch, ChunkBatcher, ChunkMeta};
