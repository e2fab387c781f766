//! Delta Batch Extractor (C4): renders the extraction prompt for one
//! batch, invokes a [`JsonCompleter`], and parses its response into a
//! raw [`BatchIr`] (spec.md §4.4).

use kgx_batch::Batch;
use kgx_completer::{complete_with_retry, CompletionRequest, JsonCompleter};
use kgx_core::PathCatalog;
use serde_json::json;

use crate::error::ExtractError;
use crate::ir::BatchIr;

const SYSTEM_PROMPT: &str = "\
You extract structured entities from document text into a closed catalog of paths. \
Catalog paths are closed: emit nodes only at the listed paths, never invent new ones. \
Identity fields must be stable across batches: reuse the exact same values when the same \
real-world entity recurs. List-entity parents must be referenced by {path, ids}, never by \
position. Properties other than identity fields are optional; omit what the text does not state.";

/// Upper bound on tokens the completer's JSON response may consume,
/// reserved out of the context limit alongside the system/catalog prompt
/// (spec.md §4.2 "context limit minus system/response reserve";
/// `test_chunk_batcher.py` always constructs its batcher with a non-zero
/// response reserve rather than zero).
pub const RESPONSE_BUFFER_TOKENS: usize = 1024;

/// Estimates the token cost of the fixed system prompt plus the rendered
/// catalog block for `catalog`, for reserving headroom against the chunk
/// batcher's budget before any chunk content is packed (spec.md §4.2).
pub fn system_prompt_token_estimate(catalog: &PathCatalog) -> usize {
    estimate_tokens(SYSTEM_PROMPT) + estimate_tokens(&render_catalog_block(catalog))
}

/// Fallback token estimator (chars / 4 + 1), matching the convention used
/// elsewhere in the codebase for text whose real token count has not been
/// precomputed upstream.
fn estimate_tokens(text: &str) -> usize {
    text.len() / 4 + 1
}

/// Drives one batch through C4: prompt rendering, completion, and
/// envelope parsing.
pub struct DeltaBatchExtractor {
    pass_retries: usize,
}

impl DeltaBatchExtractor {
    pub fn new(pass_retries: usize) -> Self {
        Self { pass_retries }
    }

    pub async fn extract_batch(
        &self,
        completer: &dyn JsonCompleter,
        batch: &Batch,
        catalog: &PathCatalog,
    ) -> Result<BatchIr, ExtractError> {
        let user_prompt = render_user_prompt(catalog, &batch.combined_text);
        let request = CompletionRequest::new(SYSTEM_PROMPT, user_prompt).with_schema(ir_envelope_schema());

        let value = complete_with_retry(completer, request, self.pass_retries).await?;
        parse_batch_ir(batch.batch_id, value)
    }
}

/// Renders the `path -> (id_field, ...)` catalog block the prompt uses
/// to tell the completer which paths and identity fields are legal.
pub fn render_catalog_block(catalog: &PathCatalog) -> String {
    catalog
        .paths
        .iter()
        .map(|path| {
            let label = if path.is_empty() { "<root>" } else { path.as_str() };
            let ids = catalog.id_fields(path).join(", ");
            format!("{label} -> ({ids})")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_user_prompt(catalog: &PathCatalog, batch_text: &str) -> String {
    format!(
        "Catalog:\n{}\n\nDocument batch:\n{}",
        render_catalog_block(catalog),
        batch_text
    )
}

/// The IR envelope schema handed to `JsonCompleter` (not the template
/// schema): a flat `{nodes, relationships}` shape.
fn ir_envelope_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "required": ["nodes"],
        "properties": {
            "nodes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["path"],
                    "properties": {
                        "path": { "type": "string" },
                        "ids": { "type": "object" },
                        "parent": {
                            "type": "object",
                            "properties": {
                                "path": { "type": "string" },
                                "ids": { "type": "object" }
                            }
                        },
                        "properties": { "type": "object" }
                    }
                }
            },
            "relationships": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["source", "target", "label"],
                    "properties": {
                        "source": { "type": "object" },
                        "target": { "type": "object" },
                        "label": { "type": "string" }
                    }
                }
            }
        }
    })
}

fn parse_batch_ir(batch_id: usize, value: serde_json::Value) -> Result<BatchIr, ExtractError> {
    let mut ir: BatchIr = serde_json::from_value(value).map_err(|err| ExtractError::MalformedEnvelope {
        details: err.to_string(),
    })?;
    ir.batch_id = batch_id;
    Ok(ir)
}
