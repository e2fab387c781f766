//! Staged contract (C10): a three-pass extraction — discovery (coarse
//! per-path counts), identifier fill (identity values per instance,
//! capped by `staged.nodes_fill_cap`), then edge assembly reusing the
//! same single-batch delta machinery against a pre-populated registry
//! (spec.md §4.10). Grounded on `rpg-lift::pipeline::run_pipeline`'s
//! phase sequencing, with each LLM round trip routed through
//! `kgx_completer::complete_with_retry` rather than the teacher's
//! blocking `call_with_retry`.

use std::collections::BTreeMap;

use kgx_completer::{complete_with_retry, CompletionRequest, JsonCompleter};
use kgx_core::config::ExtractionConfig;
use kgx_core::{NodeFingerprint, NodeIdRegistry, PathCatalog, TraceEvent, TraceLog};
use serde_json::{json, Value};

use crate::document::DocumentSource;
use crate::orchestrator::run_single_batch;
use crate::result::ExtractionResult;
use crate::state::OrchestratorState;

const DISCOVERY_SYSTEM_PROMPT: &str = "\
You survey a document against a closed catalog of paths, without extracting full records yet. \
For each catalog path, report a coarse count of how many instances appear in the document. \
Do not invent paths outside the catalog.";

const IDENTIFIER_FILL_SYSTEM_PROMPT: &str = "\
You extract only the identity field values for instances at one catalog path, skipping all \
other properties. Identity values must be stable: the same real-world entity must get the same \
values every time it recurs in the document.";

/// Runs the three staged passes and returns the final result, with
/// `stats.passes == 3` regardless of how many instances each pass found.
pub async fn run(
    source: &dyn DocumentSource,
    catalog: &PathCatalog,
    completer: &dyn JsonCompleter,
    config: &ExtractionConfig,
    trace: &TraceLog,
) -> ExtractionResult {
    let markdown = source.to_full_markdown();
    let mut errors = Vec::new();

    let discovered = discovery_pass(catalog, completer, config, &markdown, trace, &mut errors).await;

    let registry = NodeIdRegistry::new();
    identifier_fill_pass(catalog, &registry, completer, config, &markdown, &discovered, trace, &mut errors).await;

    let mut result = run_single_batch(catalog, &registry, completer, config, &markdown, trace).await;
    result.stats.passes = 3;
    result.errors.extend(errors);
    result
}

/// Pass 1: a single completer call asking for per-path instance counts,
/// used only to scope pass 2 — never merged into the graph directly.
async fn discovery_pass(
    catalog: &PathCatalog,
    completer: &dyn JsonCompleter,
    config: &ExtractionConfig,
    markdown: &str,
    trace: &TraceLog,
    errors: &mut Vec<String>,
) -> BTreeMap<String, usize> {
    let catalog_block = catalog
        .non_root_paths()
        .map(|path| format!("{path} -> ({})", catalog.id_fields(path).join(", ")))
        .collect::<Vec<_>>()
        .join("\n");
    let user_prompt = format!(
        "Catalog paths:\n{catalog_block}\n\nReport counts as {{\"counts\": {{path: count}}}}.\n\nDocument:\n{markdown}"
    );

    let schema = json!({
        "type": "object",
        "properties": { "counts": { "type": "object" } },
        "required": ["counts"]
    });
    let request = CompletionRequest::new(DISCOVERY_SYSTEM_PROMPT, user_prompt).with_schema(schema);

    match complete_with_retry(completer, request, config.staged.pass_retries).await {
        Ok(value) => {
            let counts = parse_discovery_counts(catalog, &value);
            trace.record(TraceEvent::new(
                "c10",
                "discovery_complete",
                json!({ "paths": counts.len(), "state": OrchestratorState::Extracting.as_str() }),
            ));
            counts
        }
        Err(err) => {
            trace.record(TraceEvent::new(
                "c10",
                "discovery_failed",
                json!({ "error": err.to_string(), "state": OrchestratorState::Extracting.as_str() }),
            ));
            errors.push(format!("discovery pass failed: {err}"));
            BTreeMap::new()
        }
    }
}

fn parse_discovery_counts(catalog: &PathCatalog, value: &Value) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    if let Some(map) = value.get("counts").and_then(Value::as_object) {
        for (path, count) in map {
            if catalog.contains(path) {
                counts.insert(path.clone(), count.as_u64().unwrap_or(0) as usize);
            }
        }
    }
    counts
}

/// Pass 2: for every discovered path with identity fields and a nonzero
/// count, asks for the identity values of each instance and assigns each
/// one a [`kgx_core::NodeId`] in `registry` up front, so pass 3's edge
/// assembly can reference parents/children that already have stable IDs.
async fn identifier_fill_pass(
    catalog: &PathCatalog,
    registry: &NodeIdRegistry,
    completer: &dyn JsonCompleter,
    config: &ExtractionConfig,
    markdown: &str,
    discovered: &BTreeMap<String, usize>,
    trace: &TraceLog,
    errors: &mut Vec<String>,
) {
    for (path, count) in discovered {
        if *count == 0 {
            continue;
        }
        let id_fields = catalog.id_fields(path);
        if id_fields.is_empty() {
            continue;
        }
        let Some(class_name) = catalog.class_of.get(path) else {
            continue;
        };

        let cap = config.staged.nodes_fill_cap;
        let id_fields_block = id_fields.join(", ");
        let user_prompt = format!(
            "Catalog path: {path}\nIdentity fields: {id_fields_block}\nReport at most {cap} instances as \
            {{\"instances\": [{{\"{id_fields_block}\": \"...\"}}]}}.\n\nDocument:\n{markdown}"
        );
        let schema = json!({
            "type": "object",
            "properties": { "instances": { "type": "array" } },
            "required": ["instances"]
        });
        let request = CompletionRequest::new(IDENTIFIER_FILL_SYSTEM_PROMPT, user_prompt).with_schema(schema);

        match complete_with_retry(completer, request, config.staged.pass_retries).await {
            Ok(value) => {
                let assigned = assign_instances(registry, class_name, path, id_fields, &value, cap);
                trace.record(TraceEvent::new(
                    "c10",
                    "identifier_fill_complete",
                    json!({ "path": path, "assigned": assigned, "state": OrchestratorState::Extracting.as_str() }),
                ));
            }
            Err(err) => {
                trace.record(TraceEvent::new(
                    "c10",
                    "identifier_fill_failed",
                    json!({ "path": path, "error": err.to_string(), "state": OrchestratorState::Extracting.as_str() }),
                ));
                errors.push(format!("identifier fill failed for '{path}': {err}"));
            }
        }
    }
}

fn assign_instances(
    registry: &NodeIdRegistry,
    class_name: &str,
    path: &str,
    id_fields: &[String],
    value: &Value,
    cap: usize,
) -> usize {
    let Some(instances) = value.get("instances").and_then(Value::as_array) else {
        return 0;
    };

    let mut assigned = 0;
    for instance in instances.iter().take(cap) {
        let Some(obj) = instance.as_object() else {
            continue;
        };
        let mut ids = Vec::with_capacity(id_fields.len());
        let mut complete = true;
        for field in id_fields {
            match obj.get(field).and_then(Value::as_str) {
                Some(v) => ids.push((field.clone(), v.to_string())),
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if !complete {
            continue;
        }
        registry.assign(class_name, NodeFingerprint::new(path, ids));
        assigned += 1;
    }
    assigned
}
