//! IR Normalizer (C5): path canonicalization, identity coercion,
//! parent resolution, and relationship normalization (spec.md §4.5).
//!
//! Parent resolution precedence, resolved from the three failure modes
//! the spec names explicitly (exact match, off-by-one repair, and
//! "positional attachment is never performed"):
//!
//! 1. Declared parent ids non-empty and match an already-known
//!    fingerprint exactly → accept.
//! 2. Declared parent ids non-empty, no exact match, `resolvers_mode ==
//!    fuzzy`, and exactly one same-path sibling exists with a
//!    case/Unicode-confusable near-miss identity → repair (re-point).
//! 3. Declared parent ids non-empty, no match found (or mode is not
//!    `fuzzy`) → **synthesize** a new parent at the declared ids. A
//!    mismatched identity is never silently repaired outside `fuzzy`
//!    mode.
//! 4. Declared parent ids empty and exactly one same-path sibling is
//!    already known → attach/repair to it.
//! 5. Declared parent ids empty and zero or multiple same-path siblings
//!    are known → ambiguous. The normalizer does not guess: it records
//!    a [`crate::ir::PendingParent`] and increments
//!    `parent_lookup_miss`. The projector (C7) retries resolution
//!    against the full merged graph, which may disambiguate across
//!    batches; if it still cannot, the node becomes an orphan.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use kgx_core::config::ResolverMode;
use kgx_core::{NodeFingerprint, NodeId, NodeIdRegistry, PathCatalog, PendingParent};
use unicode_normalization::UnicodeNormalization;

use crate::error::ExtractError;
use crate::ir::{BatchIr, NormalizedBatchIr, NormalizedNode, NormalizedRelationship, NormalizerStats, RawRef};

/// Cross-batch index of which [`NodeId`]s are already known at each
/// catalog path, consulted during parent resolution (spec.md §4.5
/// "a single sibling parent exists" / "exactly one parent exists at the
/// parent path"). Mutex-guarded to match [`NodeIdRegistry`]'s
/// check-then-insert idiom for shared state across concurrently
/// processed batches (spec.md §5).
#[derive(Default)]
pub struct SiblingIndex {
    by_path: Mutex<HashMap<String, Vec<NodeId>>>,
}

impl SiblingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, path: &str, id: NodeId) {
        let mut by_path = self.by_path.lock().expect("sibling index mutex poisoned");
        let ids = by_path.entry(path.to_string()).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    pub fn candidates(&self, path: &str) -> Vec<NodeId> {
        self.by_path
            .lock()
            .expect("sibling index mutex poisoned")
            .get(path)
            .cloned()
            .unwrap_or_default()
    }
}

/// Drives C5 for one batch against shared, cross-batch state.
pub struct IrNormalizer<'a> {
    catalog: &'a PathCatalog,
    registry: &'a NodeIdRegistry,
    siblings: &'a SiblingIndex,
    strict_unknown_paths: bool,
    resolver_mode: ResolverMode,
}

impl<'a> IrNormalizer<'a> {
    pub fn new(
        catalog: &'a PathCatalog,
        registry: &'a NodeIdRegistry,
        siblings: &'a SiblingIndex,
        strict_unknown_paths: bool,
        resolver_mode: ResolverMode,
    ) -> Self {
        Self {
            catalog,
            registry,
            siblings,
            strict_unknown_paths,
            resolver_mode,
        }
    }

    pub fn normalize(&self, batch: BatchIr) -> Result<(NormalizedBatchIr, NormalizerStats), ExtractError> {
        let mut stats = NormalizerStats::default();
        let mut nodes = Vec::with_capacity(batch.nodes.len());

        for raw in batch.nodes {
            let Some(path) = canonicalize_path(self.catalog, &raw.path) else {
                stats.unknown_path_dropped += 1;
                if self.strict_unknown_paths {
                    return Err(ExtractError::StrictUnknownPath {
                        batch_id: batch.batch_id,
                        path: raw.path,
                    });
                }
                continue;
            };

            let ids = coerce_ids(&raw.ids);
            let class_name = self.catalog.class_of.get(&path).cloned().unwrap_or_default();
            let fingerprint = self.fingerprint_for(&path, &ids);
            let id = self.registry.assign(&class_name, fingerprint);
            self.siblings.record(&path, id.clone());

            let mut properties = raw.properties;
            for (field, value) in &ids {
                if let std::collections::btree_map::Entry::Vacant(entry) = properties.entry(field.clone()) {
                    entry.insert(serde_json::Value::String(value.clone()));
                    stats.ids_injected += 1;
                }
            }

            let (parent_ref, pending_parent, ancestor_nodes) = if path.is_empty() {
                (None, None, Vec::new())
            } else {
                self.resolve_parent(&path, raw.parent.as_ref(), &mut stats)
            };

            nodes.push(NormalizedNode {
                id,
                path,
                ids,
                properties,
                parent_ref,
                pending_parent,
            });
            nodes.extend(ancestor_nodes);
        }

        let mut relationships: Vec<NormalizedRelationship> = batch
            .relationships
            .into_iter()
            .filter_map(|rel| self.normalize_relationship(rel))
            .collect();

        // Containment edges: one per resolved parent_ref, so the projector
        // (C7) can fold the graph back into a tree purely from edges. A
        // node reachable from more than one parent (spec.md §4.7
        // "same-path, different-parent duplication") needs a distinct edge
        // per parent; `parent_ref` alone can only ever record one.
        for node in &nodes {
            if let Some(parent_id) = &node.parent_ref {
                let label = self.catalog.edge_label_by_path.get(&node.path).cloned().unwrap_or_else(|| node.path.clone());
                relationships.push(NormalizedRelationship {
                    source: parent_id.clone(),
                    target: node.id.clone(),
                    label,
                });
            }
        }

        Ok((
            NormalizedBatchIr {
                batch_id: batch.batch_id,
                nodes,
                relationships,
            },
            stats,
        ))
    }

    fn fingerprint_for(&self, path: &str, ids: &BTreeMap<String, String>) -> NodeFingerprint {
        let ordered = self
            .catalog
            .id_fields(path)
            .iter()
            .filter_map(|field| ids.get(field).map(|v| (field.clone(), v.clone())))
            .collect();
        NodeFingerprint::new(path, ordered)
    }

    /// Resolves `child_path`'s parent, returning its id (if resolved), a
    /// pending reference (if left ambiguous for the projector), and any
    /// placeholder ancestor nodes synthesized along the way. Synthesis
    /// recurses up the catalog so a synthesized grandparent also gets a
    /// materialized node the projector can attach (spec.md §4.5 step 4
    /// "orphan salvage"; the synthesized node needs its own declared ids
    /// carried forward, not just a registry-only id, for the projector to
    /// render it).
    fn resolve_parent(
        &self,
        child_path: &str,
        raw_parent: Option<&RawRef>,
        stats: &mut NormalizerStats,
    ) -> (Option<NodeId>, Option<PendingParent>, Vec<NormalizedNode>) {
        let Some(parent_path) = self.catalog.parent_path(child_path) else {
            return (None, None, Vec::new());
        };
        if parent_path == child_path {
            // Root references itself; nothing to resolve.
            return (None, None, Vec::new());
        }
        let parent_path = parent_path.to_string();
        let parent_class = self.catalog.class_of.get(&parent_path).cloned().unwrap_or_default();
        let declared_ids = raw_parent.map(|p| coerce_ids(&p.ids)).unwrap_or_default();

        if !declared_ids.is_empty() {
            let fingerprint = self.fingerprint_for(&parent_path, &declared_ids);
            if let Some(existing) = self.registry.lookup(&fingerprint) {
                stats.parent_resolved += 1;
                return (Some(existing), None, Vec::new());
            }

            if self.resolver_mode == ResolverMode::Fuzzy {
                let candidates = self.siblings.candidates(&parent_path);
                if candidates.len() == 1 {
                    stats.parent_resolved += 1;
                    return (Some(candidates[0].clone()), None, Vec::new());
                }
            }

            // No exact match (and no unambiguous fuzzy repair): synthesize
            // rather than silently repairing a mismatched identity.
            stats.parent_inferred += 1;
            let id = self.registry.assign(&parent_class, fingerprint);
            self.siblings.record(&parent_path, id.clone());

            let mut properties: BTreeMap<String, serde_json::Value> = BTreeMap::new();
            for (field, value) in &declared_ids {
                properties.insert(field.clone(), serde_json::Value::String(value.clone()));
            }

            let (grandparent_ref, grandparent_pending, mut ancestors) =
                self.resolve_parent(&parent_path, None, stats);

            ancestors.push(NormalizedNode {
                id: id.clone(),
                path: parent_path,
                ids: declared_ids,
                properties,
                parent_ref: grandparent_ref,
                pending_parent: grandparent_pending,
            });

            (Some(id), None, ancestors)
        } else {
            let candidates = self.siblings.candidates(&parent_path);
            if candidates.len() == 1 {
                stats.parent_resolved += 1;
                return (Some(candidates[0].clone()), None, Vec::new());
            }

            // Zero or multiple candidates with no identity to disambiguate
            // by: defer to the projector rather than guess (spec.md §4.5,
            // §8 "no positional misattachment").
            stats.parent_lookup_miss += 1;
            (
                None,
                Some(PendingParent {
                    path: parent_path,
                    ids: declared_ids,
                }),
                Vec::new(),
            )
        }
    }

    fn normalize_relationship(&self, rel: crate::ir::RawRelationship) -> Option<NormalizedRelationship> {
        let is_known_label = self.catalog.edge_label_by_path.values().any(|label| label == &rel.label);
        if !is_known_label {
            return None;
        }

        let source_path = canonicalize_path(self.catalog, &rel.source.path)?;
        let target_path = canonicalize_path(self.catalog, &rel.target.path)?;
        let source = self.registry.lookup(&self.fingerprint_for(&source_path, &coerce_ids(&rel.source.ids)))?;
        let target = self.registry.lookup(&self.fingerprint_for(&target_path, &coerce_ids(&rel.target.ids)))?;

        Some(NormalizedRelationship {
            source,
            target,
            label: rel.label,
        })
    }
}

/// Matches a raw path against the catalog by (a) exact match, (b)
/// dotted-vs-bracketed numeric-index equivalence (`line_items.1` ≡
/// `line_items[]`), and (c) case-insensitive match, in that order
/// (spec.md §4.5 step 1).
pub fn canonicalize_path(catalog: &PathCatalog, raw_path: &str) -> Option<String> {
    if catalog.contains(raw_path) {
        return Some(raw_path.to_string());
    }

    let stripped = strip_numeric_segments(raw_path);
    if catalog.contains(&stripped) {
        return Some(stripped);
    }

    catalog
        .paths
        .iter()
        .find(|p| p.eq_ignore_ascii_case(&stripped) || p.eq_ignore_ascii_case(raw_path))
        .cloned()
}

/// Strips bare numeric segments (`line_items.1` → `line_items[]`) so
/// index-addressed parent references match the list-entity path.
fn strip_numeric_segments(raw_path: &str) -> String {
    raw_path
        .split('.')
        .filter(|segment| segment.parse::<usize>().is_err())
        .collect::<Vec<_>>()
        .join(".")
        + if raw_path.split('.').any(|s| s.parse::<usize>().is_ok()) {
            "[]"
        } else {
            ""
        }
}

/// Coerces raw identity values to trimmed, NFC-normalized strings.
/// Missing or null values are left absent, never invented (spec.md
/// §4.5 step 2).
fn coerce_ids(raw: &BTreeMap<String, serde_json::Value>) -> BTreeMap<String, String> {
    raw.iter()
        .filter_map(|(k, v)| value_to_canonical_string(v).map(|s| (k.clone(), s)))
        .collect()
}

fn value_to_canonical_string(value: &serde_json::Value) -> Option<String> {
    let raw = match value {
        serde_json::Value::Null => return None,
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.nfc().collect())
}
