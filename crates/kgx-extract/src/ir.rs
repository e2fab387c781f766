//! Batch IR types (spec.md §3 `BatchIR`/`NormalizedBatchIR`).

use std::collections::BTreeMap;

use kgx_core::{NodeId, PendingParent};
use serde::{Deserialize, Serialize};

/// A `{path, ids}` pointer to another entity, as emitted raw by the
/// completer (e.g. a node's declared parent, or a relationship endpoint).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRef {
    pub path: String,
    #[serde(default)]
    pub ids: BTreeMap<String, serde_json::Value>,
}

/// One entity as emitted by the completer, before path validation or
/// identity canonicalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawNode {
    pub path: String,
    #[serde(default)]
    pub ids: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub parent: Option<RawRef>,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

/// One relationship as emitted by the completer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRelationship {
    pub source: RawRef,
    pub target: RawRef,
    pub label: String,
}

/// Raw completer output for one batch (spec.md §3 `BatchIR`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchIr {
    pub batch_id: usize,
    #[serde(default)]
    pub nodes: Vec<RawNode>,
    #[serde(default)]
    pub relationships: Vec<RawRelationship>,
}

/// A node after path canonicalization, identity coercion, and parent
/// resolution (spec.md §3 `NormalizedBatchIR`). `parent_ref` is `None`
/// only for the root node or for a node whose parent resolution was
/// deferred to the projector (see [`crate::normalizer`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedNode {
    pub id: NodeId,
    pub path: String,
    pub ids: BTreeMap<String, String>,
    pub properties: BTreeMap<String, serde_json::Value>,
    pub parent_ref: Option<NodeId>,
    /// The declared parent pointer, preserved for the projector to retry
    /// resolution against the full merged graph when `parent_ref` is
    /// `None` (spec.md §4.7 "parent salvage").
    pub pending_parent: Option<PendingParent>,
}

/// One relationship after endpoint resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRelationship {
    pub source: NodeId,
    pub target: NodeId,
    pub label: String,
}

/// Output of the IR Normalizer (C5) for one batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedBatchIr {
    pub batch_id: usize,
    pub nodes: Vec<NormalizedNode>,
    pub relationships: Vec<NormalizedRelationship>,
}

/// Counters produced alongside a [`NormalizedBatchIr`] (spec.md §3).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NormalizerStats {
    pub unknown_path_dropped: usize,
    pub ids_injected: usize,
    pub parent_resolved: usize,
    pub parent_inferred: usize,
    /// Parent references left ambiguous for the projector to salvage or
    /// orphan (spec.md §4.5/§4.7 split of responsibility).
    pub parent_lookup_miss: usize,
}

impl NormalizerStats {
    pub fn merge(&mut self, other: &NormalizerStats) {
        self.unknown_path_dropped += other.unknown_path_dropped;
        self.ids_injected += other.ids_injected;
        self.parent_resolved += other.parent_resolved;
        self.parent_inferred += other.parent_inferred;
        self.parent_lookup_miss += other.parent_lookup_miss;
    }
}
