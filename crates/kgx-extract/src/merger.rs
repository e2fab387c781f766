//! Graph Merger (C6): unions normalized batch IRs into one
//! [`MergedGraph`], deduplicating nodes by fingerprint-derived
//! [`NodeId`] and edges by `(source, target, label)` (spec.md §4.6).

use kgx_core::{Edge, MergedGraph, Node};

use crate::dedup::DedupPolicy;
use crate::ir::NormalizedBatchIr;

/// Counters produced by merging one or more batches (spec.md §4.6).
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeStats {
    pub merged_nodes: usize,
    pub property_conflicts: usize,
    pub edges_deduplicated: usize,
}

impl MergeStats {
    pub fn merge(&mut self, other: &MergeStats) {
        self.merged_nodes += other.merged_nodes;
        self.property_conflicts += other.property_conflicts;
        self.edges_deduplicated += other.edges_deduplicated;
    }
}

/// Folds [`NormalizedBatchIr`]s into a shared [`MergedGraph`] under a
/// [`DedupPolicy`].
pub struct GraphMerger {
    policy: DedupPolicy,
}

impl GraphMerger {
    pub fn new(policy: DedupPolicy) -> Self {
        Self { policy }
    }

    /// Merges one batch's nodes and edges into `graph`, in place.
    pub fn merge_batch(&self, graph: &mut MergedGraph, batch: NormalizedBatchIr) -> MergeStats {
        let mut stats = MergeStats::default();

        for normalized in batch.nodes {
            if let Some(existing) = graph.node_mut(&normalized.id) {
                stats.merged_nodes += 1;
                for (field, value) in normalized.properties {
                    let entry = existing.properties.entry(field.clone()).or_insert(serde_json::Value::Null);
                    if self.policy.merge_property(&field, entry, value) {
                        stats.property_conflicts += 1;
                    }
                }
                if existing.parent_ref.is_none() && normalized.parent_ref.is_some() {
                    existing.parent_ref = normalized.parent_ref;
                    existing.pending_parent = None;
                } else if existing.parent_ref.is_none() && existing.pending_parent.is_none() {
                    existing.pending_parent = normalized.pending_parent;
                }
            } else {
                graph.insert_node(Node {
                    id: normalized.id,
                    path: normalized.path,
                    ids: normalized.ids,
                    properties: normalized.properties,
                    parent_ref: normalized.parent_ref,
                    pending_parent: normalized.pending_parent,
                });
            }
        }

        for rel in batch.relationships {
            let edge = Edge {
                source: rel.source,
                target: rel.target,
                label: rel.label,
            };
            if !graph.add_edge(edge) {
                stats.edges_deduplicated += 1;
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::NormalizedNode;
    use kgx_core::NodeId;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn node(id: &str, path: &str, properties: &[(&str, serde_json::Value)]) -> NormalizedNode {
        NormalizedNode {
            id: NodeId(id.to_string()),
            path: path.to_string(),
            ids: BTreeMap::new(),
            properties: properties.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            parent_ref: None,
            pending_parent: None,
        }
    }

    fn batch(nodes: Vec<NormalizedNode>) -> NormalizedBatchIr {
        NormalizedBatchIr {
            batch_id: 0,
            nodes,
            relationships: vec![],
        }
    }

    #[test]
    fn new_node_is_inserted() {
        let merger = GraphMerger::new(DedupPolicy::new());
        let mut graph = MergedGraph::new();
        let stats = merger.merge_batch(&mut graph, batch(vec![node("Invoice_a", "", &[])]));
        assert_eq!(graph.node_count(), 1);
        assert_eq!(stats.merged_nodes, 0);
    }

    #[test]
    fn conflicting_scalar_keeps_first_non_empty_and_counts_conflict() {
        let merger = GraphMerger::new(DedupPolicy::new());
        let mut graph = MergedGraph::new();
        merger.merge_batch(&mut graph, batch(vec![node("Invoice_a", "", &[("total", json!("100"))])]));
        let stats = merger.merge_batch(&mut graph, batch(vec![node("Invoice_a", "", &[("total", json!("200"))])]));
        assert_eq!(graph.node(&NodeId("Invoice_a".to_string())).unwrap().properties["total"], json!("100"));
        assert_eq!(stats.property_conflicts, 1);
    }

    #[test]
    fn missing_field_is_filled_by_later_batch() {
        let merger = GraphMerger::new(DedupPolicy::new());
        let mut graph = MergedGraph::new();
        merger.merge_batch(&mut graph, batch(vec![node("Invoice_a", "", &[("total", json!("100"))])]));
        merger.merge_batch(&mut graph, batch(vec![node("Invoice_a", "", &[("currency", json!("USD"))])]));
        let merged = graph.node(&NodeId("Invoice_a".to_string())).unwrap();
        assert_eq!(merged.properties["total"], json!("100"));
        assert_eq!(merged.properties["currency"], json!("USD"));
    }

    proptest! {
        #[test]
        fn merge_is_idempotent(total in any::<i32>(), currency in "[A-Z]{3}") {
            let merger = GraphMerger::new(DedupPolicy::new());
            let mut once = MergedGraph::new();
            merger.merge_batch(&mut once, batch(vec![node("Invoice_a", "", &[("total", json!(total)), ("currency", json!(currency.clone()))])]));

            let mut twice = MergedGraph::new();
            merger.merge_batch(&mut twice, batch(vec![node("Invoice_a", "", &[("total", json!(total)), ("currency", json!(currency.clone()))])]));
            merger.merge_batch(&mut twice, batch(vec![node("Invoice_a", "", &[("total", json!(total)), ("currency", json!(currency))])]));

            prop_assert_eq!(once.node_count(), twice.node_count());
            prop_assert_eq!(
                once.node(&NodeId("Invoice_a".to_string())).unwrap().properties.clone(),
                twice.node(&NodeId("Invoice_a".to_string())).unwrap().properties.clone()
            );
        }

        #[test]
        fn merge_is_commutative_without_volatile_fields(a in any::<i32>(), b in any::<i32>()) {
            let merger = GraphMerger::new(DedupPolicy::new());

            let mut ab = MergedGraph::new();
            merger.merge_batch(&mut ab, batch(vec![node("Invoice_a", "", &[("total", json!(a))])]));
            merger.merge_batch(&mut ab, batch(vec![node("Invoice_a", "", &[("currency", json!(b))])]));

            let mut ba = MergedGraph::new();
            merger.merge_batch(&mut ba, batch(vec![node("Invoice_a", "", &[("currency", json!(b))])]));
            merger.merge_batch(&mut ba, batch(vec![node("Invoice_a", "", &[("total", json!(a))])]));

            prop_assert_eq!(
                ab.node(&NodeId("Invoice_a".to_string())).unwrap().properties.clone(),
                ba.node(&NodeId("Invoice_a".to_string())).unwrap().properties.clone()
            );
        }
    }

    #[test]
    fn duplicate_edge_is_deduplicated() {
        let merger = GraphMerger::new(DedupPolicy::new());
        let mut graph = MergedGraph::new();
        graph.insert_node(kgx_core::Node {
            id: NodeId("A".to_string()),
            path: String::new(),
            ids: BTreeMap::new(),
            properties: BTreeMap::new(),
            parent_ref: None,
            pending_parent: None,
        });
        graph.insert_node(kgx_core::Node {
            id: NodeId("B".to_string()),
            path: "line_items[]".to_string(),
            ids: BTreeMap::new(),
            properties: BTreeMap::new(),
            parent_ref: None,
            pending_parent: None,
        });

        let rel = crate::ir::NormalizedRelationship {
            source: NodeId("A".to_string()),
            target: NodeId("B".to_string()),
            label: "line_items".to_string(),
        };
        let stats_first = merger.merge_batch(
            &mut graph,
            NormalizedBatchIr { batch_id: 0, nodes: vec![], relationships: vec![rel.clone()] },
        );
        let stats_second = merger.merge_batch(
            &mut graph,
            NormalizedBatchIr { batch_id: 1, nodes: vec![], relationships: vec![rel] },
        );
        assert_eq!(stats_first.edges_deduplicated, 0);
        assert_eq!(stats_second.edges_deduplicated, 1);
        assert_eq!(graph.edge_count(), 1);
    }
}
