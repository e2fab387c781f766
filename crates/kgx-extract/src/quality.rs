//! Quality Gate (C8): decides whether an extraction is complete enough to
//! hand back to the caller, or whether another gleaning pass should run
//! (spec.md §4.8).

use std::collections::BTreeMap;

use kgx_core::{MergedGraph, PathCatalog};

use crate::ir::NormalizerStats;
use crate::projector::ProjectionStats;

/// The ratio thresholds above which a gate reason fires (spec.md §4.8).
/// Not user-configurable: these bound pathological extractions, not
/// document-specific tuning (that is `min_instances`' job).
const UNKNOWN_PATH_DROPPED_RATIO_LIMIT: f64 = 0.5;
const PARENT_LOOKUP_MISS_RATIO_LIMIT: f64 = 0.5;

/// Verdict for one extraction attempt (spec.md §3 `QualityReport`).
#[derive(Debug, Clone, Default)]
pub struct QualityReport {
    pub ok: bool,
    pub reasons: Vec<String>,
    pub per_path_count: BTreeMap<String, usize>,
    pub parent_lookup_miss: usize,
    pub unknown_path_dropped: usize,
}

/// Evaluates a [`MergedGraph`] against the schema's declared paths and the
/// normalizer/projector counters accumulated across all batches.
pub struct QualityGate {
    min_instances: usize,
}

impl QualityGate {
    pub fn new(min_instances: usize) -> Self {
        Self { min_instances }
    }

    pub fn evaluate(
        &self,
        catalog: &PathCatalog,
        graph: &MergedGraph,
        normalizer_stats: &NormalizerStats,
        projection_stats: &ProjectionStats,
    ) -> QualityReport {
        let mut reasons = Vec::new();
        let mut per_path_count = BTreeMap::new();
        for path in &catalog.paths {
            per_path_count.insert(path.clone(), graph.nodes_at_path(path).count());
        }

        let has_root_instance = per_path_count.get("").copied().unwrap_or(0) > 0;
        if !has_root_instance {
            reasons.push("no root instance was extracted".to_string());
        }

        // spec.md §4.8 applies `min_instances` "for each path declared
        // required"; the catalog carries no optionality marker to tell a
        // required path from an optional one, so every non-root path is
        // treated as required. With the default `min_instances == 1` a
        // schema branch legitimately absent from one document always
        // fails the gate and forces a gleaning/direct-fallback pass.
        for path in catalog.non_root_paths() {
            let count = per_path_count.get(path).copied().unwrap_or(0);
            if count < self.min_instances {
                reasons.push(format!(
                    "path '{path}' has {count} instance(s), below the minimum of {}",
                    self.min_instances
                ));
            }
        }

        let seen = graph.node_count() + normalizer_stats.unknown_path_dropped;
        let unknown_path_dropped_ratio = ratio(normalizer_stats.unknown_path_dropped, seen);
        if unknown_path_dropped_ratio > UNKNOWN_PATH_DROPPED_RATIO_LIMIT {
            reasons.push(format!(
                "unknown_path_dropped_ratio {unknown_path_dropped_ratio:.2} exceeds {UNKNOWN_PATH_DROPPED_RATIO_LIMIT:.2}"
            ));
        }

        let parent_lookup_miss_ratio = ratio(projection_stats.parent_lookup_miss, graph.node_count());
        if parent_lookup_miss_ratio > PARENT_LOOKUP_MISS_RATIO_LIMIT {
            reasons.push(format!(
                "parent_lookup_miss_ratio {parent_lookup_miss_ratio:.2} exceeds {PARENT_LOOKUP_MISS_RATIO_LIMIT:.2}"
            ));
        }

        QualityReport {
            ok: reasons.is_empty(),
            reasons,
            per_path_count,
            parent_lookup_miss: projection_stats.parent_lookup_miss,
            unknown_path_dropped: normalizer_stats.unknown_path_dropped,
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgx_core::{Node, NodeId, Schema, SchemaClass, SchemaField, SchemaFieldKind};
    use std::collections::BTreeMap as Map;

    fn schema() -> Schema {
        let mut classes = Map::new();
        classes.insert(
            "Invoice".to_string(),
            SchemaClass {
                name: "Invoice".to_string(),
                identity_fields: vec!["document_number".to_string()],
                fields: vec![SchemaField {
                    name: "line_items".to_string(),
                    kind: SchemaFieldKind::Edge {
                        target_class: "LineItem".to_string(),
                        many: true,
                        label: None,
                    },
                }],
            },
        );
        classes.insert(
            "LineItem".to_string(),
            SchemaClass {
                name: "LineItem".to_string(),
                identity_fields: vec!["line_number".to_string()],
                fields: vec![],
            },
        );
        Schema {
            root_class: "Invoice".to_string(),
            classes,
        }
    }

    fn node(id: &str, path: &str) -> Node {
        Node {
            id: NodeId(id.to_string()),
            path: path.to_string(),
            ids: Map::new(),
            properties: Map::new(),
            parent_ref: None,
            pending_parent: None,
        }
    }

    #[test]
    fn empty_graph_fails_on_missing_root() {
        let catalog = PathCatalog::build(&schema()).unwrap();
        let graph = MergedGraph::new();
        let gate = QualityGate::new(1);
        let report = gate.evaluate(&catalog, &graph, &NormalizerStats::default(), &ProjectionStats::default());
        assert!(!report.ok);
        assert!(report.reasons.iter().any(|r| r.contains("no root instance")));
    }

    #[test]
    fn root_with_required_children_passes() {
        let catalog = PathCatalog::build(&schema()).unwrap();
        let mut graph = MergedGraph::new();
        graph.insert_node(node("Invoice_a", ""));
        graph.insert_node(node("LineItem_a", "line_items[]"));
        let gate = QualityGate::new(1);
        let report = gate.evaluate(&catalog, &graph, &NormalizerStats::default(), &ProjectionStats::default());
        assert!(report.ok, "reasons: {:?}", report.reasons);
        assert_eq!(report.per_path_count["line_items[]"], 1);
    }

    #[test]
    fn below_minimum_instances_fails() {
        let catalog = PathCatalog::build(&schema()).unwrap();
        let mut graph = MergedGraph::new();
        graph.insert_node(node("Invoice_a", ""));
        let gate = QualityGate::new(1);
        let report = gate.evaluate(&catalog, &graph, &NormalizerStats::default(), &ProjectionStats::default());
        assert!(!report.ok);
        assert!(report.reasons.iter().any(|r| r.contains("line_items[]")));
    }

    #[test]
    fn high_parent_lookup_miss_ratio_fails() {
        let catalog = PathCatalog::build(&schema()).unwrap();
        let mut graph = MergedGraph::new();
        graph.insert_node(node("Invoice_a", ""));
        graph.insert_node(node("LineItem_a", "line_items[]"));
        let gate = QualityGate::new(1);
        let projection_stats = ProjectionStats {
            nodes_projected: 2,
            orphans: 2,
            parent_lookup_miss: 2,
        };
        let report = gate.evaluate(&catalog, &graph, &NormalizerStats::default(), &projection_stats);
        assert!(!report.ok);
        assert!(report.reasons.iter().any(|r| r.contains("parent_lookup_miss_ratio")));
    }
}
