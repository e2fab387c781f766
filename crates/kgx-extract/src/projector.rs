//! Template Projector (C7): folds the flat [`MergedGraph`] back into a
//! nested [`serde_json::Value`] tree matching the schema, attaching
//! children under their resolved parents and salvaging orphans (spec.md
//! §4.7). The tree shape follows spec.md §9's "deep recursive models →
//! tagged values" design note: plain JSON objects/arrays instead of a
//! typed subtype hierarchy.
//!
//! Parent-child containment is read from [`MergedGraph`]'s edges (emitted
//! by [`crate::normalizer`] for every resolved `parent_ref`), not from
//! `Node::parent_ref` directly — a single fingerprint-deduplicated node can
//! be reachable from more than one parent at the same path (spec.md §4.7
//! "same-path, different-parent duplication"), and only the edge set can
//! represent that fan-in; `parent_ref` stores only one of them.

use std::collections::HashMap;

use kgx_core::{MergedGraph, Node, NodeId, PathCatalog};
use serde_json::{Map, Value};

/// Counters produced by projection (spec.md §3 `QualityReport`,
/// §4.8 `parent_lookup_miss`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectionStats {
    pub nodes_projected: usize,
    pub orphans: usize,
    /// Final miss count after the projector's cross-batch retry (spec.md
    /// §4.7: "`parent_lookup_miss` is kept at zero when salvage succeeds").
    pub parent_lookup_miss: usize,
}

const ORPHANS_KEY: &str = "__orphans__";

/// Folds a [`MergedGraph`] into a [`TemplateTree`]-shaped JSON value.
///
/// [`TemplateTree`]: https://docs.rs/kgx-core
pub struct TemplateProjector<'a> {
    catalog: &'a PathCatalog,
}

impl<'a> TemplateProjector<'a> {
    pub fn new(catalog: &'a PathCatalog) -> Self {
        Self { catalog }
    }

    pub fn project(&self, graph: &MergedGraph) -> (Value, ProjectionStats) {
        let mut stats = ProjectionStats::default();
        let mut children_of: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for edge in graph.edges() {
            children_of.entry(edge.source.clone()).or_default().push(edge.target.clone());
        }

        let mut orphans: Vec<&Node> = Vec::new();
        for node in graph.nodes() {
            if node.path.is_empty() || node.parent_ref.is_some() {
                continue;
            }
            match self.retry_parent_lookup(graph, node) {
                Some(parent_id) => children_of.entry(parent_id).or_default().push(node.id.clone()),
                None => orphans.push(node),
            }
        }
        stats.orphans = orphans.len();
        stats.parent_lookup_miss = orphans.len();

        let placeholder_root = Node {
            id: NodeId("__synthetic_root__".to_string()),
            path: String::new(),
            ids: Default::default(),
            properties: Default::default(),
            parent_ref: None,
            pending_parent: None,
        };
        let root_node = graph.nodes_at_path("").next().unwrap_or(&placeholder_root);
        let mut tree = self.render_node(root_node, graph, &children_of, &mut stats);

        // spec.md §4.7 places an orphan "at the nearest containing list".
        // The projector builds the tree top-down from resolved edges, so
        // an ambiguous node (no parent edge at all) has no containing
        // list to be nearest to — it is placed under the root object's
        // `__orphans__` key, the only container every orphan is
        // guaranteed to share.
        if !orphans.is_empty()
            && let Value::Object(map) = &mut tree
        {
            let rendered: Vec<Value> = orphans
                .iter()
                .map(|node| self.render_node(node, graph, &children_of, &mut stats))
                .collect();
            map.insert(ORPHANS_KEY.to_string(), Value::Array(rendered));
        }

        (tree, stats)
    }

    /// Retries resolution of a node whose parent the normalizer left
    /// ambiguous within a single batch, now against the full, cross-batch
    /// graph (spec.md §4.7 "parent salvage"). By construction (see
    /// [`crate::normalizer::IrNormalizer::resolve_parent`]), a pending
    /// parent always carries empty declared ids — non-empty declared ids
    /// are always resolved to a real or synthesized node at normalization
    /// time — so this only ever needs the single-candidate rule.
    fn retry_parent_lookup(&self, graph: &MergedGraph, node: &Node) -> Option<NodeId> {
        let pending = node.pending_parent.as_ref()?;
        if pending.ids.is_empty() {
            let mut candidates = graph.nodes_at_path(&pending.path);
            let first = candidates.next()?;
            if candidates.next().is_some() {
                return None;
            }
            Some(first.id.clone())
        } else {
            graph.nodes_at_path(&pending.path).find(|n| n.ids == pending.ids).map(|n| n.id.clone())
        }
    }

    fn render_node(
        &self,
        node: &Node,
        graph: &MergedGraph,
        children_of: &HashMap<NodeId, Vec<NodeId>>,
        stats: &mut ProjectionStats,
    ) -> Value {
        stats.nodes_projected += 1;
        let mut obj = Map::new();
        for (field, value) in &node.properties {
            obj.insert(field.clone(), value.clone());
        }

        for child_path in self.catalog.children_of(&node.path) {
            let child_nodes: Vec<&Node> = children_of
                .get(&node.id)
                .into_iter()
                .flatten()
                .filter_map(|id| graph.node(id))
                .filter(|n| n.path == child_path)
                .collect();

            let field_name = field_name_of(child_path);
            if self.catalog.is_list_entity(child_path) {
                let rendered: Vec<Value> =
                    child_nodes.iter().map(|n| self.render_node(n, graph, children_of, stats)).collect();
                obj.insert(field_name, Value::Array(rendered));
            } else {
                let rendered =
                    child_nodes.first().map(|n| self.render_node(n, graph, children_of, stats)).unwrap_or(Value::Null);
                obj.insert(field_name, rendered);
            }
        }

        Value::Object(obj)
    }
}

/// The schema field name for a catalog path is its final dotted segment,
/// with the list-entity `[]` suffix stripped.
fn field_name_of(path: &str) -> String {
    let last = path.rsplit('.').next().unwrap_or(path);
    last.strip_suffix("[]").unwrap_or(last).to_string()
}
