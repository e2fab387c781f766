//! `MergedGraph` arena (C6 types): nodes held in a contiguous `Vec` indexed
//! by [`NodeId`], edges stored as endpoint-id pairs. Mirrors the
//! entities-map-plus-edge-index design the teacher's code-graph model uses,
//! generalized from code entities to extracted document entities (spec.md
//! §9 "Pointer graphs & shared children → arena + index").

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::registry::NodeId;

/// A node in the merged graph: the path it was extracted at, its canonical
/// identity field values, its properties, and (for non-root nodes) the
/// parent it resolved to during normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub path: String,
    pub ids: BTreeMap<String, String>,
    pub properties: BTreeMap<String, serde_json::Value>,
    pub parent_ref: Option<NodeId>,
    /// The declared parent pointer the normalizer could not resolve
    /// unambiguously within a single batch (spec.md §4.5 step 4). Carried
    /// into the merged graph so the projector (C7) can retry resolution
    /// against the full, cross-batch set of candidates before giving up
    /// and orphaning the node (spec.md §4.7 "parent salvage").
    #[serde(default)]
    pub pending_parent: Option<PendingParent>,
}

/// A parent reference left ambiguous by the normalizer: a declared
/// `{path, ids}` with zero or more than one same-path candidate known at
/// normalization time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingParent {
    pub path: String,
    pub ids: BTreeMap<String, String>,
}

/// A directed edge between two nodes, labeled with the schema edge label it
/// was materialized from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub source: NodeId,
    pub target: NodeId,
    pub label: String,
}

/// The union of all normalized batch outputs for one extraction.
///
/// Invariants (spec.md §3): every edge endpoint exists in `nodes`; at most
/// one node per fingerprint (enforced by callers inserting through the
/// shared [`crate::registry::NodeIdRegistry`] before calling
/// [`MergedGraph::insert_node`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergedGraph {
    nodes: Vec<Node>,
    #[serde(skip)]
    index: HashMap<NodeId, usize>,
    edges: BTreeSet<Edge>,
}

impl MergedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `node` if its id is new; otherwise this is a no-op (callers
    /// merge properties onto the existing node via
    /// [`MergedGraph::node_mut`] before calling this).
    pub fn insert_node(&mut self, node: Node) -> bool {
        if self.index.contains_key(&node.id) {
            return false;
        }
        let idx = self.nodes.len();
        self.index.insert(node.id.clone(), idx);
        self.nodes.push(node);
        true
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.index.get(id).and_then(|&i| self.nodes.get(i))
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        let idx = *self.index.get(id)?;
        self.nodes.get_mut(idx)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Insert `edge`, deduplicated by `(source, target, label)`. Returns
    /// `true` if the edge was newly added.
    pub fn add_edge(&mut self, edge: Edge) -> bool {
        self.edges.insert(edge)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges_from<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| &e.source == id)
    }

    pub fn nodes_at_path<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Node> {
        self.nodes.iter().filter(move |n| n.path == path)
    }

    /// Check the arena invariants: every edge endpoint exists in `nodes`.
    /// Returns the list of dangling edges found, empty when the invariant
    /// holds.
    pub fn dangling_edges(&self) -> Vec<&Edge> {
        self.edges
            .iter()
            .filter(|e| !self.index.contains_key(&e.source) || !self.index.contains_key(&e.target))
            .collect()
    }
}
