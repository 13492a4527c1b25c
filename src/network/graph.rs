use indexmap::IndexMap;
use serde::Serialize;

use crate::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub neighbor: NodeId,
    pub interface: String,
}

/// Adjacency lists keyed by node, in first-seen order.
///
/// Routers carry an extra edge to themselves tagged with their loopback
/// interface, so a path may end on a router's own loopback like any other hop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoutingGraph {
    adjacency: IndexMap<NodeId, Vec<GraphEdge>>,
}

impl RoutingGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ensure_node(&mut self, node: &str) {
        if !self.adjacency.contains_key(node) {
            self.adjacency.insert(node.to_string(), Vec::new());
        }
    }

    pub(crate) fn add_edge(&mut self, from: &str, to: &str, interface: &str) {
        self.ensure_node(from);
        if let Some(edges) = self.adjacency.get_mut(from) {
            edges.push(GraphEdge {
                neighbor: to.to_string(),
                interface: interface.to_string(),
            });
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.adjacency.keys()
    }

    pub fn position(&self, node: &str) -> Option<usize> {
        self.adjacency.get_index_of(node)
    }

    pub fn node_at(&self, index: usize) -> Option<&NodeId> {
        self.adjacency.get_index(index).map(|(node, _)| node)
    }

    pub fn edges(&self, node: &str) -> &[GraphEdge] {
        self.adjacency.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, node: &str) -> bool {
        self.adjacency.contains_key(node)
    }

    pub fn has_self_edge(&self, node: &str) -> bool {
        self.edges(node).iter().any(|edge| edge.neighbor == node)
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }
}
