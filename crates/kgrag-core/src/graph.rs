//! Property-graph types returned by subgraph extraction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Open-schema property map attached to nodes and edges.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// A node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Stable identifier, normally the normalized entity label.
    pub id: String,

    /// Display labels, in order.
    #[serde(default)]
    pub labels: Vec<String>,

    #[serde(default)]
    pub properties: Properties,
}

impl GraphNode {
    /// Create a node whose only label is its own id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            labels: vec![id.clone()],
            id,
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

/// A relationship between two nodes, in its stored direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Store-assigned identifier.
    pub id: String,

    /// Relationship kind (e.g. "DIRECTED").
    #[serde(rename = "type")]
    pub edge_type: String,

    pub source: String,
    pub target: String,

    #[serde(default)]
    pub properties: Properties,
}

impl GraphEdge {
    /// The endpoint opposite `node_id`, or `None` if the edge does not touch it.
    pub fn other_end(&self, node_id: &str) -> Option<&str> {
        if self.source == node_id {
            Some(&self.target)
        } else if self.target == node_id {
            Some(&self.source)
        } else {
            None
        }
    }

    /// Direction-independent key: the two endpoint ids, sorted.
    ///
    /// `A -> B` and `B -> A` produce the same key.
    pub fn undirected_key(&self) -> (String, String) {
        if self.source <= self.target {
            (self.source.clone(), self.target.clone())
        } else {
            (self.target.clone(), self.source.clone())
        }
    }
}

/// One entry of a neighbor listing: the connecting edge plus the node on
/// the other side.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub edge: GraphEdge,
    pub node: GraphNode,
}

/// A bounded subgraph.
///
/// Nodes appear in discovery order and edges in the order they were
/// recorded. No two nodes and no two edges share an id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    /// Set when the `max_nodes` budget cut off nodes that would otherwise
    /// have been returned.
    pub is_truncated: bool,
}

impl KnowledgeGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }
}
