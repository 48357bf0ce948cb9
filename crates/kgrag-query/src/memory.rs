//! In-process graph store implementing [`GraphView`].
//!
//! Neighbor listings follow edge insertion order, which keeps traversal
//! results reproducible.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use kgrag_core::graph::Properties;
use kgrag_core::{GraphEdge, GraphNode, GraphView, Neighbor, Result};

/// A property graph held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    nodes: BTreeMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
    /// node id → indices into `edges`
    adjacency: HashMap<String, Vec<usize>>,
    next_edge_id: u64,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node.
    pub fn upsert_node(&mut self, node: GraphNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Add an edge between two existing nodes and return its id.
    ///
    /// If an edge already connects the pair (in either direction) its
    /// properties are merged and its id returned. Returns `None` if either
    /// endpoint is missing.
    pub fn upsert_edge(
        &mut self,
        source: &str,
        target: &str,
        edge_type: &str,
        properties: Properties,
    ) -> Option<String> {
        if !self.nodes.contains_key(source) || !self.nodes.contains_key(target) {
            return None;
        }
        if let Some(idx) = self.find_edge(source, target) {
            let edge = &mut self.edges[idx];
            edge.properties.extend(properties);
            return Some(edge.id.clone());
        }
        self.insert_edge(source, target, edge_type, properties)
    }

    /// Add an edge without merging, even if the pair is already connected.
    ///
    /// Stores that keep both `A -> B` and `B -> A` behave this way.
    pub fn insert_edge(
        &mut self,
        source: &str,
        target: &str,
        edge_type: &str,
        properties: Properties,
    ) -> Option<String> {
        if !self.nodes.contains_key(source) || !self.nodes.contains_key(target) {
            return None;
        }
        self.next_edge_id += 1;
        let id = self.next_edge_id.to_string();
        let idx = self.edges.len();
        self.edges.push(GraphEdge {
            id: id.clone(),
            edge_type: edge_type.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            properties,
        });
        self.adjacency.entry(source.to_string()).or_default().push(idx);
        if source != target {
            self.adjacency.entry(target.to_string()).or_default().push(idx);
        }
        Some(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    fn find_edge(&self, a: &str, b: &str) -> Option<usize> {
        self.adjacency.get(a)?.iter().copied().find(|&idx| {
            let edge = &self.edges[idx];
            (edge.source == a && edge.target == b) || (edge.source == b && edge.target == a)
        })
    }
}

#[async_trait]
impl GraphView for MemoryGraph {
    async fn has_node(&self, node_id: &str) -> Result<bool> {
        Ok(self.nodes.contains_key(node_id))
    }

    async fn has_edge(&self, source_id: &str, target_id: &str) -> Result<bool> {
        Ok(self.find_edge(source_id, target_id).is_some())
    }

    async fn node_degree(&self, node_id: &str) -> Result<usize> {
        Ok(self.adjacency.get(node_id).map_or(0, Vec::len))
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<GraphNode>> {
        Ok(self.nodes.get(node_id).cloned())
    }

    async fn get_edge(&self, source_id: &str, target_id: &str) -> Result<Option<GraphEdge>> {
        Ok(self
            .find_edge(source_id, target_id)
            .map(|idx| self.edges[idx].clone()))
    }

    async fn get_node_neighbors(&self, node_id: &str) -> Result<Vec<Neighbor>> {
        let Some(indices) = self.adjacency.get(node_id) else {
            return Ok(Vec::new());
        };
        let neighbors = indices
            .iter()
            .filter_map(|&idx| {
                let edge = &self.edges[idx];
                let other = edge.other_end(node_id)?;
                let node = self.nodes.get(other)?;
                Some(Neighbor {
                    edge: edge.clone(),
                    node: node.clone(),
                })
            })
            .collect();
        Ok(neighbors)
    }

    async fn get_all_labels(&self) -> Result<Vec<String>> {
        Ok(self.nodes.keys().cloned().collect())
    }
}
