//! Bounded subgraph extraction.
//!
//! Two selection strategies, kept deliberately distinct:
//! - wildcard (`"*"`): highest-degree nodes first, truncated when the whole
//!   graph has more than `max_nodes` nodes
//! - labeled start: breadth-first search from the start node, truncated
//!   when the depth-bounded reachable set exceeds `max_nodes`
//!
//! Edges are treated as undirected for traversal and deduplication but are
//! returned in their stored direction.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, info};

use kgrag_core::config::GraphConfig;
use kgrag_core::{GraphEdge, GraphNode, GraphView, KnowledgeGraph, Result};

/// Start label selecting the whole graph.
pub const WILDCARD: &str = "*";

/// Extracts depth- and size-bounded subgraphs from a [`GraphView`].
pub struct SubgraphExtractor<'a, G: GraphView + ?Sized> {
    graph: &'a G,
}

/// Edge bookkeeping for one extraction: ids and undirected pairs are
/// tracked separately from included nodes.
#[derive(Default)]
struct EdgeRecorder {
    edges: Vec<GraphEdge>,
    edge_ids: HashSet<String>,
    pairs: HashSet<(String, String)>,
}

impl EdgeRecorder {
    fn is_recorded(&self, edge: &GraphEdge) -> bool {
        self.edge_ids.contains(&edge.id) || self.pairs.contains(&edge.undirected_key())
    }

    /// Returns false if the edge id or its undirected pair was already seen.
    fn record(&mut self, edge: GraphEdge) -> bool {
        if self.is_recorded(&edge) {
            return false;
        }
        self.edge_ids.insert(edge.id.clone());
        self.pairs.insert(edge.undirected_key());
        self.edges.push(edge);
        true
    }
}

impl<'a, G: GraphView + ?Sized> SubgraphExtractor<'a, G> {
    pub fn new(graph: &'a G) -> Self {
        Self { graph }
    }

    /// Extract using the limits from a [`GraphConfig`].
    ///
    /// # Errors
    ///
    /// Propagates any error from the underlying [`GraphView`].
    pub async fn extract_with(
        &self,
        start_label: &str,
        config: &GraphConfig,
    ) -> Result<KnowledgeGraph> {
        self.extract(start_label, config.max_depth, config.max_nodes)
            .await
    }

    /// Extract the subgraph around `start_label` (or the whole graph for
    /// [`WILDCARD`]).
    ///
    /// A start label that does not exist yields an empty, non-truncated
    /// graph.
    ///
    /// # Errors
    ///
    /// Propagates any error from the underlying [`GraphView`]; no partial
    /// result is returned.
    pub async fn extract(
        &self,
        start_label: &str,
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<KnowledgeGraph> {
        if start_label == WILDCARD {
            return self.extract_by_degree(max_nodes).await;
        }

        let Some(start) = self.graph.get_node(start_label).await? else {
            debug!(start_label, "start node not found, returning empty graph");
            return Ok(KnowledgeGraph::default());
        };
        self.extract_bfs(start, max_depth, max_nodes).await
    }

    async fn extract_by_degree(&self, max_nodes: usize) -> Result<KnowledgeGraph> {
        let labels = self.graph.get_all_labels().await?;
        let total = labels.len();

        // (degree, listing position); the sort is stable on position for ties.
        let mut ranked = Vec::with_capacity(total);
        for (pos, label) in labels.iter().enumerate() {
            ranked.push((self.graph.node_degree(label).await?, pos));
        }
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        ranked.truncate(max_nodes);

        let mut result = KnowledgeGraph {
            is_truncated: total > max_nodes,
            ..KnowledgeGraph::default()
        };
        if result.is_truncated {
            info!(total, max_nodes, "graph truncated by degree selection");
        }

        for &(_, pos) in &ranked {
            if let Some(node) = self.graph.get_node(&labels[pos]).await? {
                result.nodes.push(node);
            }
        }

        let selected: HashSet<&str> = result.nodes.iter().map(|n| n.id.as_str()).collect();
        let mut recorder = EdgeRecorder::default();
        for node in &result.nodes {
            for neighbor in self.graph.get_node_neighbors(&node.id).await? {
                if selected.contains(neighbor.node.id.as_str()) {
                    recorder.record(neighbor.edge);
                }
            }
        }
        result.edges = recorder.edges;

        info!(
            nodes = result.nodes.len(),
            edges = result.edges.len(),
            "degree subgraph extracted"
        );
        Ok(result)
    }

    async fn extract_bfs(
        &self,
        start: GraphNode,
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<KnowledgeGraph> {
        let mut result = KnowledgeGraph::default();
        if max_nodes == 0 {
            result.is_truncated = true;
            return Ok(result);
        }

        let mut included: HashSet<String> = HashSet::new();
        let mut recorder = EdgeRecorder::default();
        let mut queue: VecDeque<(GraphNode, usize)> = VecDeque::new();
        queue.push_back((start, 0));

        while let Some((node, depth)) = queue.pop_front() {
            if included.contains(&node.id) || depth > max_depth {
                continue;
            }

            let node_id = node.id.clone();
            included.insert(node_id.clone());
            result.nodes.push(node);
            let at_capacity = included.len() >= max_nodes;
            let can_expand = depth < max_depth;
            let mut undiscovered = false;

            for neighbor in self.graph.get_node_neighbors(&node_id).await? {
                let far_included = included.contains(&neighbor.node.id);

                if at_capacity {
                    // Budget spent: only close edges between included nodes.
                    if far_included {
                        recorder.record(neighbor.edge);
                    } else if can_expand {
                        undiscovered = true;
                    }
                    continue;
                }
                if recorder.is_recorded(&neighbor.edge) {
                    continue;
                }

                if far_included || can_expand {
                    recorder.record(neighbor.edge);
                }
                if !far_included && can_expand {
                    queue.push_back((neighbor.node, depth + 1));
                } else if !far_included {
                    debug!(
                        node = %neighbor.node.id,
                        max_depth,
                        "neighbor beyond max depth, not included"
                    );
                }
            }

            if at_capacity {
                result.is_truncated =
                    undiscovered || queue.iter().any(|(n, _)| !included.contains(&n.id));
                if result.is_truncated {
                    info!(max_nodes, "graph truncated: breadth-first search hit node limit");
                }
                break;
            }
        }

        result.edges = recorder.edges;
        info!(
            nodes = result.nodes.len(),
            edges = result.edges.len(),
            "BFS subgraph extracted"
        );
        Ok(result)
    }
}
