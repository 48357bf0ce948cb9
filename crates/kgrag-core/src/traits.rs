//! Capability traits the retrieval core is written against.
//!
//! Implementations live in storage adapters (`kgrag-index`), in-process
//! helpers (`kgrag-query`, `kgrag-cache`), or the application shell.
//! Every method may fail with a transport-level error, which callers
//! propagate unchanged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheEntry, ModeBucket};
use crate::error::Result;
use crate::graph::{GraphEdge, GraphNode, Neighbor};

/// Point queries against a property graph.
#[async_trait]
pub trait GraphView: Send + Sync {
    async fn has_node(&self, node_id: &str) -> Result<bool>;

    /// Whether an edge connects the two nodes, in either direction.
    async fn has_edge(&self, source_id: &str, target_id: &str) -> Result<bool>;

    /// Number of edges touching the node (0 if it does not exist).
    async fn node_degree(&self, node_id: &str) -> Result<usize>;

    /// Sum of the degrees of both endpoints.
    async fn edge_degree(&self, source_id: &str, target_id: &str) -> Result<usize> {
        Ok(self.node_degree(source_id).await? + self.node_degree(target_id).await?)
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<GraphNode>>;

    /// The edge connecting the two nodes, whichever way it was stored.
    async fn get_edge(&self, source_id: &str, target_id: &str) -> Result<Option<GraphEdge>>;

    /// Every edge touching the node together with the node on its other
    /// end. Ordering must be stable between calls.
    async fn get_node_neighbors(&self, node_id: &str) -> Result<Vec<Neighbor>>;

    /// All node labels, sorted.
    async fn get_all_labels(&self) -> Result<Vec<String>>;
}

/// Key-value storage of cache buckets, one bucket per mode.
///
/// Buckets are read and written whole. Two concurrent writers of the same
/// mode race and the last write wins; callers that need more must
/// serialize per mode.
#[async_trait]
pub trait ModeCache: Send + Sync {
    async fn get_bucket(&self, mode: &str) -> Result<Option<ModeBucket>>;

    async fn put_bucket(&self, mode: &str, bucket: ModeBucket) -> Result<()>;

    async fn get_entry(&self, mode: &str, args_hash: &str) -> Result<Option<CacheEntry>> {
        Ok(self
            .get_bucket(mode)
            .await?
            .and_then(|mut bucket| bucket.remove(args_hash)))
    }

    /// Delete every entry of the given modes. Returns `false` when nothing
    /// was requested or the store does not support dropping.
    async fn drop_modes(&self, modes: &[String]) -> Result<bool>;
}

/// Maps text to fixed-length vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;

    fn max_input_tokens(&self) -> usize;
}

/// Secondary check comparing two prompts, returning a similarity roughly
/// in `[0, 1]`.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn compare(&self, prompt_a: &str, prompt_b: &str) -> Result<f32>;
}

/// A chat message passed as conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Per-call generation options.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub history: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
}

/// Text generation capability.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<String>;
}
