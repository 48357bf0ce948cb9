//! # kgrag-core
//!
//! Core types, capability traits, and configuration for the kgrag
//! retrieval engine.
//!
//! This crate defines the foundational types used across all other kgrag crates:
//! - Graph model ([`GraphNode`], [`GraphEdge`], [`KnowledgeGraph`], [`Neighbor`])
//! - Cache model ([`CacheEntry`], [`ModeBucket`], [`QuantizedEmbedding`])
//! - Mode dispatch ([`CacheCategory`], [`ModeTable`])
//! - Capability traits ([`GraphView`], [`ModeCache`], [`EmbeddingProvider`],
//!   [`Verifier`], [`CompletionProvider`])
//! - Error hierarchy ([`RagError`], [`CodecError`])
//! - Configuration ([`KgragConfig`])

pub mod cache;
pub mod config;
pub mod error;
pub mod graph;
pub mod hash;
pub mod traits;

pub use cache::{CacheCategory, CacheEntry, ModeBucket, ModeTable, QuantizedEmbedding};
pub use config::{CacheConfig, EmbeddingCacheConfig, GraphConfig, KgragConfig, StorageConfig};
pub use error::{CodecError, RagError, Result};
pub use graph::{GraphEdge, GraphNode, KnowledgeGraph, Neighbor};
pub use hash::compute_args_hash;
pub use traits::{
    ChatMessage, CompletionOptions, CompletionProvider, EmbeddingProvider, GraphView, ModeCache,
    Verifier,
};
