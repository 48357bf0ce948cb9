//! # kgrag-query
//!
//! Graph-side retrieval for kgrag.
//!
//! Includes:
//! - [`SubgraphExtractor`]: depth- and size-bounded subgraph extraction over
//!   any [`GraphView`](kgrag_core::GraphView)
//! - [`MemoryGraph`]: an in-process graph store
//! - Graph export (DOT, Mermaid, JSON)

pub mod extractor;
pub mod format;
pub mod memory;

pub use extractor::{SubgraphExtractor, WILDCARD};
pub use format::{format_dot, format_json, format_mermaid, ExportFormat};
pub use memory::MemoryGraph;
