//! # kgrag-index
//!
//! SQLite persistence for kgrag.
//!
//! - [`SqliteGraphStore`]: nodes and edges, implementing
//!   [`GraphView`](kgrag_core::GraphView)
//! - [`SqliteModeCache`]: workspace-scoped LLM response buckets,
//!   implementing [`ModeCache`](kgrag_core::ModeCache)
//!
//! Both stores may share one database file; each opens its own connection.

pub mod cache;
pub mod graph;

pub use cache::{ModeSummary, SqliteModeCache};
pub use graph::SqliteGraphStore;
