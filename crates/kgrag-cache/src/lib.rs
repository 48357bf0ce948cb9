//! # kgrag-cache
//!
//! Approximate-match cache for LLM responses.
//!
//! Includes:
//! - [`codec`]: 8-bit embedding quantization
//! - [`similarity`]: cosine similarity
//! - [`SemanticCache`]: mode-partitioned lookup and idempotent writes
//! - [`MemoryModeCache`]: in-process bucket store
//! - [`LlmVerifier`]: prompt-comparison check backed by a completion provider
//! - [`complete_with_cache`]: cached completion for the extraction path

pub mod codec;
pub mod completion;
pub mod memory;
pub mod semantic;
pub mod similarity;
pub mod stats;
pub mod verifier;

pub use completion::complete_with_cache;
pub use memory::MemoryModeCache;
pub use semantic::{CacheHit, CacheLookup, CacheRecord, CacheRequest, ResponseContent, SemanticCache};
pub use stats::CacheStats;
pub use verifier::LlmVerifier;
