//! Error types for kgrag.

use thiserror::Error;

/// Top-level result type for kgrag operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// Top-level error type for kgrag.
///
/// Missing nodes and missing cache keys are not errors: they surface as an
/// empty graph, `None`, or a cache miss.
#[derive(Debug, Error)]
pub enum RagError {
    /// A backing store or remote capability could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    /// The similarity verifier failed or returned something unparseable.
    #[error("verifier error: {0}")]
    Verifier(String),

    #[error("completion error: {0}")]
    Completion(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RagError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Errors raised while decoding a stored quantized embedding.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("embedding shape {shape:?} does not describe {len} stored bytes")]
    ShapeMismatch { shape: Vec<usize>, len: usize },

    #[error("embedding dimension {actual} does not match expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding bounds are not finite (min={min}, max={max})")]
    NonFiniteBounds { min: f32, max: f32 },
}
