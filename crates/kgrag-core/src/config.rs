//! Configuration for kgrag.
//!
//! Parsed from a TOML file (`kgrag.toml`) or built programmatically.
//! Environment variables override file values:
//! - `KGRAG_GRAPH_MAX_DEPTH` → `graph.max_depth`
//! - `KGRAG_GRAPH_MAX_NODES` (or `MAX_GRAPH_NODES`) → `graph.max_nodes`
//! - `KGRAG_CACHE_ENABLED` → `cache.enable_llm_cache`
//! - `KGRAG_CACHE_EXTRACT_ENABLED` → `cache.enable_llm_cache_for_entity_extract`
//! - `KGRAG_CACHE_EMBEDDING_ENABLED` → `cache.embedding.enabled`
//! - `KGRAG_CACHE_SIMILARITY_THRESHOLD` → `cache.embedding.similarity_threshold`
//! - `KGRAG_CACHE_USE_LLM_CHECK` → `cache.embedding.use_llm_check`
//! - `KGRAG_STORAGE_PATH` → `storage.path`
//! - `KGRAG_STORAGE_WORKSPACE` → `storage.workspace`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KgragConfig {
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Subgraph extraction defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Maximum BFS depth (default: 3).
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Node budget per extraction (default: 1000).
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_nodes: default_max_nodes(),
        }
    }
}

/// LLM response cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache query-mode responses (default: true).
    #[serde(default = "default_true")]
    pub enable_llm_cache: bool,
    /// Cache entity-extraction responses (default: true).
    #[serde(default = "default_true")]
    pub enable_llm_cache_for_entity_extract: bool,
    /// Hold a per-mode lock around the bucket read-modify-write in `save`.
    #[serde(default)]
    pub serialize_saves: bool,
    #[serde(default)]
    pub embedding: EmbeddingCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_llm_cache: true,
            enable_llm_cache_for_entity_extract: true,
            serialize_saves: false,
            embedding: EmbeddingCacheConfig::default(),
        }
    }
}

/// Embedding-similarity matching for query modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingCacheConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Similarity a cached prompt must exceed to be reused (default: 0.95).
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Confirm embedding hits with the verifier (default: false).
    #[serde(default)]
    pub use_llm_check: bool,
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            similarity_threshold: default_similarity_threshold(),
            use_llm_check: false,
        }
    }
}

/// SQLite storage location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
    /// Tenant partition for cache rows (default: "default").
    #[serde(default = "default_workspace")]
    pub workspace: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            workspace: default_workspace(),
        }
    }
}

fn default_max_depth() -> usize {
    3
}
fn default_max_nodes() -> usize {
    1000
}
fn default_true() -> bool {
    true
}
fn default_similarity_threshold() -> f32 {
    0.95
}
fn default_storage_path() -> PathBuf {
    PathBuf::from("kgrag.db")
}
fn default_workspace() -> String {
    "default".to_string()
}

impl KgragConfig {
    /// Load configuration from a TOML file, apply env overrides, then validate.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Io`] if the file cannot be read and
    /// [`RagError::Config`] if it does not parse or validate.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_toml(&contents)
    }

    /// Parse configuration from a TOML string, apply env overrides, then validate.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] on parse or validation failure.
    pub fn parse_toml(toml_str: &str) -> Result<Self> {
        let mut config: KgragConfig = toml::from_str(toml_str)
            .map_err(|e| RagError::Config(format!("failed to parse TOML config: {e}")))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `KGRAG_*` environment variable overrides. Unparseable values
    /// are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse::<usize>("KGRAG_GRAPH_MAX_DEPTH") {
            self.graph.max_depth = v;
        }
        if let Some(v) = env_parse::<usize>("MAX_GRAPH_NODES") {
            self.graph.max_nodes = v;
        }
        if let Some(v) = env_parse::<usize>("KGRAG_GRAPH_MAX_NODES") {
            self.graph.max_nodes = v;
        }
        if let Some(v) = env_parse::<bool>("KGRAG_CACHE_ENABLED") {
            self.cache.enable_llm_cache = v;
        }
        if let Some(v) = env_parse::<bool>("KGRAG_CACHE_EXTRACT_ENABLED") {
            self.cache.enable_llm_cache_for_entity_extract = v;
        }
        if let Some(v) = env_parse::<bool>("KGRAG_CACHE_EMBEDDING_ENABLED") {
            self.cache.embedding.enabled = v;
        }
        if let Some(v) = env_parse::<f32>("KGRAG_CACHE_SIMILARITY_THRESHOLD") {
            self.cache.embedding.similarity_threshold = v;
        }
        if let Some(v) = env_parse::<bool>("KGRAG_CACHE_USE_LLM_CHECK") {
            self.cache.embedding.use_llm_check = v;
        }
        if let Ok(v) = std::env::var("KGRAG_STORAGE_PATH") {
            self.storage.path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("KGRAG_STORAGE_WORKSPACE") {
            self.storage.workspace = v;
        }
    }

    /// # Errors
    ///
    /// Returns [`RagError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.graph.max_nodes == 0 {
            return Err(RagError::Config(
                "graph.max_nodes must be > 0 (got 0)".to_string(),
            ));
        }
        let threshold = self.cache.embedding.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(RagError::Config(format!(
                "cache.embedding.similarity_threshold must be within [0, 1] (got {threshold})"
            )));
        }
        if self.storage.workspace.trim().is_empty() {
            return Err(RagError::Config(
                "storage.workspace must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
