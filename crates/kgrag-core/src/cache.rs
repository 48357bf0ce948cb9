//! LLM response cache model: entries, mode buckets, and mode dispatch.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mode used by the entity-extraction cache.
pub const DEFAULT_MODE: &str = "default";

/// All entries of one mode, keyed by args hash.
///
/// Fetched, mutated and stored back as a whole.
pub type ModeBucket = BTreeMap<String, CacheEntry>;

/// An 8-bit quantized embedding plus the bounds needed to reconstruct it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedEmbedding {
    /// Quantized components, stored as lowercase hex.
    #[serde(with = "hex_bytes")]
    pub values: Vec<u8>,
    pub min: f32,
    pub max: f32,
    pub shape: Vec<usize>,
}

/// A cached LLM response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub args_hash: String,
    pub mode: String,
    /// Free-form category tag ("query", "keywords", "extract").
    pub cache_type: String,
    pub return_value: String,
    pub original_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<QuantizedEmbedding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a mode's bucket is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheCategory {
    /// Hit only on an identical args hash (entity extraction).
    Exact,
    /// Hit on embedding similarity when embedding matching is enabled.
    Semantic,
}

/// Maps mode names to their [`CacheCategory`].
#[derive(Debug, Clone)]
pub struct ModeTable {
    modes: HashMap<String, CacheCategory>,
    fallback: CacheCategory,
}

impl Default for ModeTable {
    /// `"default"` is the extraction cache; the query modes are semantic.
    /// Unlisted modes are treated as query modes.
    fn default() -> Self {
        let mut modes = HashMap::new();
        modes.insert(DEFAULT_MODE.to_string(), CacheCategory::Exact);
        for mode in ["local", "global", "hybrid", "naive", "mix"] {
            modes.insert(mode.to_string(), CacheCategory::Semantic);
        }
        Self {
            modes,
            fallback: CacheCategory::Semantic,
        }
    }
}

impl ModeTable {
    #[must_use]
    pub fn with_mode(mut self, mode: &str, category: CacheCategory) -> Self {
        self.modes.insert(mode.to_string(), category);
        self
    }

    pub fn category(&self, mode: &str) -> CacheCategory {
        self.modes.get(mode).copied().unwrap_or(self.fallback)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
