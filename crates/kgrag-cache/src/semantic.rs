//! Mode-partitioned LLM response cache with embedding-similarity matching.
//!
//! Lookup outcome per request:
//! - [`CacheLookup::Disabled`]: caching is off for the mode's category
//! - [`CacheLookup::ExactMiss`]: exact-key lookup found nothing
//! - [`CacheLookup::EmbeddingMiss`]: no cached prompt was similar enough
//! - [`CacheLookup::RejectedByVerifier`]: a similar prompt was found but the
//!   verifier scored it below the threshold, or failed
//! - [`CacheLookup::Hit`]: a cached response can be reused
//!
//! Misses on the embedding path carry the quantized query embedding so the
//! caller can store it with the generated response without embedding the
//! prompt a second time.
//!
//! Buckets are read-modify-written whole. Without `serialize_saves`, two
//! concurrent saves to the same mode race and the last write wins.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use kgrag_core::config::CacheConfig;
use kgrag_core::{
    CacheCategory, CacheEntry, EmbeddingProvider, ModeCache, ModeTable, QuantizedEmbedding,
    Result, Verifier,
};

use crate::codec;
use crate::similarity::cosine_similarity;
use crate::stats::{CacheStats, Counters};

/// Identifies one cacheable generation.
#[derive(Debug, Clone, Copy)]
pub struct CacheRequest<'a> {
    pub mode: &'a str,
    pub prompt: &'a str,
    pub args_hash: &'a str,
    pub cache_type: &'a str,
}

/// A generated response, or a stream that has not finished yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseContent {
    Complete(String),
    Streaming,
}

/// Everything needed to write one cache entry.
#[derive(Debug, Clone)]
pub struct CacheRecord {
    pub mode: String,
    pub cache_type: String,
    pub args_hash: String,
    pub content: ResponseContent,
    pub prompt: String,
    pub embedding: Option<QuantizedEmbedding>,
}

impl CacheRecord {
    pub fn new(request: &CacheRequest<'_>, content: ResponseContent) -> Self {
        Self {
            mode: request.mode.to_string(),
            cache_type: request.cache_type.to_string(),
            args_hash: request.args_hash.to_string(),
            content,
            prompt: request.prompt.to_string(),
            embedding: None,
        }
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Option<QuantizedEmbedding>) -> Self {
        self.embedding = embedding;
        self
    }
}

/// A reusable cached response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub content: String,
    /// Hash of the entry that matched.
    pub args_hash: String,
    /// Vector (or verifier) similarity; `None` for exact-key hits.
    pub similarity: Option<f32>,
}

/// Result of [`SemanticCache::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Disabled,
    ExactMiss,
    EmbeddingMiss(QuantizedEmbedding),
    RejectedByVerifier(QuantizedEmbedding),
    Hit(CacheHit),
}

impl CacheLookup {
    pub fn hit(&self) -> Option<&CacheHit> {
        match self {
            Self::Hit(hit) => Some(hit),
            _ => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// The query embedding computed during a miss, if any.
    pub fn into_embedding(self) -> Option<QuantizedEmbedding> {
        match self {
            Self::EmbeddingMiss(e) | Self::RejectedByVerifier(e) => Some(e),
            _ => None,
        }
    }
}

/// Approximate-match cache over a [`ModeCache`] store.
pub struct SemanticCache {
    store: Arc<dyn ModeCache>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    verifier: Option<Arc<dyn Verifier>>,
    config: CacheConfig,
    modes: ModeTable,
    counters: Counters,
    save_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SemanticCache {
    pub fn new(store: Arc<dyn ModeCache>, config: CacheConfig) -> Self {
        Self {
            store,
            embedder: None,
            verifier: None,
            config,
            modes: ModeTable::default(),
            counters: Counters::default(),
            save_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    #[must_use]
    pub fn with_mode_table(mut self, modes: ModeTable) -> Self {
        self.modes = modes;
        self
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Whether lookups for `mode` consult the store at all.
    pub fn is_enabled_for(&self, mode: &str) -> bool {
        match self.modes.category(mode) {
            CacheCategory::Exact => self.config.enable_llm_cache_for_entity_extract,
            CacheCategory::Semantic => self.config.enable_llm_cache,
        }
    }

    /// Look up a reusable response for `request`.
    ///
    /// # Errors
    ///
    /// Store and embedding failures propagate. Verifier failures do not:
    /// they turn the lookup into [`CacheLookup::RejectedByVerifier`].
    pub async fn resolve(&self, request: &CacheRequest<'_>) -> Result<CacheLookup> {
        if !self.is_enabled_for(request.mode) {
            debug!(mode = request.mode, "cache disabled for mode");
            return Ok(CacheLookup::Disabled);
        }

        let lookup = match (self.modes.category(request.mode), self.active_embedder()) {
            (CacheCategory::Semantic, Some(embedder)) => {
                self.resolve_by_embedding(request, embedder.as_ref()).await?
            }
            _ => self.resolve_exact(request).await?,
        };

        match &lookup {
            CacheLookup::Hit(_) => Counters::bump(&self.counters.hits),
            CacheLookup::RejectedByVerifier(_) => Counters::bump(&self.counters.rejected),
            CacheLookup::ExactMiss | CacheLookup::EmbeddingMiss(_) => {
                Counters::bump(&self.counters.misses);
            }
            CacheLookup::Disabled => {}
        }
        Ok(lookup)
    }

    async fn resolve_exact(&self, request: &CacheRequest<'_>) -> Result<CacheLookup> {
        match self.store.get_entry(request.mode, request.args_hash).await? {
            Some(entry) => {
                debug!(
                    mode = request.mode,
                    cache_type = request.cache_type,
                    "exact cache hit"
                );
                Ok(CacheLookup::Hit(CacheHit {
                    content: entry.return_value,
                    args_hash: entry.args_hash,
                    similarity: None,
                }))
            }
            None => {
                debug!(
                    mode = request.mode,
                    cache_type = request.cache_type,
                    "exact cache miss"
                );
                Ok(CacheLookup::ExactMiss)
            }
        }
    }

    async fn resolve_by_embedding(
        &self,
        request: &CacheRequest<'_>,
        embedder: &dyn EmbeddingProvider,
    ) -> Result<CacheLookup> {
        let raw = embedder.embed(request.prompt).await?;
        let quantized = codec::encode(&raw);
        // Stored vectors are lossy; compare like with like.
        let query = codec::decode(&quantized.values, quantized.min, quantized.max);
        let threshold = self.config.embedding.similarity_threshold;

        let Some(bucket) = self.store.get_bucket(request.mode).await? else {
            debug!(mode = request.mode, "embedding cache miss: empty bucket");
            return Ok(CacheLookup::EmbeddingMiss(quantized));
        };

        let mut best: Option<(f32, &CacheEntry)> = None;
        for entry in bucket.values() {
            if entry.cache_type != request.cache_type {
                continue;
            }
            let Some(stored) = &entry.embedding else {
                continue;
            };
            let cached = match codec::decode_checked(stored, query.len()) {
                Ok(v) => v,
                Err(e) => {
                    debug!(args_hash = %entry.args_hash, error = %e, "skipping unusable cached embedding");
                    continue;
                }
            };
            let similarity = cosine_similarity(&query, &cached);
            if best.is_none_or(|(b, _)| similarity > b) {
                best = Some((similarity, entry));
            }
        }

        let Some((mut similarity, entry)) = best.filter(|(s, _)| *s >= threshold) else {
            debug!(
                mode = request.mode,
                cache_type = request.cache_type,
                best = best.map(|(s, _)| s),
                threshold,
                "embedding cache miss"
            );
            return Ok(CacheLookup::EmbeddingMiss(quantized));
        };

        if let Some(verifier) = self.active_verifier() {
            match verifier
                .compare(request.prompt, &entry.original_prompt)
                .await
            {
                Ok(score) if score >= threshold => similarity = score,
                Ok(score) => {
                    info!(
                        mode = request.mode,
                        cache_type = request.cache_type,
                        score,
                        threshold,
                        "cache hit rejected by verifier"
                    );
                    return Ok(CacheLookup::RejectedByVerifier(quantized));
                }
                Err(e) => {
                    warn!(error = %e, "similarity verification failed, treating as miss");
                    return Ok(CacheLookup::RejectedByVerifier(quantized));
                }
            }
        }

        debug!(
            mode = request.mode,
            cache_type = request.cache_type,
            similarity,
            cache_id = %entry.args_hash,
            prompt = %preview(&entry.original_prompt, 50),
            "embedding cache hit"
        );
        Ok(CacheLookup::Hit(CacheHit {
            content: entry.return_value.clone(),
            args_hash: entry.args_hash.clone(),
            similarity: Some(similarity),
        }))
    }

    /// Store a generated response.
    ///
    /// Returns `false` without writing when the content is empty, still
    /// streaming, or identical to what is already cached under the same
    /// hash.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn save(&self, record: CacheRecord) -> Result<bool> {
        let content = match record.content {
            ResponseContent::Streaming => {
                debug!("streaming response detected, skipping cache");
                return Ok(false);
            }
            ResponseContent::Complete(c) if c.is_empty() => return Ok(false),
            ResponseContent::Complete(c) => c,
        };

        let lock = self
            .config
            .serialize_saves
            .then(|| self.save_lock(&record.mode));
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let mut bucket = self
            .store
            .get_bucket(&record.mode)
            .await?
            .unwrap_or_default();

        let now = Utc::now();
        let created_at = match bucket.get(&record.args_hash) {
            Some(existing) if existing.return_value == content => {
                info!(args_hash = %record.args_hash, "cache content unchanged, skipping update");
                Counters::bump(&self.counters.skipped_writes);
                return Ok(false);
            }
            Some(existing) => existing.created_at,
            None => now,
        };

        bucket.insert(
            record.args_hash.clone(),
            CacheEntry {
                args_hash: record.args_hash,
                mode: record.mode.clone(),
                cache_type: record.cache_type,
                return_value: content,
                original_prompt: record.prompt,
                embedding: record.embedding,
                created_at,
                updated_at: now,
            },
        );
        self.store.put_bucket(&record.mode, bucket).await?;
        Counters::bump(&self.counters.writes);
        Ok(true)
    }

    /// Return a cached response for `request`, or run `generate`, cache
    /// its output, and return it.
    ///
    /// Nothing is written when caching is disabled for the mode.
    ///
    /// # Errors
    ///
    /// Propagates lookup, generation and store failures.
    pub async fn get_or_generate<F, Fut>(
        &self,
        request: &CacheRequest<'_>,
        generate: F,
    ) -> Result<ResponseContent>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResponseContent>>,
    {
        let lookup = self.resolve(request).await?;
        if let CacheLookup::Hit(hit) = lookup {
            return Ok(ResponseContent::Complete(hit.content));
        }
        let disabled = lookup == CacheLookup::Disabled;

        Counters::bump(&self.counters.generations);
        let content = generate().await?;
        if !disabled {
            let record = CacheRecord::new(request, content.clone())
                .with_embedding(lookup.into_embedding());
            self.save(record).await?;
        }
        Ok(content)
    }

    fn active_embedder(&self) -> Option<&Arc<dyn EmbeddingProvider>> {
        if self.config.embedding.enabled {
            self.embedder.as_ref()
        } else {
            None
        }
    }

    fn active_verifier(&self) -> Option<&Arc<dyn Verifier>> {
        if self.config.embedding.use_llm_check {
            self.verifier.as_ref()
        } else {
            None
        }
    }

    fn save_lock(&self, mode: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .save_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(mode.to_string()).or_default().clone()
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryModeCache;
    use async_trait::async_trait;
    use kgrag_core::config::EmbeddingCacheConfig;
    use kgrag_core::{ModeBucket, RagError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds known prompts to fixed vectors, anything else to a default.
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
    }

    impl TableEmbedder {
        fn new(pairs: &[(&str, Vec<f32>)]) -> Self {
            Self {
                table: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for TableEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(self
                .table
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![0.0, 0.0, 1.0]))
        }
        fn dimension(&self) -> usize {
            3
        }
        fn max_input_tokens(&self) -> usize {
            8192
        }
    }

    struct DownEmbedder;

    #[async_trait]
    impl EmbeddingProvider for DownEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(RagError::Transport("embedding service unreachable".to_string()))
        }
        fn dimension(&self) -> usize {
            3
        }
        fn max_input_tokens(&self) -> usize {
            8192
        }
    }

    struct FixedVerifier {
        score: Option<f32>,
        calls: AtomicUsize,
    }

    impl FixedVerifier {
        fn scoring(score: f32) -> Arc<Self> {
            Arc::new(Self {
                score: Some(score),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                score: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Verifier for FixedVerifier {
        async fn compare(&self, _a: &str, _b: &str) -> Result<f32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.score
                .ok_or_else(|| RagError::Verifier("could not parse 'maybe'".to_string()))
        }
    }

    /// Yields to the scheduler inside every bucket read, so concurrent
    /// saves interleave.
    #[derive(Default)]
    struct YieldingStore(MemoryModeCache);

    #[async_trait]
    impl ModeCache for YieldingStore {
        async fn get_bucket(&self, mode: &str) -> Result<Option<ModeBucket>> {
            let bucket = self.0.get_bucket(mode).await;
            tokio::task::yield_now().await;
            bucket
        }
        async fn put_bucket(&self, mode: &str, bucket: ModeBucket) -> Result<()> {
            self.0.put_bucket(mode, bucket).await
        }
        async fn drop_modes(&self, modes: &[String]) -> Result<bool> {
            self.0.drop_modes(modes).await
        }
    }

    fn semantic_config(threshold: f32, use_llm_check: bool) -> CacheConfig {
        CacheConfig {
            embedding: EmbeddingCacheConfig {
                enabled: true,
                similarity_threshold: threshold,
                use_llm_check,
            },
            ..CacheConfig::default()
        }
    }

    fn request<'a>(mode: &'a str, prompt: &'a str, hash: &'a str) -> CacheRequest<'a> {
        CacheRequest {
            mode,
            prompt,
            args_hash: hash,
            cache_type: "query",
        }
    }

    fn embedder() -> Arc<TableEmbedder> {
        Arc::new(TableEmbedder::new(&[
            ("who founded acme?", vec![0.9, 0.1, 0.0]),
            ("who started acme?", vec![0.89, 0.12, 0.0]),
            ("weather today", vec![0.0, 0.1, 0.9]),
        ]))
    }

    async fn seed(cache: &SemanticCache, mode: &str, prompt: &str, hash: &str, answer: &str) {
        let req = request(mode, prompt, hash);
        let lookup = cache.resolve(&req).await.unwrap();
        let record = CacheRecord::new(&req, ResponseContent::Complete(answer.to_string()))
            .with_embedding(lookup.into_embedding());
        assert!(cache.save(record).await.unwrap());
    }

    #[tokio::test]
    async fn disabled_mode_short_circuits() {
        let config = CacheConfig {
            enable_llm_cache: false,
            ..CacheConfig::default()
        };
        let cache = SemanticCache::new(Arc::new(MemoryModeCache::new()), config);
        let lookup = cache.resolve(&request("local", "q", "h")).await.unwrap();
        assert_eq!(lookup, CacheLookup::Disabled);
    }

    #[tokio::test]
    async fn extraction_mode_matches_exact_key_only() {
        let cache = SemanticCache::new(
            Arc::new(MemoryModeCache::new()),
            semantic_config(0.5, false),
        )
        .with_embedder(embedder());

        let req = CacheRequest {
            mode: "default",
            prompt: "extract entities from chunk 1",
            args_hash: "h1",
            cache_type: "extract",
        };
        assert_eq!(cache.resolve(&req).await.unwrap(), CacheLookup::ExactMiss);

        let record = CacheRecord::new(&req, ResponseContent::Complete("entities".to_string()));
        cache.save(record).await.unwrap();

        let hit = cache.resolve(&req).await.unwrap();
        assert_eq!(hit.hit().unwrap().content, "entities");
        assert_eq!(hit.hit().unwrap().similarity, None);

        let other = CacheRequest {
            args_hash: "h2",
            ..req
        };
        assert_eq!(cache.resolve(&other).await.unwrap(), CacheLookup::ExactMiss);
    }

    #[tokio::test]
    async fn query_mode_without_embeddings_uses_exact_lookup() {
        let cache = SemanticCache::new(Arc::new(MemoryModeCache::new()), CacheConfig::default())
            .with_embedder(embedder());
        let lookup = cache
            .resolve(&request("local", "who founded acme?", "h"))
            .await
            .unwrap();
        assert_eq!(lookup, CacheLookup::ExactMiss);
    }

    #[tokio::test]
    async fn empty_bucket_misses_with_embedding_for_later_save() {
        let cache = SemanticCache::new(
            Arc::new(MemoryModeCache::new()),
            semantic_config(0.95, false),
        )
        .with_embedder(embedder());

        let lookup = cache
            .resolve(&request("local", "who founded acme?", "h1"))
            .await
            .unwrap();
        let CacheLookup::EmbeddingMiss(embedding) = lookup else {
            panic!("expected embedding miss, got {lookup:?}");
        };
        assert_eq!(embedding.values.len(), 3);
        assert_eq!(embedding.shape, vec![3]);
    }

    #[tokio::test]
    async fn identical_embedding_hits_at_threshold_one() {
        let cache = SemanticCache::new(
            Arc::new(MemoryModeCache::new()),
            semantic_config(1.0, false),
        )
        .with_embedder(embedder());
        seed(&cache, "local", "who founded acme?", "h1", "Alice").await;

        let lookup = cache
            .resolve(&request("local", "who founded acme?", "h-other"))
            .await
            .unwrap();
        let hit = lookup.hit().expect("identical prompt should hit");
        assert_eq!(hit.content, "Alice");
        assert_eq!(hit.args_hash, "h1");
    }

    #[tokio::test]
    async fn similar_prompt_hits_and_dissimilar_misses() {
        let cache = SemanticCache::new(
            Arc::new(MemoryModeCache::new()),
            semantic_config(0.95, false),
        )
        .with_embedder(embedder());
        seed(&cache, "local", "who founded acme?", "h1", "Alice").await;

        let similar = cache
            .resolve(&request("local", "who started acme?", "h2"))
            .await
            .unwrap();
        assert_eq!(similar.hit().unwrap().content, "Alice");
        assert!(similar.hit().unwrap().similarity.unwrap() > 0.95);

        let different = cache
            .resolve(&request("local", "weather today", "h3"))
            .await
            .unwrap();
        assert!(!different.is_hit());
        assert!(matches!(different, CacheLookup::EmbeddingMiss(_)));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[tokio::test]
    async fn mode_table_can_route_a_query_mode_to_exact_lookup() {
        let modes = ModeTable::default().with_mode("naive", CacheCategory::Exact);
        let cache = SemanticCache::new(
            Arc::new(MemoryModeCache::new()),
            semantic_config(0.95, false),
        )
        .with_embedder(embedder())
        .with_mode_table(modes);
        seed(&cache, "naive", "who founded acme?", "h1", "Alice").await;
        seed(&cache, "local", "who founded acme?", "h1", "Alice").await;

        let reworded = cache
            .resolve(&request("naive", "who started acme?", "h2"))
            .await
            .unwrap();
        assert_eq!(reworded, CacheLookup::ExactMiss);

        let same_key = cache
            .resolve(&request("naive", "who started acme?", "h1"))
            .await
            .unwrap();
        assert!(same_key.is_hit());
        assert_eq!(same_key.hit().unwrap().similarity, None);

        let semantic = cache
            .resolve(&request("local", "who started acme?", "h2"))
            .await
            .unwrap();
        assert!(semantic.is_hit());
    }

    #[tokio::test]
    async fn other_modes_and_cache_types_are_not_matched() {
        let cache = SemanticCache::new(
            Arc::new(MemoryModeCache::new()),
            semantic_config(0.95, false),
        )
        .with_embedder(embedder());
        seed(&cache, "local", "who founded acme?", "h1", "Alice").await;

        let global = cache
            .resolve(&request("global", "who founded acme?", "h1"))
            .await
            .unwrap();
        assert!(matches!(global, CacheLookup::EmbeddingMiss(_)));

        let keywords = CacheRequest {
            cache_type: "keywords",
            ..request("local", "who founded acme?", "h1")
        };
        assert!(matches!(
            cache.resolve(&keywords).await.unwrap(),
            CacheLookup::EmbeddingMiss(_)
        ));
    }

    #[tokio::test]
    async fn below_threshold_misses_without_consulting_verifier() {
        let verifier = FixedVerifier::scoring(1.0);
        let cache = SemanticCache::new(
            Arc::new(MemoryModeCache::new()),
            semantic_config(0.95, true),
        )
        .with_embedder(embedder())
        .with_verifier(verifier.clone());
        seed(&cache, "local", "who founded acme?", "h1", "Alice").await;

        let lookup = cache
            .resolve(&request("local", "weather today", "h2"))
            .await
            .unwrap();
        assert!(matches!(lookup, CacheLookup::EmbeddingMiss(_)));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn verifier_score_replaces_vector_similarity() {
        let verifier = FixedVerifier::scoring(0.97);
        let cache = SemanticCache::new(
            Arc::new(MemoryModeCache::new()),
            semantic_config(0.95, true),
        )
        .with_embedder(embedder())
        .with_verifier(verifier.clone());
        seed(&cache, "local", "who founded acme?", "h1", "Alice").await;

        let lookup = cache
            .resolve(&request("local", "who started acme?", "h2"))
            .await
            .unwrap();
        let hit = lookup.hit().unwrap();
        assert!((hit.similarity.unwrap() - 0.97).abs() < f32::EPSILON);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn low_verifier_score_rejects_hit() {
        let cache = SemanticCache::new(
            Arc::new(MemoryModeCache::new()),
            semantic_config(0.95, true),
        )
        .with_embedder(embedder())
        .with_verifier(FixedVerifier::scoring(0.2));
        seed(&cache, "local", "who founded acme?", "h1", "Alice").await;

        let lookup = cache
            .resolve(&request("local", "who started acme?", "h2"))
            .await
            .unwrap();
        assert!(matches!(lookup, CacheLookup::RejectedByVerifier(_)));
        assert!(lookup.into_embedding().is_some());
        assert_eq!(cache.stats().rejected, 1);
    }

    #[tokio::test]
    async fn verifier_failure_is_a_miss_not_an_error() {
        let cache = SemanticCache::new(
            Arc::new(MemoryModeCache::new()),
            semantic_config(0.95, true),
        )
        .with_embedder(embedder())
        .with_verifier(FixedVerifier::failing());
        seed(&cache, "local", "who founded acme?", "h1", "Alice").await;

        let lookup = cache
            .resolve(&request("local", "who founded acme?", "h2"))
            .await
            .unwrap();
        assert!(matches!(lookup, CacheLookup::RejectedByVerifier(_)));
    }

    #[tokio::test]
    async fn malformed_entry_is_skipped_not_fatal() {
        let store = Arc::new(MemoryModeCache::new());
        let cache = SemanticCache::new(store.clone(), semantic_config(0.95, false))
            .with_embedder(embedder());
        seed(&cache, "local", "who founded acme?", "good", "Alice").await;

        let mut bucket = store.get_bucket("local").await.unwrap().unwrap();
        let mut broken = bucket["good"].clone();
        broken.args_hash = "broken".to_string();
        broken.return_value = "Mallory".to_string();
        if let Some(e) = broken.embedding.as_mut() {
            e.shape = vec![7];
        }
        bucket.insert("broken".to_string(), broken);
        store.put_bucket("local", bucket).await.unwrap();

        let lookup = cache
            .resolve(&request("local", "who founded acme?", "h2"))
            .await
            .unwrap();
        assert_eq!(lookup.hit().unwrap().content, "Alice");
    }

    #[tokio::test]
    async fn embedding_failure_propagates() {
        let cache = SemanticCache::new(
            Arc::new(MemoryModeCache::new()),
            semantic_config(0.95, false),
        )
        .with_embedder(Arc::new(DownEmbedder));
        let err = cache
            .resolve(&request("local", "q", "h"))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Transport(_)));
    }

    #[tokio::test]
    async fn identical_save_is_a_no_op() {
        let store = Arc::new(MemoryModeCache::new());
        let cache = SemanticCache::new(store.clone(), CacheConfig::default());
        let req = request("local", "q", "h1");
        let record = CacheRecord::new(&req, ResponseContent::Complete("answer".to_string()));

        assert!(cache.save(record.clone()).await.unwrap());
        let before = store.get_bucket("local").await.unwrap();
        assert!(!cache.save(record).await.unwrap());
        let after = store.get_bucket("local").await.unwrap();

        assert_eq!(before, after);
        assert_eq!(cache.stats().skipped_writes, 1);
    }

    #[tokio::test]
    async fn changed_content_replaces_entry_and_keeps_created_at() {
        let store = Arc::new(MemoryModeCache::new());
        let cache = SemanticCache::new(store.clone(), CacheConfig::default());
        let req = request("local", "q", "h1");

        cache
            .save(CacheRecord::new(&req, ResponseContent::Complete("v1".to_string())))
            .await
            .unwrap();
        let first = store.get_entry("local", "h1").await.unwrap().unwrap();

        assert!(cache
            .save(CacheRecord::new(&req, ResponseContent::Complete("v2".to_string())))
            .await
            .unwrap());
        let second = store.get_entry("local", "h1").await.unwrap().unwrap();

        assert_eq!(second.return_value, "v2");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn empty_and_streaming_content_are_not_saved() {
        let store = Arc::new(MemoryModeCache::new());
        let cache = SemanticCache::new(store.clone(), CacheConfig::default());
        let req = request("local", "q", "h1");

        assert!(!cache
            .save(CacheRecord::new(&req, ResponseContent::Complete(String::new())))
            .await
            .unwrap());
        assert!(!cache
            .save(CacheRecord::new(&req, ResponseContent::Streaming))
            .await
            .unwrap());
        assert!(store.get_bucket("local").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_or_generate_generates_once_then_hits() {
        let store = Arc::new(MemoryModeCache::new());
        let cache = SemanticCache::new(store.clone(), semantic_config(0.95, false))
            .with_embedder(embedder());
        let calls = AtomicUsize::new(0);
        let req = request("local", "who founded acme?", "h1");

        for _ in 0..2 {
            let out = cache
                .get_or_generate(&req, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(ResponseContent::Complete("Alice".to_string()))
                })
                .await
                .unwrap();
            assert_eq!(out, ResponseContent::Complete("Alice".to_string()));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let entry = store.get_entry("local", "h1").await.unwrap().unwrap();
        assert!(entry.embedding.is_some(), "miss embedding should be stored");
        assert_eq!(cache.stats().generations, 1);
    }

    #[tokio::test]
    async fn get_or_generate_skips_write_when_disabled() {
        let store = Arc::new(MemoryModeCache::new());
        let config = CacheConfig {
            enable_llm_cache: false,
            ..CacheConfig::default()
        };
        let cache = SemanticCache::new(store.clone(), config);
        let out = cache
            .get_or_generate(&request("local", "q", "h1"), || async {
                Ok(ResponseContent::Complete("fresh".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(out, ResponseContent::Complete("fresh".to_string()));
        assert!(store.get_bucket("local").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn serialized_saves_keep_both_entries() {
        let store = Arc::new(YieldingStore::default());
        let config = CacheConfig {
            serialize_saves: true,
            ..CacheConfig::default()
        };
        let cache = SemanticCache::new(store.clone(), config);
        let a = request("local", "qa", "ha");
        let b = request("local", "qb", "hb");

        let (ra, rb) = tokio::join!(
            cache.save(CacheRecord::new(&a, ResponseContent::Complete("A".to_string()))),
            cache.save(CacheRecord::new(&b, ResponseContent::Complete("B".to_string()))),
        );
        assert!(ra.unwrap() && rb.unwrap());

        let bucket = store.get_bucket("local").await.unwrap().unwrap();
        assert_eq!(bucket.len(), 2);
    }
}
