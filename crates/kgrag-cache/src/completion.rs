//! Completion calls routed through the extraction cache.

use tracing::debug;

use kgrag_core::cache::DEFAULT_MODE;
use kgrag_core::{compute_args_hash, CompletionOptions, CompletionProvider, RagError, Result};

use crate::semantic::{CacheRequest, ResponseContent, SemanticCache};

/// Run `input` through `provider`, reusing a cached reply when one exists.
///
/// The cache key covers the serialized history as well as the input, so
/// the same input in a different conversation is a different entry. Lookups
/// use the exact-match `"default"` mode. With no cache the provider is
/// called directly.
///
/// # Errors
///
/// Propagates provider and cache store failures.
pub async fn complete_with_cache<P>(
    provider: &P,
    cache: Option<&SemanticCache>,
    input: &str,
    options: &CompletionOptions,
    cache_type: &str,
) -> Result<String>
where
    P: CompletionProvider + ?Sized,
{
    let Some(cache) = cache else {
        return provider.complete(input, options).await;
    };

    let prompt = if options.history.is_empty() {
        input.to_string()
    } else {
        format!("{}\n{input}", serde_json::to_string(&options.history)?)
    };
    let args_hash = compute_args_hash(&[&prompt], None);
    let request = CacheRequest {
        mode: DEFAULT_MODE,
        prompt: &prompt,
        args_hash: &args_hash,
        cache_type,
    };

    let content = cache
        .get_or_generate(&request, || async {
            debug!(%args_hash, "cache miss, calling completion provider");
            provider
                .complete(input, options)
                .await
                .map(ResponseContent::Complete)
        })
        .await?;

    match content {
        ResponseContent::Complete(text) => Ok(text),
        ResponseContent::Streaming => Err(RagError::Completion(
            "provider returned a stream where text was expected".to_string(),
        )),
    }
}
