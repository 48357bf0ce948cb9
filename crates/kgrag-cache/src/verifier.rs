//! [`Verifier`] that asks a language model to score two prompts.

use async_trait::async_trait;

use kgrag_core::{CompletionOptions, CompletionProvider, RagError, Result, Verifier};

const SIMILARITY_PROMPT: &str = "\
Rate how similar the following two questions are, and whether an answer to \
the second would also fully answer the first.

Question 1: {first}
Question 2: {second}

Reply with a single number between 0 and 1, where 1 means the questions are \
equivalent and 0 means they are unrelated. Do not add any other text.";

/// Scores prompt pairs with a completion model.
///
/// The reply must parse as a float after trimming whitespace.
pub struct LlmVerifier<P> {
    provider: P,
}

impl<P: CompletionProvider> LlmVerifier<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn prompt(first: &str, second: &str) -> String {
        SIMILARITY_PROMPT
            .replace("{first}", first)
            .replace("{second}", second)
    }
}

#[async_trait]
impl<P: CompletionProvider> Verifier for LlmVerifier<P> {
    async fn compare(&self, prompt_a: &str, prompt_b: &str) -> Result<f32> {
        let reply = self
            .provider
            .complete(&Self::prompt(prompt_a, prompt_b), &CompletionOptions::default())
            .await
            .map_err(|e| RagError::Verifier(e.to_string()))?;
        reply
            .trim()
            .parse::<f32>()
            .map_err(|e| RagError::Verifier(format!("unparseable score {:?}: {e}", reply.trim())))
    }
}
