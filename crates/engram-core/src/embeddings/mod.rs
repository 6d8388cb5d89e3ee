//! Embedding collaborator boundary.
//!
//! Text -> dense vector (and consolidation summaries) live behind
//! [`EmbeddingProvider`]; the engine treats acquisition as fallible and
//! eventually consistent. Entries may briefly live without embeddings and
//! search filters them out rather than crash.

mod http;

pub use http::HttpEmbeddingProvider;

use async_trait::async_trait;

use crate::cancel::Cancellation;
use crate::error::Result;

/// External embedding/summarization provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, recorded in entry metadata by enrichment.
    fn model_name(&self) -> &str;

    /// Embed one text.
    async fn embed(&self, text: &str, cancel: &Cancellation) -> Result<Vec<f32>>;

    /// Embed several texts; the default loops over [`Self::embed`].
    async fn embed_batch(&self, texts: &[String], cancel: &Cancellation) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            cancel.checkpoint()?;
            vectors.push(self.embed(text, cancel).await?);
        }
        Ok(vectors)
    }

    /// Produce a lossy summary of several contents for consolidation.
    ///
    /// Providers without a consolidation model return an error; the caller
    /// falls back to the deterministic reducer.
    async fn summarize(&self, contents: &[String], cancel: &Cancellation) -> Result<String>;

    /// Liveness probe, surfaced through the service registry.
    async fn health(&self) -> Result<()>;
}

// ============================================================================
// SIMILARITY
// ============================================================================

/// Cosine similarity; 0.0 for mismatched or zero-norm vectors.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

// ============================================================================
// TEST PROVIDER
// ============================================================================


// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_and_orthogonal() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-4);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-4);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn euclidean_basics() {
        assert!(euclidean_distance(&[0.0, 0.0], &[1.0, 0.0]) - 1.0 < 1e-4);
        assert_eq!(euclidean_distance(&[1.0], &[1.0, 2.0]), f32::MAX);
    }

    #[tokio::test]
    async fn static_provider_correlates_shared_tokens() {
        let provider = testing::StaticEmbeddingProvider::new(64);
        let cancel = Cancellation::new();
        let hello_world = provider.embed("hello world", &cancel).await.unwrap();
        let hello = provider.embed("hello", &cancel).await.unwrap();
        let other = provider.embed("entirely unrelated text", &cancel).await.unwrap();

        assert!(cosine_similarity(&hello_world, &hello) >= 0.5);
        assert!(
            cosine_similarity(&hello_world, &hello)
                > cosine_similarity(&hello_world, &other)
        );
    }

    #[tokio::test]
    async fn static_provider_is_deterministic() {
        let provider = testing::StaticEmbeddingProvider::new(32);
        let cancel = Cancellation::new();
        let a = provider.embed("same text", &cancel).await.unwrap();
        let b = provider.embed("same text", &cancel).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
