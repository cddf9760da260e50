//! Text similarity helpers and the embeddings cache.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use crate::llm::Embedder;

const CACHE_CAPACITY: usize = 1024;

/// Cosine similarity of two vectors; 0.0 when either has zero norm or
/// the lengths disagree.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Jaccard similarity over lowercase word sets.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: std::collections::HashSet<String> = a
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    let set_b: std::collections::HashSet<String> = b
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

/// LRU cache in front of any [`Embedder`].
///
/// Entries are immutable once inserted; the mutex only guards the cache
/// bookkeeping, not the underlying embed call for misses.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is nonzero"),
            )),
        }
    }

    /// Cosine similarity of two texts via cached embeddings.
    pub async fn text_similarity(&self, a: &str, b: &str) -> anyhow::Result<f64> {
        let va = self.embed(a).await?;
        let vb = self.embed(b).await?;
        Ok(cosine_similarity(&va, &vb))
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        {
            let mut cache = self.cache.lock().await;
            if let Some(hit) = cache.get(text) {
                debug!(len = text.len(), "embedding cache hit");
                return Ok(hit.clone());
            }
        }
        let vector = self.inner.embed(text).await?;
        let mut cache = self.cache.lock().await;
        cache.put(text.to_string(), vector.clone());
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockEmbedder;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5f32, 0.5, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_degenerate_input() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn jaccard_over_word_sets() {
        assert!((jaccard_similarity("plan the work", "plan the release") - 0.5).abs() < 1e-9);
        assert_eq!(jaccard_similarity("", ""), 0.0);
        assert!((jaccard_similarity("Same words", "same WORDS") - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cache_serves_repeat_lookups() {
        let inner = Arc::new(MockEmbedder::new());
        let cached = CachedEmbedder::new(inner.clone());
        let a = cached.embed("hello world").await.unwrap();
        let b = cached.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(inner.call_count(), 1);
    }

    #[tokio::test]
    async fn text_similarity_uses_cache() {
        let inner = Arc::new(MockEmbedder::new());
        let cached = CachedEmbedder::new(inner.clone());
        let sim = cached.text_similarity("alpha", "alpha").await.unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
        assert_eq!(inner.call_count(), 1);
    }
}
