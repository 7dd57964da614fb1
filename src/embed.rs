//! Embedding provider contract.
//!
//! The store keeps embeddings opaque; a provider is optional and its
//! absence simply disables vector-aware retrieval.

use async_trait::async_trait;

use crate::error::Result;

/// Produces fixed-dimension embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text. The returned vector length must equal
    /// [`dimension`](Self::dimension) on every call.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The provider's fixed output dimension.
    fn dimension(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HashEmbedder;

    #[async_trait]
    impl EmbeddingProvider for HashEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0.0f32; self.dimension()];
            for (i, b) in text.bytes().enumerate() {
                v[i % 4] += b as f32;
            }
            Ok(v)
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    #[tokio::test]
    async fn test_embedding_dimension_is_fixed() {
        let embedder = HashEmbedder;
        for text in ["", "short", "a much longer text to embed"] {
            let v = embedder.embed(text).await.unwrap();
            assert_eq!(v.len(), embedder.dimension());
        }
    }
}
