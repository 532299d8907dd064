//! Query-time retrieval over a persona's chunk collection.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::chunking::Chunk;
use crate::embeddings::EmbeddingProvider;
use crate::retry::RetryPolicy;
use crate::stores::ChunkStore;
use crate::types::EngineError;

/// A retrieved chunk with its cosine similarity to the query.
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

pub struct Retriever {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
}

impl Retriever {
    pub fn new(store: Arc<dyn ChunkStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Embeds `query` and returns the persona's `k` most similar chunks,
    /// highest score first. An empty collection yields an empty result, not
    /// an error; the caller decides how to answer ungrounded.
    pub async fn retrieve(
        &self,
        persona_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, EngineError> {
        if k == 0 {
            return Err(EngineError::InvalidArgument(
                "retrieval k must be at least 1".to_string(),
            ));
        }
        if self.store.count(persona_id).await? == 0 {
            debug!(persona_id, "retrieval against empty collection");
            return Ok(Vec::new());
        }

        let embedder = Arc::clone(&self.embedder);
        let query_owned = query.to_string();
        let vector = self
            .retry
            .run("query embedding", move || {
                let embedder = Arc::clone(&embedder);
                let query = query_owned.clone();
                async move { embedder.embed(&query).await }
            })
            .await?;

        if vector.len() != self.embedder.dimension() {
            return Err(EngineError::DimensionMismatch {
                expected: self.embedder.dimension(),
                actual: vector.len(),
            });
        }
        // Index and query must come from the same embedding space.
        if let Some(stored) = self.store.dimension(persona_id).await?
            && stored != vector.len()
        {
            warn!(
                persona_id,
                model = self.embedder.model_id(),
                stored,
                produced = vector.len(),
                "query embedding does not match the indexed collection"
            );
            return Err(EngineError::DimensionMismatch {
                expected: stored,
                actual: vector.len(),
            });
        }

        let hits = self.store.search(persona_id, &vector, k).await?;
        Ok(hits
            .into_iter()
            .map(|(chunk, score)| ScoredChunk { chunk, score })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::content_hash;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::stores::{EmbeddedChunk, MemoryChunkStore};

    fn embedded(persona: &str, text: &str, sequence_index: usize, vector: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            persona_id: persona.to_string(),
            chunk: Chunk {
                id: content_hash(text),
                text: text.to_string(),
                source_title: "Title".to_string(),
                source_year: Some(1961),
                sequence_index,
                char_span: (0, text.chars().count()),
            },
            vector,
        }
    }

    #[tokio::test]
    async fn zero_k_is_rejected() {
        let retriever = Retriever::new(
            Arc::new(MemoryChunkStore::new()),
            Arc::new(MockEmbeddingProvider::new()),
        );
        let err = retriever.retrieve("p", "anything", 0).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn empty_collection_returns_empty() {
        let retriever = Retriever::new(
            Arc::new(MemoryChunkStore::new()),
            Arc::new(MockEmbeddingProvider::new()),
        );
        let hits = retriever.retrieve("p", "anything", 3).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn mismatched_index_dimension_is_fatal() {
        let store = Arc::new(MemoryChunkStore::new());
        // Indexed at dimension 3; the mock embedder below produces 8.
        store
            .insert(vec![embedded("p", "some text", 0, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let retriever = Retriever::new(store, Arc::new(MockEmbeddingProvider::new()));
        let err = retriever.retrieve("p", "query", 1).await.unwrap_err();
        assert!(matches!(err, EngineError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn retrieval_is_deterministic() {
        let store = Arc::new(MemoryChunkStore::new());
        let embedder = Arc::new(MockEmbeddingProvider::new());
        for (i, text) in ["first chunk", "second chunk", "third chunk"].iter().enumerate() {
            let vector = embedder.embed(text).await.unwrap();
            store.insert(vec![embedded("p", text, i, vector)]).await.unwrap();
        }

        let retriever = Retriever::new(store, embedder);
        let first = retriever.retrieve("p", "a query", 2).await.unwrap();
        let second = retriever.retrieve("p", "a query", 2).await.unwrap();
        assert_eq!(first.len(), 2);
        let ids: Vec<_> = first.iter().map(|s| s.chunk.id.clone()).collect();
        let ids_again: Vec<_> = second.iter().map(|s| s.chunk.id.clone()).collect();
        assert_eq!(ids, ids_again);
        assert!(first[0].score >= first[1].score);
    }
}
