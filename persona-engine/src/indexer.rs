//! Embedding indexer: turns chunks into stored vectors.
//!
//! Ingestion is idempotent. A chunk is skipped when its content hash is
//! already present, either in the store or earlier in the same batch, so
//! re-running ingestion never duplicates rows. Per-chunk embedding failures
//! are recorded and skipped; the batch keeps going.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::chunking::{Chunk, ChunkingConfig, SourceDocument, chunk};
use crate::embeddings::EmbeddingProvider;
use crate::retry::RetryPolicy;
use crate::stores::{ChunkStore, EmbeddedChunk};
use crate::types::EngineError;

/// Outcome counters for one indexing run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub inserted: usize,
    pub skipped_existing: usize,
    pub failed: usize,
}

impl IndexReport {
    pub fn merge(&mut self, other: IndexReport) {
        self.inserted += other.inserted;
        self.skipped_existing += other.skipped_existing;
        self.failed += other.failed;
    }
}

pub struct Indexer {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
}

impl Indexer {
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

    /// Embeds and stores `chunks` for the persona. Already-indexed chunks
    /// are skipped; embedding failures are counted but do not abort the run.
    /// A dimension mismatch aborts, since it means the whole collection is
    /// inconsistent with the configured model.
    pub async fn index_chunks(
        &self,
        persona_id: &str,
        chunks: Vec<Chunk>,
    ) -> Result<IndexReport, EngineError> {
        let mut report = IndexReport::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut batch: Vec<EmbeddedChunk> = Vec::new();

        for chunk in chunks {
            if !seen.insert(chunk.id.clone()) || self.store.contains(persona_id, &chunk.id).await? {
                report.skipped_existing += 1;
                continue;
            }

            let embedder = Arc::clone(&self.embedder);
            let text = chunk.text.clone();
            let embedded = self
                .retry
                .run("chunk embedding", move || {
                    let embedder = Arc::clone(&embedder);
                    let text = text.clone();
                    async move { embedder.embed(&text).await }
                })
                .await;

            match embedded {
                Ok(vector) => {
                    if vector.len() != self.embedder.dimension() {
                        return Err(EngineError::DimensionMismatch {
                            expected: self.embedder.dimension(),
                            actual: vector.len(),
                        });
                    }
                    batch.push(EmbeddedChunk {
                        persona_id: persona_id.to_string(),
                        chunk,
                        vector,
                    });
                }
                Err(err @ EngineError::DimensionMismatch { .. }) => return Err(err),
                Err(err) => {
                    warn!(chunk_id = %chunk.id, error = %err, "embedding failed, skipping chunk");
                    report.failed += 1;
                }
            }
        }

        report.inserted = self.store.insert(batch).await?;
        info!(
            persona_id,
            model = self.embedder.model_id(),
            inserted = report.inserted,
            skipped = report.skipped_existing,
            failed = report.failed,
            "indexing run finished"
        );
        Ok(report)
    }

    /// Drops the persona's collection and reindexes `documents` from
    /// scratch. The path for corpus or chunking-parameter changes.
    pub async fn rebuild(
        &self,
        persona_id: &str,
        documents: &[SourceDocument],
        config: &ChunkingConfig,
    ) -> Result<IndexReport, EngineError> {
        let removed = self.store.delete_persona(persona_id).await?;
        info!(persona_id, removed, "dropped collection for rebuild");

        let mut report = IndexReport::default();
        for document in documents {
            let chunks = chunk(document, config)?;
            report.merge(self.index_chunks(persona_id, chunks).await?);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockEmbeddingProvider;
    use crate::stores::MemoryChunkStore;

    fn document(text: &str) -> SourceDocument {
        SourceDocument {
            text: text.to_string(),
            title: "Death and Life".to_string(),
            year: Some(1961),
        }
    }

    fn small_config() -> ChunkingConfig {
        ChunkingConfig {
            target_size: 60,
            overlap: 10,
        }
    }

    #[tokio::test]
    async fn reingestion_is_idempotent() {
        let store = Arc::new(MemoryChunkStore::new());
        let indexer = Indexer::new(Arc::clone(&store) as _, Arc::new(MockEmbeddingProvider::new()));

        let doc = document("Sidewalks need eyes on the street. Mixed uses keep them busy.");
        let chunks = chunk(&doc, &small_config()).unwrap();
        assert!(!chunks.is_empty());

        let first = indexer.index_chunks("p", chunks.clone()).await.unwrap();
        assert_eq!(first.inserted, chunks.len());
        assert_eq!(first.skipped_existing, 0);

        let second = indexer.index_chunks("p", chunks.clone()).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped_existing, chunks.len());
        assert_eq!(store.count("p").await.unwrap(), chunks.len());
    }

    #[tokio::test]
    async fn duplicate_text_within_a_batch_is_deduplicated() {
        let store = Arc::new(MemoryChunkStore::new());
        let indexer = Indexer::new(Arc::clone(&store) as _, Arc::new(MockEmbeddingProvider::new()));

        let doc = document("The same sentence.");
        let mut chunks = chunk(&doc, &small_config()).unwrap();
        let duplicate = chunks[0].clone();
        chunks.push(duplicate);

        let report = indexer.index_chunks("p", chunks).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped_existing, 1);
    }

    #[tokio::test]
    async fn rebuild_replaces_the_collection() {
        let store = Arc::new(MemoryChunkStore::new());
        let indexer = Indexer::new(Arc::clone(&store) as _, Arc::new(MockEmbeddingProvider::new()));

        let old = [document("Old corpus text that will be replaced entirely.")];
        indexer.rebuild("p", &old, &small_config()).await.unwrap();
        let old_count = store.count("p").await.unwrap();
        assert!(old_count > 0);

        let new = [
            document("A new corpus, first document."),
            document("A new corpus, second document."),
        ];
        let report = indexer.rebuild("p", &new, &small_config()).await.unwrap();
        assert!(report.inserted >= 2);
        // Nothing from the old corpus survives.
        let hits = store
            .search("p", &MockEmbeddingProvider::new().embed("query").await.unwrap(), 100)
            .await
            .unwrap();
        assert!(hits.iter().all(|(c, _)| !c.text.contains("Old corpus")));
    }
}
