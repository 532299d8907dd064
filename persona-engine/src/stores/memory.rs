//! In-memory chunk store for tests and embedded use.

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::chunking::Chunk;
use crate::stores::{ChunkStore, EmbeddedChunk};
use crate::types::EngineError;

/// Brute-force store holding every collection in memory. Implements the
/// same ordering contract as the SQLite backend.
#[derive(Default)]
pub struct MemoryChunkStore {
    collections: RwLock<FxHashMap<String, Vec<EmbeddedChunk>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Cosine similarity; zero vectors score 0 rather than NaN.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn insert(&self, chunks: Vec<EmbeddedChunk>) -> Result<usize, EngineError> {
        let mut collections = self.collections.write();
        let mut inserted = 0;
        for chunk in chunks {
            let collection = collections.entry(chunk.persona_id.clone()).or_default();
            if collection.iter().any(|c| c.chunk.id == chunk.chunk.id) {
                continue;
            }
            collection.push(chunk);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn contains(&self, persona_id: &str, chunk_id: &str) -> Result<bool, EngineError> {
        let collections = self.collections.read();
        Ok(collections
            .get(persona_id)
            .is_some_and(|c| c.iter().any(|e| e.chunk.id == chunk_id)))
    }

    async fn delete_persona(&self, persona_id: &str) -> Result<usize, EngineError> {
        let mut collections = self.collections.write();
        Ok(collections.remove(persona_id).map_or(0, |c| c.len()))
    }

    async fn search(
        &self,
        persona_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(Chunk, f32)>, EngineError> {
        let collections = self.collections.read();
        let Some(collection) = collections.get(persona_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(Chunk, f32)> = Vec::with_capacity(collection.len());
        for embedded in collection {
            if embedded.vector.len() != query.len() {
                return Err(EngineError::DimensionMismatch {
                    expected: embedded.vector.len(),
                    actual: query.len(),
                });
            }
            let score = cosine_similarity(&embedded.vector, query);
            scored.push((embedded.chunk.clone(), score));
        }

        // Highest score first; equal scores fall back to source order.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.sequence_index.cmp(&b.0.sequence_index))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self, persona_id: &str) -> Result<usize, EngineError> {
        let collections = self.collections.read();
        Ok(collections.get(persona_id).map_or(0, |c| c.len()))
    }

    async fn count_all(&self) -> Result<usize, EngineError> {
        let collections = self.collections.read();
        Ok(collections.values().map(|c| c.len()).sum())
    }

    async fn dimension(&self, persona_id: &str) -> Result<Option<usize>, EngineError> {
        let collections = self.collections.read();
        Ok(collections
            .get(persona_id)
            .and_then(|c| c.first())
            .map(|e| e.vector.len()))
    }
}
