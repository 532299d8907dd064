//! Storage backends for per-persona chunk collections.
//!
//! The [`ChunkStore`] trait abstracts over storage implementations so the
//! indexer and retriever never depend on a specific database:
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │  ChunkStore      │
//!                 │  (async CRUD +   │
//!                 │   vector search) │
//!                 └────────┬─────────┘
//!                          │
//!              ┌───────────┴───────────┐
//!              ▼                       ▼
//!      ┌───────────────┐      ┌────────────────┐
//!      │    SQLite     │      │   In-memory    │
//!      │  sqlite-vec   │      │  (tests/demos) │
//!      └───────────────┘      └────────────────┘
//! ```
//!
//! Collections are keyed by `(persona_id, content_hash)`. Records are only
//! ever inserted or deleted wholesale; an existing record is never patched.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryChunkStore;
pub use sqlite::SqliteChunkStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunking::Chunk;
use crate::types::EngineError;

/// A chunk paired with its embedding, owned by one persona's collection.
/// Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub persona_id: String,
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert embedded chunks. Rows whose `(persona_id, chunk.id)` already
    /// exist are ignored, so re-ingestion is idempotent at the storage
    /// layer too. Returns the number of newly inserted rows.
    async fn insert(&self, chunks: Vec<EmbeddedChunk>) -> Result<usize, EngineError>;

    /// Whether a chunk with this content hash exists for the persona.
    async fn contains(&self, persona_id: &str, chunk_id: &str) -> Result<bool, EngineError>;

    /// Delete a persona's whole collection (the full-rebuild path).
    /// Returns the number of rows removed.
    async fn delete_persona(&self, persona_id: &str) -> Result<usize, EngineError>;

    /// The `k` chunks most similar to `query` by cosine similarity, highest
    /// score first, ties broken by lower `sequence_index`.
    async fn search(
        &self,
        persona_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(Chunk, f32)>, EngineError>;

    /// Number of chunks indexed for the persona.
    async fn count(&self, persona_id: &str) -> Result<usize, EngineError>;

    /// Number of chunks across all personas.
    async fn count_all(&self) -> Result<usize, EngineError>;

    /// Dimension of the persona's stored vectors, `None` when the
    /// collection is empty.
    async fn dimension(&self, persona_id: &str) -> Result<Option<usize>, EngineError>;
}
