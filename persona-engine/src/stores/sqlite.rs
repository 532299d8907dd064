//! SQLite-backed chunk collections with vector search via `sqlite-vec`.
//!
//! One `chunks` table keyed by `(persona_id, id)` holds every persona's
//! collection; embeddings are stored as JSON arrays and compared with
//! `vec_distance_cosine`. Rebuilding a collection is a delete of the
//! persona's rows followed by reinsertion, never a partial patch.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use tokio_rusqlite::{Connection, OptionalExtension, ffi};

use crate::chunking::Chunk;
use crate::stores::{ChunkStore, EmbeddedChunk};
use crate::types::EngineError;

// Columns are TEXT across the board; numeric fields are parsed on read.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    persona_id  TEXT NOT NULL,
    id          TEXT NOT NULL,
    title       TEXT NOT NULL,
    year        TEXT NOT NULL,
    chunk_index TEXT NOT NULL,
    char_start  TEXT NOT NULL,
    char_end    TEXT NOT NULL,
    content     TEXT NOT NULL,
    embedding   TEXT NOT NULL,
    PRIMARY KEY (persona_id, id)
);
CREATE INDEX IF NOT EXISTS chunks_by_persona ON chunks (persona_id);
";

#[derive(Clone)]
pub struct SqliteChunkStore {
    conn: Connection,
}

fn storage_err(err: impl std::fmt::Display) -> EngineError {
    EngineError::Storage(err.to_string())
}

impl SqliteChunkStore {
    /// Opens (or creates) the index database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path).await.map_err(storage_err)?;
        Self::initialize(conn).await
    }

    /// In-memory database, useful for tests and throwaway runs.
    pub async fn open_in_memory() -> Result<Self, EngineError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open_in_memory().await.map_err(storage_err)?;
        Self::initialize(conn).await
    }

    async fn initialize(conn: Connection) -> Result<Self, EngineError> {
        conn.call(|conn| {
            // Fails fast when the vec extension did not load.
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            conn.execute_batch(SCHEMA)
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await
        .map_err(storage_err)?;
        Ok(Self { conn })
    }

    fn register_sqlite_vec() -> Result<(), EngineError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(EngineError::Storage)
    }
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    async fn insert(&self, chunks: Vec<EmbeddedChunk>) -> Result<usize, EngineError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let mut rows = Vec::with_capacity(chunks.len());
        for embedded in chunks {
            let embedding = serde_json::to_string(&embedded.vector)
                .map_err(|err| EngineError::Storage(err.to_string()))?;
            rows.push([
                embedded.persona_id,
                embedded.chunk.id,
                embedded.chunk.source_title,
                embedded
                    .chunk
                    .source_year
                    .map(|y| y.to_string())
                    .unwrap_or_default(),
                embedded.chunk.sequence_index.to_string(),
                embedded.chunk.char_span.0.to_string(),
                embedded.chunk.char_span.1.to_string(),
                embedded.chunk.text,
                embedding,
            ]);
        }

        self.conn
            .call(move |conn| {
                let tx = conn
                    .transaction()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut inserted = 0usize;
                {
                    let mut stmt = tx
                        .prepare(
                            "INSERT OR IGNORE INTO chunks \
                             (persona_id, id, title, year, chunk_index, char_start, char_end, content, embedding) \
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                        )
                        .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    for row in rows {
                        inserted += stmt
                            .execute(row)
                            .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    }
                }
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(inserted)
            })
            .await
            .map_err(storage_err)
    }

    async fn contains(&self, persona_id: &str, chunk_id: &str) -> Result<bool, EngineError> {
        let persona_id = persona_id.to_string();
        let chunk_id = chunk_id.to_string();
        self.conn
            .call(move |conn| {
                let found: i64 = conn
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM chunks WHERE persona_id = ?1 AND id = ?2)",
                        [&persona_id, &chunk_id],
                        |row| row.get(0),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(found != 0)
            })
            .await
            .map_err(storage_err)
    }

    async fn delete_persona(&self, persona_id: &str) -> Result<usize, EngineError> {
        let persona_id = persona_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM chunks WHERE persona_id = ?1", [&persona_id])
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(storage_err)
    }

    async fn search(
        &self,
        persona_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(Chunk, f32)>, EngineError> {
        let persona_id = persona_id.to_string();
        let query_json =
            serde_json::to_string(query).map_err(|err| EngineError::Storage(err.to_string()))?;

        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT id, title, year, chunk_index, char_start, char_end, content, \
                         vec_distance_cosine(vec_f32(embedding), vec_f32(?2)) AS distance \
                         FROM chunks WHERE persona_id = ?1 \
                         ORDER BY distance ASC, CAST(chunk_index AS INTEGER) ASC \
                         LIMIT {k}"
                    ))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let rows = stmt
                    .query_map([&persona_id, &query_json], |row| {
                        let year: String = row.get(2)?;
                        let chunk = Chunk {
                            id: row.get(0)?,
                            source_title: row.get(1)?,
                            source_year: year.trim().parse().ok(),
                            sequence_index: row.get::<_, String>(3)?.parse().unwrap_or(0),
                            char_span: (
                                row.get::<_, String>(4)?.parse().unwrap_or(0),
                                row.get::<_, String>(5)?.parse().unwrap_or(0),
                            ),
                            text: row.get(6)?,
                        };
                        let distance: f32 = row.get(7)?;
                        // Cosine distance to similarity.
                        Ok((chunk, 1.0 - distance))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let mut results = Vec::new();
                for row in rows {
                    results.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(results)
            })
            .await
            .map_err(storage_err)
    }

    async fn count(&self, persona_id: &str) -> Result<usize, EngineError> {
        let persona_id = persona_id.to_string();
        self.conn
            .call(move |conn| {
                let count: i64 = conn
                    .query_row(
                        "SELECT COUNT(*) FROM chunks WHERE persona_id = ?1",
                        [&persona_id],
                        |row| row.get(0),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(count as usize)
            })
            .await
            .map_err(storage_err)
    }

    async fn count_all(&self) -> Result<usize, EngineError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(count as usize)
            })
            .await
            .map_err(storage_err)
    }

    async fn dimension(&self, persona_id: &str) -> Result<Option<usize>, EngineError> {
        let persona_id = persona_id.to_string();
        let embedding: Option<String> = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT embedding FROM chunks WHERE persona_id = ?1 LIMIT 1",
                    [&persona_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(storage_err)?;

        match embedding {
            Some(raw) => {
                let vector: Vec<f32> = serde_json::from_str(&raw)
                    .map_err(|err| EngineError::Storage(err.to_string()))?;
                Ok(Some(vector.len()))
            }
            None => Ok(None),
        }
    }
}
