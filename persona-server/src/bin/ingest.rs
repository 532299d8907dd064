//! Corpus ingestion: chunks a persona's cleaned corpus, embeds it, and
//! rebuilds the persona's collection in the SQLite index.
//!
//! Usage: `ingest [persona-id]` (falls back to `PERSONA_ID`, then
//! `jane-jacobs`). Expects cleaned text under
//! `<PERSONAS_DIR>/<id>/corpus/cleaned/`.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use persona_engine::corpus::load_cleaned_corpus;
use persona_engine::embeddings::OpenAiEmbeddingProvider;
use persona_engine::indexer::Indexer;
use persona_engine::persona::PersonaRegistry;
use persona_engine::stores::{ChunkStore, SqliteChunkStore};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let persona_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| env_or("PERSONA_ID", "jane-jacobs"));
    let personas_dir = PathBuf::from(env_or("PERSONAS_DIR", "personas"));
    let index_db = env_or("INDEX_DB", "persona_index.db");
    let openai_key =
        std::env::var("OPENAI_API_KEY").map_err(|_| "OPENAI_API_KEY must be set")?;

    let registry = PersonaRegistry::load(&personas_dir).await?;
    let persona = registry.get(&persona_id)?;

    let corpus_dir = personas_dir.join(&persona_id).join("corpus").join("cleaned");
    let documents = load_cleaned_corpus(&corpus_dir).await?;
    info!(
        persona_id,
        documents = documents.len(),
        dir = %corpus_dir.display(),
        "corpus loaded"
    );

    let store = Arc::new(SqliteChunkStore::open(&index_db).await?);
    let indexer = Indexer::new(
        Arc::clone(&store) as Arc<dyn ChunkStore>,
        Arc::new(OpenAiEmbeddingProvider::new(openai_key)),
    );

    let report = indexer
        .rebuild(&persona_id, &documents, &persona.chunking_config())
        .await?;
    let total = store.count(&persona_id).await?;
    info!(
        persona_id,
        inserted = report.inserted,
        skipped = report.skipped_existing,
        failed = report.failed,
        total,
        "ingestion complete"
    );
    Ok(())
}
