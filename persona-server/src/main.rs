//! Persona conversation server.
//!
//! Loads persona configs, opens the chunk index, and serves the chat API.
//! Configuration comes from the environment (a `.env` file is honored):
//!
//! - `PERSONAS_DIR` (default `personas`)
//! - `PERSONA_ID` default persona for requests that name none (default `jane-jacobs`)
//! - `INDEX_DB` SQLite index path (default `persona_index.db`)
//! - `HOST` / `PORT` (default `0.0.0.0:8000`)
//! - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY` (required)
//! - `CONVERSATION_IDLE_SECS` enables idle-conversation eviction when set

mod routes;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use persona_engine::ConversationEngine;
use persona_engine::embeddings::OpenAiEmbeddingProvider;
use persona_engine::generation::AnthropicGenerationProvider;
use persona_engine::persona::PersonaRegistry;
use persona_engine::stores::SqliteChunkStore;

use routes::AppState;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn require_env(key: &str) -> Result<String, Box<dyn std::error::Error>> {
    std::env::var(key).map_err(|_| format!("{key} must be set").into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let personas_dir = env_or("PERSONAS_DIR", "personas");
    let default_persona = env_or("PERSONA_ID", "jane-jacobs");
    let index_db = env_or("INDEX_DB", "persona_index.db");
    let openai_key = require_env("OPENAI_API_KEY")?;
    let anthropic_key = require_env("ANTHROPIC_API_KEY")?;

    let personas = PersonaRegistry::load(&personas_dir).await?;
    info!(dir = %personas_dir, personas = ?personas.ids(), "personas loaded");
    personas.get(&default_persona)?;

    let store = Arc::new(SqliteChunkStore::open(&index_db).await?);
    let engine = Arc::new(
        ConversationEngine::builder()
            .with_personas(personas)
            .with_store(store)
            .with_embedder(Arc::new(OpenAiEmbeddingProvider::new(openai_key)))
            .with_generator(Arc::new(AnthropicGenerationProvider::new(anthropic_key)))
            .build(),
    );

    let stats = engine.stats().await;
    info!(
        chunk_count = stats.chunk_count,
        index_connected = stats.index_connected,
        "index opened"
    );
    if stats.chunk_count == 0 {
        warn!("chunk index is empty; run the ingest binary before expecting grounded answers");
    }

    if let Ok(idle_secs) = std::env::var("CONVERSATION_IDLE_SECS") {
        let max_idle = Duration::from_secs(idle_secs.parse()?);
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(max_idle.max(Duration::from_secs(60)));
            loop {
                ticker.tick().await;
                let evicted = engine.evict_idle_conversations(max_idle);
                if evicted > 0 {
                    info!(evicted, "idle conversations evicted");
                }
            }
        });
    }

    let addr = format!("{}:{}", env_or("HOST", "0.0.0.0"), env_or("PORT", "8000"));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    let app = routes::router(AppState {
        engine,
        default_persona,
    });
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}
