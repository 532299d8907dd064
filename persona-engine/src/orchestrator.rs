//! The conversation engine: one message in, one grounded response out.
//!
//! `handle_message` runs the full pipeline for a turn: resolve the persona,
//! lock the conversation, retrieve context, assemble the prompt, generate,
//! and append both turns. The conversation lock is held for the whole
//! sequence so concurrent messages to the same conversation serialize.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};

use crate::conversation::{ConversationStore, Turn};
use crate::generation::GenerationProvider;
use crate::persona::{self, PersonaRegistry};
use crate::prompt;
use crate::retriever::Retriever;
use crate::retry::RetryPolicy;
use crate::stores::ChunkStore;
use crate::types::{EngineError, SourceRef};

/// Returned verbatim when generation fails after retries. The user's turn is
/// still recorded; this reply is not.
pub const FALLBACK_RESPONSE: &str =
    "I'm sorry, I wasn't able to put together a response just now. Please try asking again.";

/// The result of one message turn.
#[derive(Clone, Debug, Serialize)]
pub struct ChatOutcome {
    pub conversation_id: String,
    pub response_text: String,
    pub cited_sources: Vec<SourceRef>,
    /// False when the response was produced without retrieved excerpts.
    pub grounded: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct EngineStats {
    pub chunk_count: usize,
    pub index_connected: bool,
    pub active_conversations: usize,
}

pub struct ConversationEngine {
    personas: PersonaRegistry,
    store: Arc<dyn ChunkStore>,
    retriever: Retriever,
    generator: Arc<dyn GenerationProvider>,
    conversations: ConversationStore,
    retry: RetryPolicy,
}

impl ConversationEngine {
    pub fn builder() -> ConversationEngineBuilder {
        ConversationEngineBuilder::default()
    }

    /// Runs one message turn. On generation failure the turn degrades: the
    /// user's message is persisted, a fixed apology comes back, and no
    /// assistant turn is recorded.
    pub async fn handle_message(
        &self,
        persona_id: &str,
        conversation_id: Option<&str>,
        message: &str,
    ) -> Result<ChatOutcome, EngineError> {
        if message.trim().is_empty() {
            return Err(EngineError::InvalidArgument(
                "message must not be empty".to_string(),
            ));
        }
        let config = self.personas.get(persona_id)?;

        let (conversation_id, handle, created) =
            self.conversations.get_or_create(persona_id, conversation_id);
        if created {
            info!(persona_id, %conversation_id, "started conversation");
        }
        let mut conversation = handle.lock().await;

        let retrieved = self
            .retriever
            .retrieve(persona_id, message, config.retrieval.top_k)
            .await?;

        let system_prompt = persona::system_prompt(config);
        let request = prompt::assemble(
            config,
            &system_prompt,
            &retrieved,
            conversation.recent_turns(config.retrieval.history_turns),
            message,
        );
        let grounded = request.is_grounded();

        // Citations follow excerpt order, one entry per distinct source.
        let mut cited_sources: Vec<SourceRef> = Vec::new();
        for scored in &retrieved {
            let source = SourceRef {
                title: scored.chunk.source_title.clone(),
                year: scored.chunk.source_year,
            };
            if !cited_sources.contains(&source) {
                cited_sources.push(source);
            }
        }

        let generator = Arc::clone(&self.generator);
        let request = Arc::new(request);
        let generated = self
            .retry
            .run("generation", move || {
                let generator = Arc::clone(&generator);
                let request = Arc::clone(&request);
                async move { generator.generate(&request).await }
            })
            .await;

        match generated {
            Ok(response_text) => {
                conversation.append(Turn::user(message));
                conversation.append(Turn::assistant(&response_text, cited_sources.clone()));
                Ok(ChatOutcome {
                    conversation_id,
                    response_text,
                    cited_sources,
                    grounded,
                })
            }
            Err(err) => {
                error!(persona_id, %conversation_id, error = %err, "generation failed, degrading");
                conversation.append(Turn::user(message));
                Ok(ChatOutcome {
                    conversation_id,
                    response_text: FALLBACK_RESPONSE.to_string(),
                    cited_sources: Vec::new(),
                    grounded: false,
                })
            }
        }
    }

    /// Health snapshot. A failing index read reports disconnected rather
    /// than erroring; health checks should not take the server down.
    pub async fn stats(&self) -> EngineStats {
        let (chunk_count, index_connected) = match self.store.count_all().await {
            Ok(count) => (count, true),
            Err(_) => (0, false),
        };
        EngineStats {
            chunk_count,
            index_connected,
            active_conversations: self.conversations.active_count(),
        }
    }

    pub fn personas(&self) -> &PersonaRegistry {
        &self.personas
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Drops conversations idle longer than `max_idle`.
    pub fn evict_idle_conversations(&self, max_idle: Duration) -> usize {
        self.conversations.evict_idle(max_idle)
    }
}

#[derive(Default)]
pub struct ConversationEngineBuilder {
    personas: Option<PersonaRegistry>,
    store: Option<Arc<dyn ChunkStore>>,
    embedder: Option<Arc<dyn crate::embeddings::EmbeddingProvider>>,
    generator: Option<Arc<dyn GenerationProvider>>,
    retry: Option<RetryPolicy>,
}

impl ConversationEngineBuilder {
    #[must_use]
    pub fn with_personas(mut self, personas: PersonaRegistry) -> Self {
        self.personas = Some(personas);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ChunkStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn crate::embeddings::EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn GenerationProvider>) -> Self {
        self.generator = Some(generator);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Builds the engine.
    ///
    /// # Panics
    /// Panics when personas, store, embedder, or generator were not set.
    pub fn build(self) -> ConversationEngine {
        let store = self.store.expect("chunk store must be set");
        let embedder = self.embedder.expect("embedding provider must be set");
        let retry = self.retry.unwrap_or_default();
        ConversationEngine {
            personas: self.personas.expect("persona registry must be set"),
            retriever: Retriever::new(Arc::clone(&store), embedder).with_retry(retry.clone()),
            store,
            generator: self.generator.expect("generation provider must be set"),
            conversations: ConversationStore::new(),
            retry,
        }
    }
}
