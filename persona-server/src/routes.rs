//! HTTP surface over the conversation engine.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use persona_engine::{ConversationEngine, EngineError, SourceRef};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConversationEngine>,
    /// Persona used when a chat request names none.
    pub default_persona: String,
}

pub fn router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .route("/personas", get(list_personas))
        .route("/persona/{id}/config", get(persona_config))
        .route("/conversation/{id}", delete(delete_conversation))
        .with_state(state)
}

/// Engine errors mapped to HTTP statuses with a JSON error body.
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::UnknownPersona(_) => StatusCode::NOT_FOUND,
            EngineError::InvalidArgument(_) | EngineError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub persona_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub response: String,
    pub sources: Vec<SourceRef>,
}

async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let persona_id = request
        .persona_id
        .as_deref()
        .unwrap_or(&state.default_persona);
    let outcome = state
        .engine
        .handle_message(
            persona_id,
            request.conversation_id.as_deref(),
            &request.message,
        )
        .await?;
    Ok(Json(ChatResponse {
        conversation_id: outcome.conversation_id,
        response: outcome.response_text,
        sources: outcome.cited_sources,
    }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.engine.stats().await;
    Json(json!({
        "status": if stats.index_connected { "ok" } else { "degraded" },
        "index": {
            "connected": stats.index_connected,
            "chunk_count": stats.chunk_count,
        },
        "active_conversations": stats.active_conversations,
    }))
}

async fn list_personas(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "personas": state.engine.personas().ids() }))
}

/// Client-facing persona projection: identity and widget sections only,
/// never the prompt template or retrieval tuning.
async fn persona_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let config = state.engine.personas().get(&id)?;
    Ok(Json(json!({
        "id": &config.id,
        "metadata": &config.metadata,
        "widget": &config.widget,
    })))
}

async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> StatusCode {
    if state.engine.conversations().remove(&id) {
        info!(conversation_id = %id, "conversation deleted");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persona_engine::embeddings::MockEmbeddingProvider;
    use persona_engine::generation::MockGenerationProvider;
    use persona_engine::persona::PersonaRegistry;
    use persona_engine::stores::MemoryChunkStore;

    fn test_state() -> AppState {
        let engine = ConversationEngine::builder()
            .with_personas(PersonaRegistry::new())
            .with_store(Arc::new(MemoryChunkStore::new()))
            .with_embedder(Arc::new(MockEmbeddingProvider::new()))
            .with_generator(Arc::new(MockGenerationProvider::new()))
            .build();
        AppState {
            engine: Arc::new(engine),
            default_persona: "jane-jacobs".to_string(),
        }
    }

    #[tokio::test]
    async fn health_nests_index_fields() {
        let Json(body) = health(State(test_state())).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["index"]["connected"], true);
        assert_eq!(body["index"]["chunk_count"], 0);
        assert_eq!(body["active_conversations"], 0);
    }

    #[tokio::test]
    async fn deleting_an_unknown_conversation_is_not_found() {
        let status = delete_conversation(State(test_state()), Path("nope".to_string())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_persona_config_maps_to_not_found() {
        let result = persona_config(State(test_state()), Path("missing".to_string())).await;
        let response = result.unwrap_err().into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
