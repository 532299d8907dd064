//! Embedding capability boundary.
//!
//! The engine never talks to an embedding service directly; it goes through
//! [`EmbeddingProvider`] so the backing model is swappable without touching
//! engine logic. The same provider must serve both index time and query
//! time, which the retriever enforces with a dimension check.

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::types::EngineError;

/// Default OpenAI embedding model and its output dimension.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Fixed output dimension of this model.
    fn dimension(&self) -> usize;

    /// Identifier of the underlying model, for logs and config checks.
    fn model_id(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError>;
}

/// Deterministic hash-derived embeddings for tests and offline runs.
///
/// Identical text always maps to the identical unit vector; different text
/// almost certainly does not. No semantic meaning is implied.
#[derive(Clone, Debug)]
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self { dimension: 8 }
    }

    #[must_use]
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        "mock-embedding"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let digest = Sha256::digest(text.as_bytes());
        let mut vector: Vec<f32> = (0..self.dimension)
            .map(|i| {
                let byte = digest[(i * 7 + i / 32) % digest.len()];
                let rotated = byte.wrapping_add((i / digest.len()) as u8);
                (f32::from(rotated) / 255.0) * 2.0 - 1.0
            })
            .collect();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        } else if let Some(first) = vector.first_mut() {
            *first = 1.0;
        }
        Ok(vector)
    }
}

/// OpenAI embeddings API client (`POST {base_url}/v1/embeddings`).
#[derive(Clone)]
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com".to_string(),
            api_key: api_key.into(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }

    /// Point the provider at a different host (proxies, tests).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Use a different model. The dimension must match the model's output;
    /// responses of any other length are rejected.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, dimension: usize) -> Self {
        self.model = model.into();
        self.dimension = dimension;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let body = serde_json::json!({
            "model": &self.model,
            "input": text,
        });
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| EngineError::Embedding(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EngineError::Embedding(format!(
                "embedding service returned {status}: {detail}"
            )));
        }

        let parsed: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|err| EngineError::Embedding(err.to_string()))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| {
                EngineError::Embedding("embedding response contained no data".to_string())
            })?;

        if vector.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::new().with_dimension(16);
        assert_eq!(provider.model_id(), "mock-embedding");

        let first = provider.embed("eyes on the street").await.unwrap();
        let second = provider.embed("eyes on the street").await.unwrap();
        let other = provider.embed("a completely different phrase").await.unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.len(), 16);

        let norm = first.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "expected unit vector, norm={norm}");
    }

    #[tokio::test]
    async fn openai_provider_parses_embedding_response() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200)
                    .json_body(json!({"data": [{"embedding": [0.1, 0.2, 0.3]}]}));
            })
            .await;

        let provider = OpenAiEmbeddingProvider::new("test-key")
            .with_base_url(server.base_url())
            .with_model("test-model", 3);

        assert_eq!(provider.model_id(), "test-model");
        let vector = provider.embed("hello").await.unwrap();
        mock.assert_async().await;
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn openai_provider_rejects_wrong_dimension() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(200)
                    .json_body(json!({"data": [{"embedding": [0.1, 0.2]}]}));
            })
            .await;

        let provider = OpenAiEmbeddingProvider::new("test-key")
            .with_base_url(server.base_url())
            .with_model("test-model", 3);

        let err = provider.embed("hello").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn openai_provider_surfaces_http_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(429).body("rate limited");
            })
            .await;

        let provider = OpenAiEmbeddingProvider::new("test-key").with_base_url(server.base_url());
        let err = provider.embed("hello").await.unwrap_err();
        assert!(matches!(err, EngineError::Embedding(_)));
    }
}
