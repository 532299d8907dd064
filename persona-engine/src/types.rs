//! Shared error and citation types for the engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the engine.
///
/// Transient failures of external calls (embedding, generation) are retried
/// inside the component that owns them; the variants here are what remains
/// after retries are exhausted. Only the orchestrator translates these into
/// user-facing text.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad persona, template, or chunking parameters. Fatal at startup or
    /// ingestion; required fields are never silently defaulted.
    #[error("configuration error: {0}")]
    Config(String),

    /// Per-document or per-chunk failure during ingestion. Logged and
    /// skipped; the batch continues.
    #[error("ingestion error: {0}")]
    Ingestion(String),

    /// A caller-supplied argument was rejected (e.g. non-positive k).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Query and corpus were embedded with different models.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The embedding capability failed.
    #[error("embedding call failed: {0}")]
    Embedding(String),

    /// The generation capability failed.
    #[error("generation call failed: {0}")]
    Generation(String),

    /// Vector index persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// No persona with the given id is registered.
    #[error("unknown persona '{0}'")]
    UnknownPersona(String),

    /// A bounded external call exceeded its per-call timeout.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

/// Citation metadata attributed to an assistant turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    pub year: Option<i32>,
}
