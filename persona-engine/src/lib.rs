//! Retrieval-grounded persona conversations.
//!
//! The crate turns an author's corpus into a conversational persona that
//! answers in character, grounded in retrieved excerpts from their actual
//! writing.
//!
//! Ingestion side:
//!
//! ```text
//! corpus files ──▶ chunking ──▶ embeddings ──▶ chunk store
//!   (corpus)      (chunking)   (embeddings)     (stores)
//!                        └──── indexer drives ────┘
//! ```
//!
//! Conversation side:
//!
//! ```text
//! message ──▶ retriever ──▶ prompt assembly ──▶ generation ──▶ response
//!                 ▲               ▲                                │
//!            chunk store    conversation +                  turns appended
//!                           persona config                 to conversation
//! ```
//!
//! [`ConversationEngine`] wires both sides together; the `persona-server`
//! crate exposes it over HTTP.

pub mod chunking;
pub mod conversation;
pub mod corpus;
pub mod embeddings;
pub mod generation;
pub mod indexer;
pub mod orchestrator;
pub mod persona;
pub mod prompt;
pub mod retriever;
pub mod retry;
pub mod stores;
pub mod types;

pub use orchestrator::{ChatOutcome, ConversationEngine, EngineStats, FALLBACK_RESPONSE};
pub use types::{EngineError, SourceRef};
