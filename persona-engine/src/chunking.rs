//! Splits cleaned source documents into overlapping, citable chunks.
//!
//! Chunks break on sentence and paragraph boundaries where possible,
//! accumulating sentences until `target_size` characters. The next chunk
//! restarts `overlap` characters before the previous chunk's end (snapped
//! back to a sentence boundary) so context carries across chunk edges.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use unicode_segmentation::UnicodeSegmentation;

use crate::types::EngineError;

/// A cleaned document as handed over by the ingestion collaborator.
#[derive(Clone, Debug)]
pub struct SourceDocument {
    pub text: String,
    pub title: String,
    pub year: Option<i32>,
}

/// Chunking parameters, both measured in characters.
#[derive(Clone, Debug)]
pub struct ChunkingConfig {
    pub target_size: usize,
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_size: 2000,
            overlap: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.target_size == 0 {
            return Err(EngineError::Config(
                "chunking target_size must be positive".to_string(),
            ));
        }
        if self.overlap >= self.target_size {
            return Err(EngineError::Config(format!(
                "chunking overlap ({}) must be smaller than target_size ({})",
                self.overlap, self.target_size
            )));
        }
        Ok(())
    }
}

/// A bounded span of source text with citation metadata, the unit of
/// retrieval. Immutable once created; identity is the hash of normalized
/// text, so re-chunking identical input produces identical ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Lowercase hex SHA-256 of the whitespace-normalized chunk text.
    pub id: String,
    pub text: String,
    pub source_title: String,
    pub source_year: Option<i32>,
    /// Position within the source document. Preserved for citation
    /// coherence and as the deterministic retrieval tie-break; never used
    /// for ranking.
    pub sequence_index: usize,
    /// Character offsets `(start, end)` into the source document text.
    pub char_span: (usize, usize),
}

/// Content hash over whitespace-normalized text, so re-flowed but otherwise
/// identical passages deduplicate.
pub fn content_hash(text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// A sentence with its character and byte offsets in the source text.
struct Segment {
    char_start: usize,
    char_end: usize,
    byte_start: usize,
    byte_end: usize,
}

fn segments(text: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut char_offset = 0usize;
    // Sentence bounds cover the whole string; newlines terminate sentences,
    // so paragraph breaks are boundaries too.
    for (byte_start, sentence) in text.split_sentence_bound_indices() {
        let char_start = char_offset;
        char_offset += sentence.chars().count();
        if sentence.trim().is_empty() {
            continue;
        }
        out.push(Segment {
            char_start,
            char_end: char_offset,
            byte_start,
            byte_end: byte_start + sentence.len(),
        });
    }
    out
}

/// Splits a document into overlapping chunks in source order.
///
/// An empty or whitespace-only document yields an empty sequence. A chunk
/// exceeds `target_size` only when a single sentence does; sentences are
/// never split.
pub fn chunk(document: &SourceDocument, config: &ChunkingConfig) -> Result<Vec<Chunk>, EngineError> {
    config.validate()?;

    let segments = segments(&document.text);
    if segments.is_empty() {
        return Ok(Vec::new());
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        // Accumulate sentences while the span stays within target_size; the
        // first sentence is always taken, even if oversized on its own.
        let mut end = start + 1;
        while end < segments.len() {
            let width = segments[end].char_end - segments[start].char_start;
            if width > config.target_size {
                break;
            }
            end += 1;
        }

        let text = document.text[segments[start].byte_start..segments[end - 1].byte_end]
            .trim()
            .to_string();
        let char_span = (segments[start].char_start, segments[end - 1].char_end);
        chunks.push(Chunk {
            id: content_hash(&text),
            text,
            source_title: document.title.clone(),
            source_year: document.year,
            sequence_index: chunks.len(),
            char_span,
        });

        if end >= segments.len() {
            break;
        }

        // Restart `overlap` characters before this chunk's end, snapped
        // forward to a sentence start. `next` lands in (start, end], which
        // guarantees forward progress.
        let restart = char_span.1.saturating_sub(config.overlap);
        let mut next = start + 1;
        while next < end && segments[next].char_start < restart {
            next += 1;
        }
        start = next;
    }

    Ok(chunks)
}
