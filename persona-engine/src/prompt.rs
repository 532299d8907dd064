//! Prompt assembly: retrieved chunks plus conversation history become one
//! [`GenerationRequest`].
//!
//! Assembly is pure and deterministic; identical inputs always produce an
//! identical request. Excerpts keep retrieval order, history keeps
//! chronological order with the oldest turns dropped once the persona's
//! window is exceeded.

use crate::conversation::{Role, Turn};
use crate::persona::PersonaConfig;
use crate::retriever::ScoredChunk;

/// Marker injected when retrieval came back empty, so the model knows it is
/// answering without source material instead of silently improvising.
pub const NO_CONTEXT_NOTICE: &str =
    "No relevant excerpts were found in your writings for this question. \
     Answer from your general perspective and say when you are unsure.";

#[derive(Clone, Debug, PartialEq)]
pub struct ContextBlock {
    pub label: String,
    pub text: String,
}

#[derive(Clone, Debug)]
pub struct HistoryMessage {
    pub role: Role,
    pub text: String,
}

/// Everything a [`GenerationProvider`](crate::generation::GenerationProvider)
/// needs to produce a response.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub context_blocks: Vec<ContextBlock>,
    pub history: Vec<HistoryMessage>,
    pub user_message: String,
}

impl GenerationRequest {
    /// Whether the request carries retrieved source material.
    pub fn is_grounded(&self) -> bool {
        !self.context_blocks.is_empty()
    }

    /// The context section preceding the user's question: labelled excerpt
    /// blocks, or the no-context notice when retrieval found nothing.
    pub fn context_prologue(&self) -> String {
        if self.context_blocks.is_empty() {
            return NO_CONTEXT_NOTICE.to_string();
        }
        let mut prologue = String::from("Here are relevant excerpts from your writings:\n");
        for block in &self.context_blocks {
            prologue.push_str(&format!("\n--- {} ---\n{}\n", block.label, block.text));
        }
        prologue
    }
}

/// Builds the request for one message turn.
///
/// `history` is the conversation as it stands before the current message;
/// the current message rides separately so providers can attach the context
/// prologue to it.
pub fn assemble(
    persona: &PersonaConfig,
    system_prompt: &str,
    retrieved: &[ScoredChunk],
    history: &[Turn],
    user_message: &str,
) -> GenerationRequest {
    let context_blocks = retrieved
        .iter()
        .enumerate()
        .map(|(i, scored)| {
            let year = scored
                .chunk
                .source_year
                .map_or_else(|| "Unknown".to_string(), |y| y.to_string());
            ContextBlock {
                label: format!("Excerpt {} ({}, {})", i + 1, scored.chunk.source_title, year),
                text: scored.chunk.text.clone(),
            }
        })
        .collect();

    let window = persona.retrieval.history_turns;
    let skip = history.len().saturating_sub(window);
    let history = history[skip..]
        .iter()
        .map(|turn| HistoryMessage {
            role: turn.role,
            text: turn.text.clone(),
        })
        .collect();

    GenerationRequest {
        system_prompt: system_prompt.to_string(),
        context_blocks,
        history,
        user_message: user_message.to_string(),
    }
}
