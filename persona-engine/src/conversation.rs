//! Conversation state and the in-process conversation store.
//!
//! Conversations are append-only turn logs. The store hands out one shared
//! handle per conversation id; callers lock that handle for the whole
//! read-retrieve-generate-append sequence so concurrent messages to the same
//! conversation serialize instead of interleaving. The map lock itself is a
//! plain mutex and is never held across an await.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::SourceRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation. Assistant turns carry the sources that
/// grounded them; user turns carry none.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub cited_sources: Vec<SourceRef>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            cited_sources: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>, cited_sources: Vec<SourceRef>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            cited_sources,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub persona_id: String,
    turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, persona_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            persona_id: persona_id.into(),
            turns: Vec::new(),
            created_at: now,
            last_active_at: now,
        }
    }

    /// Appends a turn and refreshes the activity timestamp. Turns are never
    /// edited or removed after this.
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.last_active_at = Utc::now();
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The most recent `max` turns, oldest dropped first.
    pub fn recent_turns(&self, max: usize) -> &[Turn] {
        let skip = self.turns.len().saturating_sub(max);
        &self.turns[skip..]
    }
}

/// Shared handle to one conversation. Hold the lock across the full message
/// turn to keep read-then-append atomic per conversation.
pub type SharedConversation = Arc<tokio::sync::Mutex<Conversation>>;

/// In-process conversation registry. State lives for the process lifetime
/// unless evicted or deleted; restarts start empty.
#[derive(Default)]
pub struct ConversationStore {
    inner: Mutex<FxHashMap<String, SharedConversation>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a conversation by id, or creates a fresh one. `None` and
    /// unknown ids both get a newly generated id rather than adopting the
    /// caller's; stale ids from before a restart must not resurrect as
    /// empty conversations under the old name.
    ///
    /// Returns `(id, handle, created)`.
    pub fn get_or_create(
        &self,
        persona_id: &str,
        conversation_id: Option<&str>,
    ) -> (String, SharedConversation, bool) {
        let mut conversations = self.inner.lock();
        if let Some(id) = conversation_id
            && let Some(existing) = conversations.get(id)
        {
            return (id.to_string(), Arc::clone(existing), false);
        }

        let id = Uuid::new_v4().to_string();
        let handle = Arc::new(tokio::sync::Mutex::new(Conversation::new(
            id.clone(),
            persona_id,
        )));
        conversations.insert(id.clone(), Arc::clone(&handle));
        (id, handle, true)
    }

    /// Removes a conversation. Returns whether it existed.
    pub fn remove(&self, conversation_id: &str) -> bool {
        self.inner.lock().remove(conversation_id).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Drops conversations idle longer than `max_idle`. A conversation with
    /// an outstanding handle or a held lock is mid-turn and is skipped this
    /// sweep, so an append that has left `get_or_create` but not yet
    /// acquired the lock can never land on an evicted entry.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_idle).unwrap_or_else(|_| chrono::Duration::zero());
        let mut conversations = self.inner.lock();
        let before = conversations.len();
        conversations.retain(|_, handle| {
            // A reference outside the map means a turn is in flight, even
            // before it holds the lock.
            if Arc::strong_count(handle) > 1 {
                return true;
            }
            match handle.try_lock() {
                Ok(conversation) => conversation.last_active_at >= cutoff,
                Err(_) => true,
            }
        });
        before - conversations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn turns_accumulate_in_order() {
        let store = ConversationStore::new();
        let (id, handle, created) = store.get_or_create("jane-jacobs", None);
        assert!(created);

        {
            let mut conversation = handle.lock().await;
            conversation.append(Turn::user("hello"));
            conversation.append(Turn::assistant("hi there", Vec::new()));
        }

        let (same_id, handle, created) = store.get_or_create("jane-jacobs", Some(&id));
        assert!(!created);
        assert_eq!(same_id, id);
        let conversation = handle.lock().await;
        assert_eq!(conversation.turns().len(), 2);
        assert_eq!(conversation.turns()[0].role, Role::User);
        assert_eq!(conversation.turns()[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn unknown_id_gets_a_fresh_one() {
        let store = ConversationStore::new();
        let (id, _, created) = store.get_or_create("jane-jacobs", Some("no-such-id"));
        assert!(created);
        assert_ne!(id, "no-such-id");
        assert_eq!(store.active_count(), 1);
    }

    #[tokio::test]
    async fn recent_turns_keeps_the_tail() {
        let mut conversation = Conversation::new("c", "p");
        for i in 0..5 {
            conversation.append(Turn::user(format!("message {i}")));
        }
        let recent = conversation.recent_turns(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text, "message 3");
        assert_eq!(recent[1].text, "message 4");
        assert_eq!(conversation.recent_turns(100).len(), 5);
    }

    #[tokio::test]
    async fn remove_and_evict() {
        let store = ConversationStore::new();
        let (id, _, _) = store.get_or_create("p", None);
        assert!(store.remove(&id));
        assert!(!store.remove(&id));

        let (_, _, _) = store.get_or_create("p", None);
        assert_eq!(store.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(store.evict_idle(Duration::from_secs(0)), 1);
        assert_eq!(store.active_count(), 0);
    }

    #[tokio::test]
    async fn eviction_skips_in_flight_conversations() {
        let store = ConversationStore::new();
        let (id, handle, _) = store.get_or_create("p", None);

        // Mid-turn with the lock held.
        let guard = handle.lock().await;
        assert_eq!(store.evict_idle(Duration::from_secs(0)), 0);
        drop(guard);

        // A handle handed out but not yet locked also blocks eviction, so
        // the append below cannot land on an orphaned conversation.
        assert_eq!(store.evict_idle(Duration::from_secs(0)), 0);
        handle.lock().await.append(Turn::user("landed after the sweep"));
        drop(handle);

        let (same_id, handle, created) = store.get_or_create("p", Some(&id));
        assert!(!created);
        assert_eq!(same_id, id);
        assert_eq!(handle.lock().await.turns().len(), 1);

        drop(handle);
        assert_eq!(store.evict_idle(Duration::from_secs(0)), 1);
    }
}
