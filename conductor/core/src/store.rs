//! Conversation Persistence
//!
//! Where finished turns are written, and where history is read back from
//! when a new prompt is assembled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::MessageRole;

/// Errors from a conversation store
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The backing store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The write or read was refused
    #[error("{0}")]
    Rejected(String),
}

/// One persisted conversation turn
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Unique message ID
    pub id: String,
    /// Conversation the turn belongs to
    pub conversation_id: String,
    /// Author, when known
    pub user_id: Option<String>,
    /// Role of the turn
    pub role: MessageRole,
    /// Text of the turn
    pub content: String,
    /// Extra data (e.g. reasoning text)
    pub metadata: Option<serde_json::Value>,
    /// When the turn was saved
    pub timestamp: DateTime<Utc>,
}

/// Persists conversation turns
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append one turn to a conversation
    async fn save_message(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
        role: MessageRole,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), PersistenceError>;

    /// The most recent `limit` turns, oldest first
    async fn load_history(
        &self,
        _conversation_id: &str,
        _limit: usize,
    ) -> Result<Vec<StoredMessage>, PersistenceError> {
        Ok(Vec::new())
    }
}

/// Conversation cap used by the daemon
pub const DEFAULT_MAX_CONVERSATIONS: usize = 1024;

/// Conversation store kept in process memory
///
/// Each conversation keeps at most `max_messages` turns (0 = unlimited);
/// the oldest are dropped first. At most `max_conversations` conversations
/// are held (0 = unlimited); starting one more evicts the conversation that
/// was written to least recently.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
    max_messages: usize,
    max_conversations: usize,
    clock: AtomicU64,
}

#[derive(Debug, Default)]
struct Conversation {
    turns: Vec<StoredMessage>,
    /// Store clock at the last write
    last_write: u64,
}

impl InMemoryConversationStore {
    /// Create an unbounded store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that keeps at most `max_messages` turns per conversation
    #[must_use]
    pub fn with_max_messages(max_messages: usize) -> Self {
        Self {
            max_messages,
            ..Self::default()
        }
    }

    /// Hold at most `max_conversations` conversations
    #[must_use]
    pub fn with_max_conversations(mut self, max_conversations: usize) -> Self {
        self.max_conversations = max_conversations;
        self
    }

    /// Every stored turn of a conversation, oldest first
    #[must_use]
    pub fn messages(&self, conversation_id: &str) -> Vec<StoredMessage> {
        self.conversations
            .read()
            .get(conversation_id)
            .map(|c| c.turns.clone())
            .unwrap_or_default()
    }

    /// Number of conversations held
    #[must_use]
    pub fn conversation_count(&self) -> usize {
        self.conversations.read().len()
    }

    fn evict_stalest(&self, conversations: &mut HashMap<String, Conversation>) {
        let stalest = conversations
            .iter()
            .min_by_key(|(_, c)| c.last_write)
            .map(|(id, _)| id.clone());
        if let Some(id) = stalest {
            conversations.remove(&id);
            tracing::debug!(
                conversation_id = %id,
                max_conversations = self.max_conversations,
                "Evicted least recently written conversation"
            );
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn save_message(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
        role: MessageRole,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), PersistenceError> {
        let message = StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            user_id: user_id.map(str::to_string),
            role,
            content: content.to_string(),
            metadata,
            timestamp: Utc::now(),
        };

        let mut conversations = self.conversations.write();
        if self.max_conversations > 0
            && !conversations.contains_key(conversation_id)
            && conversations.len() >= self.max_conversations
        {
            self.evict_stalest(&mut conversations);
        }

        let conversation = conversations.entry(conversation_id.to_string()).or_default();
        conversation.last_write = self.clock.fetch_add(1, Ordering::Relaxed);
        let turns = &mut conversation.turns;
        turns.push(message);
        if self.max_messages > 0 && turns.len() > self.max_messages {
            let excess = turns.len() - self.max_messages;
            turns.drain(..excess);
        }
        Ok(())
    }

    async fn load_history(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, PersistenceError> {
        let conversations = self.conversations.read();
        let Some(Conversation { turns, .. }) = conversations.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let start = turns.len().saturating_sub(limit);
        Ok(turns[start..].to_vec())
    }
}
