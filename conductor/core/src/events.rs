//! Client Commands
//!
//! Commands sent from clients to the orchestration layer.
//!
//! # Design Philosophy
//!
//! Clients only ask for things: start a chat, cancel a chat, keep the
//! connection alive. They never drive session state directly. The dispatcher
//! decides how to respond and answers with [`ChatEvent`](crate::messages::ChatEvent)s.

use serde::{Deserialize, Serialize};

use crate::messages::SessionId;

/// Commands from a client to the orchestration layer
///
/// Serialized as internally tagged JSON with camelCase field names, e.g.
/// `{"type":"cancel","sessionId":"s1"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientCommand {
    /// Start a chat job on a session
    Chat(ChatRequest),
    /// Cancel the active job on a session
    Cancel {
        /// Target session
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    /// Keep-alive; produces no events
    Heartbeat,
}

/// A request to run one chat job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Session the job runs on
    pub session_id: SessionId,
    /// The user's message
    pub message: String,
    /// Model name; falls back to the configured default
    #[serde(default)]
    pub model: Option<String>,
    /// Provider name; falls back to the configured default
    #[serde(default)]
    pub provider: Option<String>,
    /// Conversation to persist into; defaults to the session id
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Authenticated user, if the transport knows one
    #[serde(default)]
    pub user_id: Option<String>,
    /// Forward reasoning text as `reasoning` events
    #[serde(default)]
    pub reasoning: bool,
    /// Whether to fetch retrieval context; defaults to true
    #[serde(default = "default_use_context")]
    pub use_context: bool,
}

fn default_use_context() -> bool {
    true
}

impl ChatRequest {
    /// Create a request with defaults for everything but session and message
    pub fn new(session_id: impl Into<SessionId>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: message.into(),
            model: None,
            provider: None,
            conversation_id: None,
            user_id: None,
            reasoning: false,
            use_context: true,
        }
    }

    /// Set the provider name
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Set the model name
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the conversation ID
    #[must_use]
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Enable reasoning forwarding
    #[must_use]
    pub fn with_reasoning(mut self, reasoning: bool) -> Self {
        self.reasoning = reasoning;
        self
    }
}
