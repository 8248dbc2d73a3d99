//! Chat Events
//!
//! Events sent from the orchestration layer to connected clients. Every chat
//! request produces a stream of these, closed by exactly one terminal event.
//!
//! # Design Philosophy
//!
//! The event set is a small, closed, wire-stable union. Providers produce
//! `Typing`, `Token`, `Reasoning` and `Error`; only the controller produces the
//! terminal `Done` or `Cancelled`. Clients can therefore render a stream
//! without knowing which backend served it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Events from the orchestration layer to a client
///
/// Serialized as internally tagged JSON, e.g. `{"type":"token","content":"hi"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatEvent {
    /// The backend accepted the request and is generating
    Typing,
    /// A unit of visible answer text
    Token {
        /// Answer text to append
        content: String,
    },
    /// A unit of reasoning text, only sent when the job asked for it
    Reasoning {
        /// Reasoning text to append
        content: String,
    },
    /// Something went wrong; a terminal event still follows
    Error {
        /// Human-readable description
        message: String,
    },
    /// The job finished
    Done,
    /// The job was cancelled by the client
    Cancelled,
}

impl ChatEvent {
    /// Build a token event
    pub fn token(content: impl Into<String>) -> Self {
        Self::Token {
            content: content.into(),
        }
    }

    /// Build a reasoning event
    pub fn reasoning(content: impl Into<String>) -> Self {
        Self::Reasoning {
            content: content.into(),
        }
    }

    /// Build an error event
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this event closes the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

/// Session identifier, chosen by the client
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Wrap a client-supplied identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job identifier, one per request-to-terminal-event lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub uuid::Uuid);

impl JobId {
    /// Generate a new random job ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job_{}", self.0.simple())
    }
}

/// Who authored a conversation turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// End user
    User,
    /// Model answer
    Assistant,
    /// System instructions
    System,
}

impl MessageRole {
    /// Wire name used by chat-style APIs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_event_wire_shapes() {
        let cases = [
            (ChatEvent::Typing, r#"{"type":"typing"}"#),
            (ChatEvent::token("hi"), r#"{"type":"token","content":"hi"}"#),
            (ChatEvent::error("boom"), r#"{"type":"error","message":"boom"}"#),
            (ChatEvent::Done, r#"{"type":"done"}"#),
            (ChatEvent::Cancelled, r#"{"type":"cancelled"}"#),
        ];
        for (event, json) in cases {
            assert_eq!(serde_json::to_string(&event).unwrap(), json);
        }
    }

    #[test]
    fn test_reasoning_event_shape() {
        let json = serde_json::to_string(&ChatEvent::reasoning("hmm")).unwrap();
        assert_eq!(json, r#"{"type":"reasoning","content":"hmm"}"#);
    }

    #[test]
    fn test_terminal_events() {
        assert!(ChatEvent::Done.is_terminal());
        assert!(ChatEvent::Cancelled.is_terminal());
        assert!(!ChatEvent::Typing.is_terminal());
        assert!(!ChatEvent::error("x").is_terminal());
    }

    #[test]
    fn test_job_id_unique() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("job_"));
    }

    #[test]
    fn test_role_names() {
        assert_eq!(MessageRole::Assistant.as_str(), "assistant");
        assert_eq!(
            serde_json::to_string(&MessageRole::User).unwrap(),
            r#""user""#
        );
    }
}
