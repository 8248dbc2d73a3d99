//! Chat Errors
//!
//! Every way a chat job can fail. The `Display` text of a [`ChatError`] is
//! exactly what the client sees in its `error` event.

use thiserror::Error;

use crate::context::ContextError;
use crate::provider::ProviderError;
use crate::store::PersistenceError;

/// Errors that end a chat job early
#[derive(Debug, Error)]
pub enum ChatError {
    /// The session already has a job streaming
    #[error("Session already streaming")]
    SessionBusy,

    /// The request failed validation
    #[error("{0}")]
    InvalidInput(String),

    /// The context provider failed
    #[error("Failed to retrieve context: {0}")]
    ContextRetrieval(#[from] ContextError),

    /// Context is required but none was found
    #[error("No relevant context found for this message")]
    ContextMissing,

    /// The requested provider cannot be used
    #[error("Provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable {
        /// Provider name as requested
        provider: String,
        /// Why it cannot be used
        reason: String,
    },

    /// The provider failed while starting or during the stream
    #[error(transparent)]
    ProviderTransport(#[from] ProviderError),

    /// Saving the conversation failed; logged, never sent to the client
    #[error("Failed to persist conversation: {0}")]
    Persistence(#[from] PersistenceError),
}

impl ChatError {
    /// Build a provider-unavailable error
    pub fn provider_unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Short, stable label for logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionBusy => "session_busy",
            Self::InvalidInput(_) => "invalid_input",
            Self::ContextRetrieval(_) | Self::ContextMissing => "context_retrieval",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::ProviderTransport(_) => "provider_transport",
            Self::Persistence(_) => "persistence",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_client_messages() {
        assert_eq!(ChatError::SessionBusy.to_string(), "Session already streaming");
        assert_eq!(
            ChatError::provider_unavailable("gemini", "unknown provider").to_string(),
            "Provider 'gemini' unavailable: unknown provider"
        );
    }

    #[test]
    fn test_provider_message_passes_through() {
        let err = ChatError::from(ProviderError::Reported("x".into()));
        assert_eq!(err.to_string(), "x");
        assert_eq!(err.kind(), "provider_transport");
    }

    #[test]
    fn test_context_error_wrapped() {
        let err = ChatError::from(ContextError::Unavailable("index offline".into()));
        assert_eq!(err.to_string(), "Failed to retrieve context: index offline");
        assert_eq!(err.kind(), "context_retrieval");
    }
}
