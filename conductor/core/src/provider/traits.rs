//! Provider Adapter Trait
//!
//! The contract every backend implements. This abstraction lets the
//! controller drive cloud APIs, local inference servers and anything else
//! that can produce text through one streaming interface.
//!
//! # Design Philosophy
//!
//! An adapter turns `(model, messages, credentials, options)` into a stream of
//! [`ChatEvent`]s:
//! - `Typing` comes before the first `Token`
//! - every unit of produced answer text becomes a `Token`
//! - reasoning text becomes `Reasoning`, and only when the job asked for it
//! - a failure is yielded as one error item, after which the stream ends
//! - `Done` and `Cancelled` are never produced; they belong to the controller
//!
//! The adapter does not forward events itself. The controller owns the
//! returned stream and decides what reaches the client.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use super::error::ProviderError;
use crate::messages::{ChatEvent, MessageRole};

/// The event stream an adapter hands back
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent, ProviderError>> + Send>>;

/// One message in the prompt sent to a provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatMessage {
    /// Author of the turn
    pub role: MessageRole,
    /// Text of the turn
    pub content: String,
}

impl ChatMessage {
    /// Create a message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// System instructions
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// A user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// An assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Credentials for one provider
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// API key, if the provider needs one
    pub api_key: Option<String>,
    /// Endpoint override
    pub base_url: Option<String>,
}

impl Credentials {
    /// Credentials carrying only an API key
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            base_url: None,
        }
    }

    /// Set the endpoint override
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Whether a non-empty API key is present
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Per-request streaming options
#[derive(Clone, Debug, PartialEq)]
pub struct StreamOptions {
    /// Forward reasoning text as `Reasoning` events
    pub reasoning_mode: bool,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Longest allowed silence between stream items (zero disables)
    pub idle_timeout: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            reasoning_mode: false,
            temperature: None,
            max_tokens: None,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Provider adapter trait
///
/// Implement this trait to add support for a new backend.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name, as clients spell it (e.g. "ollama")
    fn name(&self) -> &str;

    /// Whether `stream_chat` needs an API key
    fn requires_credentials(&self) -> bool {
        false
    }

    /// Start a streaming chat completion
    ///
    /// Returns an error if the request could not be started at all. Failures
    /// after that are yielded inside the stream.
    async fn stream_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        credentials: &Credentials,
        options: &StreamOptions,
    ) -> Result<EventStream, ProviderError>;
}
