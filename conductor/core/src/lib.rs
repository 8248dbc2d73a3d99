//! Chatmux Core - Cancellable Streaming Chat Orchestration
//!
//! This crate sits between clients and AI model providers. It accepts chat
//! requests per session, guarantees at most one active generation per
//! session, streams tokens back as they are produced, supports cooperative
//! cancellation, and separates reasoning text from answer text for models
//! that mix them in one stream. It knows nothing about the transport that
//! carries the events.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Clients (WebSocket, ...)                     │
//! │           ClientCommand (up)          ChatEvent (down)            │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                         CHATMUX CORE                             │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                CommandDispatcher (per connection)           │  │
//! │  └────────────────────────────┬───────────────────────────────┘  │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                        Controller                           │  │
//! │  │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌─────────────┐  │  │
//! │  │  │ Session  │  │ Context  │  │  Store   │  │  Provider   │  │  │
//! │  │  │ Registry │  │ Provider │  │          │  │  Registry   │  │  │
//! │  │  └──────────┘  └──────────┘  └──────────┘  └──────┬──────┘  │  │
//! │  └─────────────────────────────────────────────────────┼────────┘  │
//! │                                  ProviderAdapter + StreamNormalizer │
//! └─────────────────────────────────────────────────────────┼──────────┘
//!                                                           │
//!                                  Ollama / OpenAI / Anthropic / local
//! ```
//!
//! # Key Types
//!
//! - [`Controller`]: runs chat jobs from request to terminal event
//! - [`SessionRegistry`]: per-session single-flight gate and cancel tokens
//! - [`StreamNormalizer`]: splits reasoning from answer text mid-stream
//! - [`ProviderAdapter`]: the contract every provider backend implements
//! - [`ChatEvent`]: events sent to clients
//! - [`ClientCommand`]: commands received from clients
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use chatmux_core::{
//!     ChatRequest, Controller, ControllerConfig, OllamaAdapter, ProviderKind,
//!     ProviderRegistry, SessionRegistry,
//! };
//! use futures::StreamExt;
//!
//! let providers = ProviderRegistry::new()
//!     .with(ProviderKind::Ollama, Arc::new(OllamaAdapter::default()));
//! let controller = Arc::new(Controller::new(
//!     Arc::new(SessionRegistry::new()),
//!     Arc::new(providers),
//!     ControllerConfig::default(),
//! ));
//!
//! let mut events = controller.stream(ChatRequest::new("session-1", "Hello!"), 64);
//! while let Some(event) = events.next().await {
//!     println!("{}", chatmux_core::transport::encode_event(&event)?);
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: TOML, environment and CLI configuration
//! - [`context`]: retrieval context seam
//! - [`controller`]: the job state machine
//! - [`error`]: client-visible error taxonomy
//! - [`events`]: commands from clients
//! - [`messages`]: events to clients and identifiers
//! - [`prompt`]: prompt assembly
//! - [`provider`]: provider adapters, registry and credentials
//! - [`session`]: session registry and cancellation
//! - [`store`]: conversation persistence
//! - [`streaming`]: reasoning-aware stream normalization
//! - [`transport`]: wire codec and per-connection dispatch
//! - [`validation`]: input validation

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod events;
pub mod messages;
pub mod prompt;
pub mod provider;
pub mod session;
pub mod store;
pub mod streaming;
pub mod transport;
pub mod validation;

// Re-exports for convenience
pub use context::{ContextError, ContextProvider, NoContext, StaticContext};
pub use controller::{Admission, AdmittedJob, Controller, ControllerConfig, Job, JobOutcome};
pub use error::ChatError;
pub use events::{ChatRequest, ClientCommand};
pub use messages::{ChatEvent, JobId, MessageRole, SessionId};
pub use prompt::{assemble_prompt, DEFAULT_SYSTEM_PROMPT};
pub use session::{SessionGuard, SessionRegistry, SessionStatus};
pub use store::{
    ConversationStore, InMemoryConversationStore, PersistenceError, StoredMessage,
    DEFAULT_MAX_CONVERSATIONS,
};
pub use validation::{InputLimits, InputValidator, ValidationResult};

// Provider exports
pub use provider::{
    AnthropicAdapter, ChatMessage, CredentialStore, Credentials, EventStream, OllamaAdapter,
    OpenAiAdapter, ProviderAdapter, ProviderError, ProviderKind, ProviderRegistry, StreamOptions,
    TransportFailure,
};

// Cancellation is tokio-util's token
pub use tokio_util::sync::CancellationToken;

// Streaming exports
pub use streaming::{split_reasoning, DialectTable, NormalizedDelta, StreamNormalizer, TagPair};

// Transport exports
pub use transport::{CodecError, CommandDispatcher};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ChatmuxConfig, ChatmuxToml,
    ConfigError, ConfigOverrides, ConfigSource,
};
