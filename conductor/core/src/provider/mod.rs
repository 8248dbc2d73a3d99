//! LLM Provider Integration
//!
//! Abstracted, streaming access to LLM providers through one trait.
//!
//! # Available Providers
//!
//! - **Ollama**: Local LLM server (default)
//! - **OpenAI**: Hosted chat completions API
//! - **Anthropic**: Hosted messages API
//! - **Local**: Any OpenAI-compatible server (llama.cpp, vLLM, LM Studio)
//!
//! # Usage
//!
//! ```ignore
//! use chatmux_core::provider::{ChatMessage, Credentials, OllamaAdapter, ProviderAdapter, StreamOptions};
//!
//! let adapter = OllamaAdapter::default();
//! let mut events = adapter
//!     .stream_chat("llama3.2", &[ChatMessage::user("Hello!")], &Credentials::default(), &StreamOptions::default())
//!     .await?;
//! while let Some(event) = events.next().await { /* ... */ }
//! ```

mod anthropic;
mod error;
mod ollama;
mod openai;
mod registry;
mod stream;
mod traits;

pub use anthropic::{AnthropicAdapter, ANTHROPIC_BASE_URL};
pub use error::{ProviderError, TransportFailure};
pub use ollama::OllamaAdapter;
pub use openai::{OpenAiAdapter, LOCAL_BASE_URL, OPENAI_BASE_URL};
pub use registry::{CredentialStore, ProviderKind, ProviderRegistry, UnknownProvider};
pub use stream::{byte_lines, normalized_events, sse_events, with_idle_timeout, RawChunk};
pub use traits::{ChatMessage, Credentials, EventStream, ProviderAdapter, StreamOptions};
