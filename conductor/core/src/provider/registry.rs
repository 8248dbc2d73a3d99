//! Provider Registry
//!
//! The closed set of provider kinds, the adapter instance registered for
//! each, and the credentials to hand them.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::traits::{Credentials, ProviderAdapter};

/// Supported provider kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat completions
    OpenAi,
    /// Anthropic messages API
    Anthropic,
    /// Ollama local server
    Ollama,
    /// Any OpenAI-compatible local server (llama.cpp, vLLM, LM Studio)
    Local,
}

impl ProviderKind {
    /// Every kind, in display order
    pub const ALL: [ProviderKind; 4] = [Self::OpenAi, Self::Anthropic, Self::Ollama, Self::Local];

    /// Name used on the wire and in configuration
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider name that matches no [`ProviderKind`]
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown provider '{0}'")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

/// Maps each provider kind to its adapter instance
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the adapter for `kind`
    pub fn register(&mut self, kind: ProviderKind, adapter: Arc<dyn ProviderAdapter>) {
        tracing::debug!(provider = %kind, adapter = adapter.name(), "Registered provider adapter");
        self.adapters.insert(kind, adapter);
    }

    /// Builder-style [`register`](Self::register)
    #[must_use]
    pub fn with(mut self, kind: ProviderKind, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(kind, adapter);
        self
    }

    /// The adapter registered for `kind`
    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Kinds with a registered adapter
    #[must_use]
    pub fn kinds(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|k| self.adapters.contains_key(k))
            .collect()
    }

    /// Whether no adapters are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Credentials per provider kind
///
/// Updatable at runtime; readers get a clone.
#[derive(Debug, Default)]
pub struct CredentialStore {
    entries: RwLock<HashMap<ProviderKind, Credentials>>,
}

impl CredentialStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the credentials for `kind`
    pub fn insert(&self, kind: ProviderKind, credentials: Credentials) {
        self.entries.write().insert(kind, credentials);
    }

    /// Builder-style [`insert`](Self::insert)
    #[must_use]
    pub fn with(self, kind: ProviderKind, credentials: Credentials) -> Self {
        self.insert(kind, credentials);
        self
    }

    /// Credentials for `kind`, or empty credentials if none are stored
    #[must_use]
    pub fn get(&self, kind: ProviderKind) -> Credentials {
        self.entries.read().get(&kind).cloned().unwrap_or_default()
    }

    /// Forget the credentials for `kind`
    pub fn remove(&self, kind: ProviderKind) {
        self.entries.write().remove(&kind);
    }
}
