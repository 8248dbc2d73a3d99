//! TOML Configuration File Support
//!
//! Centralized configuration loading, with a TOML configuration file at
//! `~/.config/chatmux/conductor.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (when applicable)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! The configuration file follows XDG Base Directory specification:
//! - `$XDG_CONFIG_HOME/chatmux/conductor.toml` (typically `~/.config/chatmux/conductor.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind_address = "127.0.0.1:8765"
//! max_message_size = 65536
//! event_buffer = 256
//!
//! [session]
//! inactivity_timeout_secs = 3600
//! sweep_interval_secs = 60
//!
//! [chat]
//! system_prompt = "You are a helpful assistant."
//! context_top_k = 5
//! require_context = false
//! history_limit = 10
//! max_input_length = 32768
//! default_provider = "ollama"
//! default_model = "llama3.2"
//!
//! [provider]
//! idle_timeout_secs = 60
//! ollama_host = "localhost"
//! ollama_port = 11434
//! local_base_url = "http://127.0.0.1:8080/v1"
//! ```
//!
//! API keys are best supplied through `OPENAI_API_KEY` and
//! `ANTHROPIC_API_KEY` rather than the file.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::ControllerConfig;
use crate::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::provider::{CredentialStore, Credentials, ProviderKind};
use crate::transport::DEFAULT_MAX_MESSAGE_SIZE;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Address the WebSocket server listens on
    pub bind_address: Option<String>,

    /// Maximum inbound message size in bytes
    pub max_message_size: Option<usize>,

    /// Per-connection outbound event buffer
    pub event_buffer: Option<usize>,
}

/// Session section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// Idle time after which a session is reaped
    pub inactivity_timeout_secs: Option<u64>,

    /// How often the reaper runs
    pub sweep_interval_secs: Option<u64>,
}

/// Chat section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatToml {
    /// System prompt
    pub system_prompt: Option<String>,

    /// Pieces of context to retrieve per message
    pub context_top_k: Option<usize>,

    /// Fail jobs that find no context
    pub require_context: Option<bool>,

    /// Stored turns included in each prompt
    pub history_limit: Option<usize>,

    /// Maximum input length in characters
    pub max_input_length: Option<usize>,

    /// Provider used when a request names none
    pub default_provider: Option<String>,

    /// Model used when a request names none
    pub default_model: Option<String>,
}

/// Provider section of the TOML configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToml {
    /// Seconds of provider silence before a stream fails (0 = never)
    pub idle_timeout_secs: Option<u64>,

    /// Ollama host
    pub ollama_host: Option<String>,

    /// Ollama port
    pub ollama_port: Option<u16>,

    /// OpenAI API key
    pub openai_api_key: Option<String>,

    /// OpenAI endpoint override
    pub openai_base_url: Option<String>,

    /// Anthropic API key
    pub anthropic_api_key: Option<String>,

    /// Local OpenAI-compatible server endpoint
    pub local_base_url: Option<String>,
}

impl fmt::Debug for ProviderToml {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderToml")
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("ollama_host", &self.ollama_host)
            .field("ollama_port", &self.ollama_port)
            .field("openai_api_key", &redacted(self.openai_api_key.as_ref()))
            .field("openai_base_url", &self.openai_base_url)
            .field("anthropic_api_key", &redacted(self.anthropic_api_key.as_ref()))
            .field("local_base_url", &self.local_base_url)
            .finish()
    }
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatmuxToml {
    /// Server configuration section
    pub server: ServerToml,

    /// Session configuration section
    pub session: SessionToml,

    /// Chat configuration section
    pub chat: ChatToml,

    /// Provider configuration section
    pub provider: ProviderToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Server settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the WebSocket server listens on
    pub bind_address: String,
    /// Maximum inbound message size in bytes
    pub max_message_size: usize,
    /// Per-connection outbound event buffer
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8765".to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            event_buffer: 256,
        }
    }
}

/// Session lifetime settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Idle time after which a session is reaped
    pub inactivity_timeout: Duration,
    /// How often the reaper runs
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(3600), // 1 hour
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Chat pipeline settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatConfig {
    /// System prompt
    pub system_prompt: String,
    /// Pieces of context to retrieve per message
    pub context_top_k: usize,
    /// Fail jobs that find no context
    pub require_context: bool,
    /// Stored turns included in each prompt
    pub history_limit: usize,
    /// Maximum input length in characters
    pub max_input_length: usize,
    /// Provider used when a request names none
    pub default_provider: String,
    /// Model used when a request names none
    pub default_model: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            context_top_k: 5,
            require_context: false,
            history_limit: 10,
            max_input_length: 32768,
            default_provider: ProviderKind::Ollama.as_str().to_string(),
            default_model: "llama3.2".to_string(),
        }
    }
}

/// Provider connection settings
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Provider silence before a stream fails (zero = never)
    pub idle_timeout: Duration,
    /// Ollama host
    pub ollama_host: String,
    /// Ollama port
    pub ollama_port: u16,
    /// OpenAI API key
    pub openai_api_key: Option<String>,
    /// OpenAI endpoint override
    pub openai_base_url: Option<String>,
    /// Anthropic API key
    pub anthropic_api_key: Option<String>,
    /// Local OpenAI-compatible server endpoint
    pub local_base_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            ollama_host: "localhost".to_string(),
            ollama_port: 11434,
            openai_api_key: None,
            openai_base_url: None,
            anthropic_api_key: None,
            local_base_url: None,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("idle_timeout", &self.idle_timeout)
            .field("ollama_host", &self.ollama_host)
            .field("ollama_port", &self.ollama_port)
            .field("openai_api_key", &redacted(self.openai_api_key.as_ref()))
            .field("openai_base_url", &self.openai_base_url)
            .field("anthropic_api_key", &redacted(self.anthropic_api_key.as_ref()))
            .field("local_base_url", &self.local_base_url)
            .finish()
    }
}

/// Centralized configuration for chatmux
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct ChatmuxConfig {
    /// Server settings
    pub server: ServerConfig,

    /// Session settings
    pub session: SessionConfig,

    /// Chat pipeline settings
    pub chat: ChatConfig,

    /// Provider settings
    pub provider: ProviderConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ChatmuxConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            chat: ChatConfig::default(),
            provider: ProviderConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ChatmuxConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check that values are usable
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .bind_address
            .parse::<SocketAddr>()
            .map_err(|e| {
                ConfigError::ValidationError(format!(
                    "bind_address '{}': {e}",
                    self.server.bind_address
                ))
            })?;
        if self.server.max_message_size == 0 {
            return Err(ConfigError::ValidationError(
                "max_message_size must be greater than 0".to_string(),
            ));
        }
        if self.server.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "event_buffer must be greater than 0".to_string(),
            ));
        }
        if self.session.sweep_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "sweep_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.chat.max_input_length == 0 {
            return Err(ConfigError::ValidationError(
                "max_input_length must be greater than 0".to_string(),
            ));
        }
        self.chat
            .default_provider
            .parse::<ProviderKind>()
            .map_err(|e| ConfigError::ValidationError(format!("default_provider: {e}")))?;
        Ok(())
    }

    /// Settings for the orchestration controller
    #[must_use]
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            system_prompt: self.chat.system_prompt.clone(),
            context_top_k: self.chat.context_top_k,
            require_context: self.chat.require_context,
            history_limit: self.chat.history_limit,
            max_input_length: self.chat.max_input_length,
            default_provider: self.chat.default_provider.clone(),
            default_model: self.chat.default_model.clone(),
            idle_timeout: self.provider.idle_timeout,
            ..ControllerConfig::default()
        }
    }

    /// Credentials for every configured provider
    #[must_use]
    pub fn credentials(&self) -> CredentialStore {
        let store = CredentialStore::new();
        let p = &self.provider;
        store.insert(
            ProviderKind::OpenAi,
            Credentials {
                api_key: p.openai_api_key.clone(),
                base_url: p.openai_base_url.clone(),
            },
        );
        if let Some(key) = &p.anthropic_api_key {
            store.insert(ProviderKind::Anthropic, Credentials::api_key(key.clone()));
        }
        store
    }
}

fn redacted(value: Option<&String>) -> Option<&'static str> {
    value.map(|_| "<redacted>")
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chatmux/conductor.toml` or
/// `~/.config/chatmux/conductor.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chatmux").join("conductor.toml"))
}

/// Load configuration from all sources with proper priority
///
/// Priority order (highest first):
/// 1. CLI arguments (not handled here - caller should apply after)
/// 2. Environment variables
/// 3. TOML configuration file
/// 4. Default values
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<ChatmuxConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ChatmuxConfig, ConfigError> {
    let mut config = load_file_config(path)?;
    apply_env_config_from(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Load defaults plus the TOML file, without looking at the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_file_config(path: Option<PathBuf>) -> Result<ChatmuxConfig, ConfigError> {
    let mut config = ChatmuxConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ChatmuxToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ChatmuxConfig, toml: &ChatmuxToml) {
    // Server settings
    if let Some(ref addr) = toml.server.bind_address {
        config.server.bind_address = addr.clone();
    }
    if let Some(size) = toml.server.max_message_size {
        config.server.max_message_size = size;
    }
    if let Some(buffer) = toml.server.event_buffer {
        config.server.event_buffer = buffer;
    }

    // Session settings
    if let Some(secs) = toml.session.inactivity_timeout_secs {
        config.session.inactivity_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.session.sweep_interval_secs {
        config.session.sweep_interval = Duration::from_secs(secs);
    }

    // Chat settings
    if let Some(ref prompt) = toml.chat.system_prompt {
        config.chat.system_prompt = prompt.clone();
    }
    if let Some(k) = toml.chat.context_top_k {
        config.chat.context_top_k = k;
    }
    if let Some(required) = toml.chat.require_context {
        config.chat.require_context = required;
    }
    if let Some(limit) = toml.chat.history_limit {
        config.chat.history_limit = limit;
    }
    if let Some(length) = toml.chat.max_input_length {
        config.chat.max_input_length = length;
    }
    if let Some(ref provider) = toml.chat.default_provider {
        config.chat.default_provider = provider.clone();
    }
    if let Some(ref model) = toml.chat.default_model {
        config.chat.default_model = model.clone();
    }

    // Provider settings
    if let Some(secs) = toml.provider.idle_timeout_secs {
        config.provider.idle_timeout = Duration::from_secs(secs);
    }
    if let Some(ref host) = toml.provider.ollama_host {
        config.provider.ollama_host = host.clone();
    }
    if let Some(port) = toml.provider.ollama_port {
        config.provider.ollama_port = port;
    }
    if toml.provider.openai_api_key.is_some() {
        config.provider.openai_api_key = toml.provider.openai_api_key.clone();
    }
    if toml.provider.openai_base_url.is_some() {
        config.provider.openai_base_url = toml.provider.openai_base_url.clone();
    }
    if toml.provider.anthropic_api_key.is_some() {
        config.provider.anthropic_api_key = toml.provider.anthropic_api_key.clone();
    }
    if toml.provider.local_base_url.is_some() {
        config.provider.local_base_url = toml.provider.local_base_url.clone();
    }
}

/// Apply environment overrides, reading variables through `lookup`
///
/// `lookup` returns the value of a variable, or `None` if it is unset.
/// Values that fail to parse are ignored.
pub fn apply_env_config_from<F>(config: &mut ChatmuxConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Server settings from environment
    if let Some(addr) = lookup("CHATMUX_BIND") {
        config.server.bind_address = addr;
        config.source = ConfigSource::Env;
    }

    // Session settings from environment
    if let Some(secs) = lookup("CHATMUX_SESSION_TIMEOUT") {
        if let Ok(s) = secs.parse::<u64>() {
            config.session.inactivity_timeout = Duration::from_secs(s);
            config.source = ConfigSource::Env;
        }
    }

    // Chat settings from environment
    if let Some(provider) = lookup("CHATMUX_DEFAULT_PROVIDER") {
        config.chat.default_provider = provider;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = lookup("CHATMUX_DEFAULT_MODEL") {
        config.chat.default_model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(length) = lookup("CHATMUX_MAX_INPUT_LENGTH") {
        if let Ok(l) = length.parse::<usize>() {
            config.chat.max_input_length = l;
            config.source = ConfigSource::Env;
        }
    }

    // Provider settings from environment
    if let Some(secs) = lookup("CHATMUX_IDLE_TIMEOUT") {
        if let Ok(s) = secs.parse::<u64>() {
            config.provider.idle_timeout = Duration::from_secs(s);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(host) = lookup("OLLAMA_HOST") {
        config.provider.ollama_host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = lookup("OLLAMA_PORT") {
        if let Ok(p) = port.parse::<u16>() {
            config.provider.ollama_port = p;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
        config.provider.openai_api_key = Some(key);
        config.source = ConfigSource::Env;
    }
    if let Some(key) = lookup("ANTHROPIC_API_KEY").filter(|k| !k.is_empty()) {
        config.provider.anthropic_api_key = Some(key);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Bind address override
    pub bind_address: Option<String>,

    /// Default provider override
    pub default_provider: Option<String>,

    /// Default model override
    pub default_model: Option<String>,

    /// Max message size override
    pub max_message_size: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bind address override
    #[must_use]
    pub fn with_bind_address(mut self, addr: String) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set default provider override
    #[must_use]
    pub fn with_default_provider(mut self, provider: String) -> Self {
        self.default_provider = Some(provider);
        self
    }

    /// Set default model override
    #[must_use]
    pub fn with_default_model(mut self, model: String) -> Self {
        self.default_model = Some(model);
        self
    }

    /// Set max message size override
    #[must_use]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ChatmuxConfig) {
        if self.bind_address.is_some()
            || self.default_provider.is_some()
            || self.default_model.is_some()
            || self.max_message_size.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref addr) = self.bind_address {
            config.server.bind_address = addr.clone();
        }

        if let Some(ref provider) = self.default_provider {
            config.chat.default_provider = provider.clone();
        }

        if let Some(ref model) = self.default_model {
            config.chat.default_model = model.clone();
        }

        if let Some(size) = self.max_message_size {
            config.server.max_message_size = size;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
