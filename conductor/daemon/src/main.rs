//! Chatmux Daemon
//!
//! Serves the chatmux streaming chat protocol over WebSocket. One JSON text
//! frame per command or event.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the configured address (default 127.0.0.1:8765)
//! chatmux-daemon
//!
//! # Custom bind address and default model
//! chatmux-daemon --bind 0.0.0.0:9000 --default-model llama3.2
//!
//! # With a config file
//! chatmux-daemon --config /path/to/conductor.toml
//! ```
//!
//! # Signals
//!
//! - SIGTERM, SIGINT: graceful shutdown (in-flight jobs are aborted)

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chatmux_core::provider::LOCAL_BASE_URL;
use chatmux_core::{
    default_config_path, load_config_from_path, AnthropicAdapter, ChatmuxConfig, ConfigOverrides,
    Controller, InMemoryConversationStore, NoContext, OllamaAdapter, OpenAiAdapter, ProviderKind,
    ProviderRegistry, SessionRegistry, DEFAULT_MAX_CONVERSATIONS,
};

mod server;

use server::DaemonServer;

/// Chatmux daemon - cancellable streaming chat over WebSocket
#[derive(Parser, Debug)]
#[command(name = "chatmux-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on (host:port)
    #[arg(short = 'b', long, value_name = "ADDR")]
    bind: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "CHATMUX_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Provider used when a request names none
    #[arg(long, value_name = "PROVIDER")]
    default_provider: Option<String>,

    /// Model used when a request names none
    #[arg(long, value_name = "MODEL")]
    default_model: Option<String>,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(bind) = &self.bind {
            overrides = overrides.with_bind_address(bind.clone());
        }
        if let Some(provider) = &self.default_provider {
            overrides = overrides.with_default_provider(provider.clone());
        }
        if let Some(model) = &self.default_model {
            overrides = overrides.with_default_model(model.clone());
        }
        overrides
    }
}

/// Initialize logging
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("chatmux_daemon={level},chatmux_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Load, override and validate configuration
fn resolve_config(args: &Args) -> Result<ChatmuxConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// One adapter per provider kind, pointed at the configured endpoints
fn build_providers(config: &ChatmuxConfig) -> ProviderRegistry {
    let p = &config.provider;
    let local_url = p.local_base_url.as_deref().unwrap_or(LOCAL_BASE_URL);
    ProviderRegistry::new()
        .with(
            ProviderKind::Ollama,
            Arc::new(OllamaAdapter::new(p.ollama_host.clone(), p.ollama_port)),
        )
        .with(ProviderKind::OpenAi, Arc::new(OpenAiAdapter::hosted()))
        .with(ProviderKind::Anthropic, Arc::new(AnthropicAdapter::default()))
        .with(ProviderKind::Local, Arc::new(OpenAiAdapter::local(local_url)))
}

fn build_controller(config: &ChatmuxConfig, sessions: Arc<SessionRegistry>) -> Controller {
    Controller::new(
        sessions,
        Arc::new(build_providers(config)),
        config.controller_config(),
    )
    .with_credentials(Arc::new(config.credentials()))
    .with_context_provider(Arc::new(NoContext))
    .with_store(Arc::new(
        InMemoryConversationStore::new().with_max_conversations(DEFAULT_MAX_CONVERSATIONS),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Chatmux daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = resolve_config(&args)?;
    info!(
        source = %config.source(),
        bind = %config.server.bind_address,
        default_provider = %config.chat.default_provider,
        default_model = %config.chat.default_model,
        "Configuration loaded"
    );

    let sessions = Arc::new(SessionRegistry::new());
    let sweeper = sessions.spawn_sweeper(
        config.session.sweep_interval,
        config.session.inactivity_timeout,
    );
    let controller = Arc::new(build_controller(&config, Arc::clone(&sessions)));

    let shutdown = Arc::new(AtomicBool::new(false));

    let shutdown_clone = Arc::clone(&shutdown);
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
        }
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    let server = DaemonServer::new(Arc::clone(&controller), config.server.clone());
    let result = server.run(shutdown).await;

    info!("Shutting down...");
    sweeper.abort();
    let aborted = sessions.abort_all();
    if aborted > 0 {
        info!(aborted, "Aborted in-flight jobs");
    }

    match result {
        Ok(()) => {
            info!("Chatmux daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
