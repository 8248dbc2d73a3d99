//! Daemon Server Implementation
//!
//! The WebSocket accept loop for the chatmux daemon:
//! - Accepts TCP connections and upgrades them to WebSocket
//! - Spawns a handler task per connection with its own dispatcher
//! - Cancels a connection's jobs when it goes away
//! - Supports graceful shutdown
//!
//! # Connection Layout
//!
//! ```text
//!                     DaemonServer
//!                          │
//!          ┌───────────────┼───────────────┐
//!          │               │               │
//!       conn-1          conn-2          conn-3
//!    (dispatcher)    (dispatcher)    (dispatcher)
//!          │               │               │
//!          └───────────────┴───────────────┘
//!                          │
//!                      Controller
//!                  (shared sessions)
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn, Instrument};

use chatmux_core::config::ServerConfig;
use chatmux_core::transport::encode_event;
use chatmux_core::{ChatEvent, CommandDispatcher, Controller};

/// Maximum number of concurrent connections
const MAX_CONNECTIONS: usize = 100;

/// How long the accept loop waits before re-checking the shutdown flag
const ACCEPT_POLL: Duration = Duration::from_millis(100);

type ConnectionId = u64;

/// Connection state tracking
struct ConnectionState {
    /// When the connection was established
    connected_at: Instant,
    /// Remote peer address
    peer_addr: SocketAddr,
    /// Handle to abort the connection task
    abort_handle: tokio::task::AbortHandle,
}

/// The main daemon server
pub struct DaemonServer {
    controller: Arc<Controller>,
    config: ServerConfig,
    next_conn_id: AtomicU64,
    /// Active connection state (task handles, peer info)
    connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
}

impl DaemonServer {
    /// Create a new daemon server
    pub fn new(controller: Arc<Controller>, config: ServerConfig) -> Self {
        Self {
            controller,
            config,
            next_conn_id: AtomicU64::new(1),
            connection_states: Arc::new(DashMap::new()),
        }
    }

    /// Bind the configured address and serve until `shutdown` is set
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address)
            .await
            .with_context(|| format!("Failed to bind to {}", self.config.bind_address))?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener, shutdown: Arc<AtomicBool>) -> Result<()> {
        let local_addr = listener.local_addr().context("Listener has no local address")?;
        info!(addr = %local_addr, "Listening for WebSocket connections");

        loop {
            if shutdown.load(Ordering::SeqCst) {
                info!("Shutdown requested, stopping accept loop");
                break;
            }

            // Accept with timeout to allow checking shutdown flag
            let accept_result = tokio::time::timeout(ACCEPT_POLL, listener.accept()).await;
            let (stream, peer_addr) = match accept_result {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                    continue;
                }
                Err(_) => continue,
            };

            if self.connection_states.len() >= MAX_CONNECTIONS {
                warn!(peer = %peer_addr, "Connection limit reached, rejecting new connection");
                drop(stream);
                continue;
            }

            let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
            info!(
                conn_id,
                peer = %peer_addr,
                active_connections = self.connection_states.len() + 1,
                "New connection accepted"
            );

            let task_handle = tokio::spawn(
                Self::handle_connection(
                    conn_id,
                    stream,
                    Arc::clone(&self.controller),
                    self.config.clone(),
                    Arc::clone(&self.connection_states),
                )
                .instrument(tracing::info_span!("connection", conn_id)),
            );
            self.connection_states.insert(
                conn_id,
                ConnectionState {
                    connected_at: Instant::now(),
                    peer_addr,
                    abort_handle: task_handle.abort_handle(),
                },
            );
            // A handler that finished before the insert could not remove itself
            if task_handle.is_finished() {
                self.connection_states.remove(&conn_id);
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Handle a single client connection
    ///
    /// Inbound text frames go to this connection's dispatcher. Events come
    /// back over a channel drained by a writer task, one text frame each.
    async fn handle_connection(
        conn_id: ConnectionId,
        stream: TcpStream,
        controller: Arc<Controller>,
        config: ServerConfig,
        connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
    ) {
        let ws = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                warn!(error = %e, "WebSocket handshake failed");
                connection_states.remove(&conn_id);
                return;
            }
        };
        info!("Connection handler started");

        let (mut sink, mut source) = ws.split();
        let (event_tx, mut event_rx) = mpsc::channel::<ChatEvent>(config.event_buffer);
        let dispatcher = CommandDispatcher::new(controller, event_tx)
            .with_max_message_size(config.max_message_size);

        let writer = tokio::spawn(
            async move {
                while let Some(event) = event_rx.recv().await {
                    let text = match encode_event(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode event");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        debug!(error = %e, "Write error");
                        break;
                    }
                }
                if let Err(e) = sink.close().await {
                    debug!(error = %e, "Close error");
                }
            }
            .in_current_span(),
        );

        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    dispatcher.handle_text(&text).await;
                }
                Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        dispatcher.handle_text(text).await;
                    }
                    Err(e) => warn!(error = %e, "Ignoring non UTF-8 binary frame"),
                },
                Ok(Message::Close(_)) => {
                    info!("Client disconnected");
                    break;
                }
                // Ping replies are queued by tungstenite itself
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "Read error");
                    break;
                }
            }
        }

        let cancelled = dispatcher.disconnect();
        if cancelled > 0 {
            info!(cancelled, "Cancelled jobs of departed client");
        }
        // The writer ends once every job holding an event sender has finished
        drop(dispatcher);
        if let Err(e) = writer.await {
            debug!(error = %e, "Writer task ended abnormally");
        }

        connection_states.remove(&conn_id);
        info!(
            active_connections = connection_states.len(),
            "Connection handler finished"
        );
    }

    /// Graceful shutdown
    async fn shutdown(&self) {
        info!(
            active_connections = self.connection_count(),
            "Initiating graceful shutdown"
        );

        let conn_ids: Vec<ConnectionId> = self.connection_states.iter().map(|r| *r.key()).collect();
        for conn_id in conn_ids {
            if let Some((_, conn_state)) = self.connection_states.remove(&conn_id) {
                info!(
                    conn_id,
                    peer = %conn_state.peer_addr,
                    uptime_secs = conn_state.connected_at.elapsed().as_secs(),
                    "Aborting connection"
                );
                conn_state.abort_handle.abort();
            }
        }

        // Wait a bit for handlers to finish
        tokio::time::sleep(ACCEPT_POLL).await;
        info!("Shutdown complete");
    }

    /// Get number of active connections
    pub fn connection_count(&self) -> usize {
        self.connection_states.len()
    }
}
