//! Command Dispatch
//!
//! Routes decoded client commands for one connection to the controller.
//! Each connection gets its own dispatcher and its own event channel.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::codec::{decode_command, DEFAULT_MAX_MESSAGE_SIZE};
use crate::controller::{Controller, JobOutcome};
use crate::events::ClientCommand;
use crate::messages::{ChatEvent, JobId, SessionId};

/// Per-connection command dispatcher
pub struct CommandDispatcher {
    controller: Arc<Controller>,
    events: mpsc::Sender<ChatEvent>,
    max_message_size: usize,
    /// Jobs this connection got admitted
    jobs: Mutex<HashSet<(SessionId, JobId)>>,
}

impl CommandDispatcher {
    /// Create a dispatcher that sends events to `events`
    pub fn new(controller: Arc<Controller>, events: mpsc::Sender<ChatEvent>) -> Self {
        Self {
            controller,
            events,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            jobs: Mutex::new(HashSet::new()),
        }
    }

    /// Set the inbound size limit
    #[must_use]
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Decode and dispatch one inbound text message
    ///
    /// A message that cannot be decoded is answered with a single `error`
    /// event; no job is started, so no terminal event follows.
    pub async fn handle_text(&self, text: &str) -> Option<JoinHandle<JobOutcome>> {
        match decode_command(text, self.max_message_size) {
            Ok(command) => self.dispatch(command),
            Err(e) => {
                tracing::debug!(error = %e, "Undecodable client message");
                if self.events.send(ChatEvent::error(e.to_string())).await.is_err() {
                    tracing::debug!("Client went away before error event");
                }
                None
            }
        }
    }

    /// Dispatch one command
    ///
    /// Returns the job handle for chat commands.
    pub fn dispatch(&self, command: ClientCommand) -> Option<JoinHandle<JobOutcome>> {
        match command {
            ClientCommand::Chat(request) => {
                let session_id = request.session_id.clone();
                let (admitted, handle) =
                    self.controller.spawn_admitted(request, self.events.clone());
                if let Some(job_id) = admitted {
                    let mut jobs = self.jobs.lock();
                    // Finished jobs can no longer be cancelled; drop them
                    let sessions = self.controller.sessions();
                    jobs.retain(|(sid, jid)| {
                        sessions.status(sid).and_then(|status| status.job_id) == Some(*jid)
                    });
                    jobs.insert((session_id, job_id));
                }
                Some(handle)
            }
            ClientCommand::Cancel { session_id } => {
                self.controller.cancel_chat(&session_id);
                None
            }
            ClientCommand::Heartbeat => {
                tracing::trace!("Heartbeat");
                None
            }
        }
    }

    /// Cancel every job this connection started
    ///
    /// Only jobs admitted for this connection are touched; a session that
    /// has since moved on to another client's job is left alone. Returns how
    /// many were still streaming.
    pub fn disconnect(&self) -> usize {
        let jobs: Vec<(SessionId, JobId)> = self.jobs.lock().drain().collect();
        jobs.iter()
            .filter(|(session_id, job_id)| self.controller.cancel_job(session_id, *job_id))
            .count()
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("max_message_size", &self.max_message_size)
            .field("jobs", &self.jobs.lock().len())
            .finish_non_exhaustive()
    }
}
