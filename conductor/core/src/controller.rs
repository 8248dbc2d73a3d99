//! Orchestration Controller
//!
//! Runs one chat job from request to terminal event:
//!
//! ```text
//! SessionGate → ContextRetrieval → PromptAssembly → ProviderSelection
//!             → Streaming → Persistence → Finalize
//! ```
//!
//! # Design Philosophy
//!
//! The controller is the only place that emits terminal events. Each step
//! returns a `Result`; the first failure becomes a single `error` event and
//! the job jumps to finalize. Finalize releases the session and then sends
//! exactly one of `done` or `cancelled`.
//!
//! The session is held by a [`SessionGuard`], so it is released on every exit
//! path, including a panic or an aborted task.
//!
//! Cancellation is cooperative. The job checks its cancel token before each
//! step, and every await (context fetch, provider call, each stream read)
//! races against it. Once cancellation is seen, remaining provider output is
//! discarded.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::context::{ContextProvider, NoContext};
use crate::error::ChatError;
use crate::events::ChatRequest;
use crate::messages::{ChatEvent, JobId, MessageRole, SessionId};
use crate::prompt::{assemble_prompt, DEFAULT_SYSTEM_PROMPT};
use crate::provider::{
    CredentialStore, Credentials, ProviderAdapter, ProviderError, ProviderKind, ProviderRegistry,
    StreamOptions, UnknownProvider,
};
use crate::session::{SessionGuard, SessionRegistry, SessionStatus};
use crate::store::{ConversationStore, InMemoryConversationStore, StoredMessage};
use crate::validation::{InputLimits, InputValidator, ValidationResult};

// ============================================================================
// Configuration
// ============================================================================

/// Controller configuration
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// System prompt placed first in every prompt
    pub system_prompt: String,
    /// How many pieces of context to ask for
    pub context_top_k: usize,
    /// Fail the job when no context is found
    pub require_context: bool,
    /// How many stored turns to include in the prompt
    pub history_limit: usize,
    /// Maximum message length in characters
    pub max_input_length: usize,
    /// Provider used when the request names none
    pub default_provider: String,
    /// Model used when the request names none
    pub default_model: String,
    /// Longest allowed silence from a provider stream (zero disables)
    pub idle_timeout: Duration,
    /// Sampling temperature passed to providers
    pub temperature: Option<f32>,
    /// Token limit passed to providers
    pub max_tokens: Option<u32>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            context_top_k: 5,
            require_context: false,
            history_limit: 10,
            max_input_length: InputLimits::default().max_input_length,
            default_provider: ProviderKind::Ollama.as_str().to_string(),
            default_model: "llama3.2".to_string(),
            idle_timeout: Duration::from_secs(60),
            temperature: None,
            max_tokens: None,
        }
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// One request-to-terminal-event lifecycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Session the job runs on
    pub session_id: SessionId,
    /// The user's message
    pub message: String,
    /// Provider name
    pub provider: String,
    /// Model name
    pub model: String,
    /// Conversation the turns are saved into
    pub conversation_id: String,
    /// Authenticated user, if known
    pub user_id: Option<String>,
    /// Forward reasoning text to the client
    pub reasoning_mode: bool,
    /// Fetch retrieval context
    pub use_context: bool,
}

impl Job {
    /// Resolve a request against the configured defaults
    #[must_use]
    pub fn from_request(request: ChatRequest, config: &ControllerConfig) -> Self {
        let ChatRequest {
            session_id,
            message,
            model,
            provider,
            conversation_id,
            user_id,
            reasoning,
            use_context,
        } = request;
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        Self {
            id: JobId::new(),
            conversation_id: non_empty(conversation_id)
                .unwrap_or_else(|| session_id.as_str().to_string()),
            provider: non_empty(provider).unwrap_or_else(|| config.default_provider.clone()),
            model: non_empty(model).unwrap_or_else(|| config.default_model.clone()),
            session_id,
            message,
            user_id,
            reasoning_mode: reasoning,
            use_context,
        }
    }
}

/// How a job ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The provider stream ran to completion; `done` was sent
    Completed,
    /// A step failed; `error` then `done` were sent
    Failed,
    /// Cancellation was observed (or the client went away); `cancelled` was sent
    Cancelled,
    /// The request never claimed the session; `error` then `done` were sent
    Rejected,
}

/// A job that holds its session
#[derive(Debug)]
pub struct AdmittedJob {
    job: Job,
    guard: SessionGuard,
}

impl AdmittedJob {
    /// The admitted job
    #[must_use]
    pub fn job(&self) -> &Job {
        &self.job
    }
}

/// Result of the session gate
#[derive(Debug)]
pub enum Admission {
    /// The job claimed its session
    Admitted(AdmittedJob),
    /// The job was turned away
    Rejected {
        /// The rejected job
        job: Job,
        /// Why
        error: ChatError,
    },
}

/// Why the pipeline stopped early
enum Interrupt {
    Cancelled,
    Disconnected,
    Failed(ChatError),
}

impl From<ChatError> for Interrupt {
    fn from(error: ChatError) -> Self {
        Self::Failed(error)
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Drives chat jobs through the pipeline
pub struct Controller {
    sessions: Arc<SessionRegistry>,
    providers: Arc<ProviderRegistry>,
    credentials: Arc<CredentialStore>,
    context: Arc<dyn ContextProvider>,
    store: Arc<dyn ConversationStore>,
    validator: InputValidator,
    config: ControllerConfig,
}

impl Controller {
    /// Create a controller with no context provider and an in-memory store
    pub fn new(
        sessions: Arc<SessionRegistry>,
        providers: Arc<ProviderRegistry>,
        config: ControllerConfig,
    ) -> Self {
        let validator = InputValidator::new(InputLimits {
            max_input_length: config.max_input_length,
        });
        Self {
            sessions,
            providers,
            credentials: Arc::new(CredentialStore::new()),
            context: Arc::new(NoContext),
            store: Arc::new(InMemoryConversationStore::new()),
            validator,
            config,
        }
    }

    /// Use these provider credentials
    #[must_use]
    pub fn with_credentials(mut self, credentials: Arc<CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Use this context provider
    #[must_use]
    pub fn with_context_provider(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = context;
        self
    }

    /// Use this conversation store
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = store;
        self
    }

    /// The session registry
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// The configuration
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Status of a session, if it exists
    #[must_use]
    pub fn get_session_status(&self, session_id: &SessionId) -> Option<SessionStatus> {
        self.sessions.status(session_id)
    }

    /// Request cancellation of the session's active job
    ///
    /// Returns `false` if nothing was streaming.
    pub fn cancel_chat(&self, session_id: &SessionId) -> bool {
        let cancelled = self.sessions.cancel(session_id);
        if cancelled {
            tracing::info!(session_id = %session_id, "Cancellation requested");
        } else {
            tracing::debug!(session_id = %session_id, "Cancel ignored; session not streaming");
        }
        cancelled
    }

    /// Request cancellation of one specific job
    ///
    /// Does nothing if the session has since moved on to another job.
    pub fn cancel_job(&self, session_id: &SessionId, job_id: JobId) -> bool {
        let cancelled = self.sessions.cancel_job(session_id, job_id);
        if cancelled {
            tracing::info!(session_id = %session_id, job_id = %job_id, "Cancellation requested");
        }
        cancelled
    }

    /// Validate the request and try to claim its session
    pub fn admit(&self, request: ChatRequest) -> Admission {
        let job = Job::from_request(request, &self.config);

        if job.session_id.as_str().trim().is_empty() {
            let error = ChatError::InvalidInput("Missing session id".to_string());
            return Admission::Rejected { job, error };
        }
        if let ValidationResult::Invalid(reason) = self.validator.validate_message(&job.message) {
            return Admission::Rejected {
                job,
                error: ChatError::InvalidInput(reason),
            };
        }

        match self.sessions.begin(&job.session_id, job.id) {
            Some(guard) => Admission::Admitted(AdmittedJob { job, guard }),
            None => Admission::Rejected {
                job,
                error: ChatError::SessionBusy,
            },
        }
    }

    /// Run a request to completion, sending its events to `events`
    pub async fn process(
        &self,
        request: ChatRequest,
        events: &mpsc::Sender<ChatEvent>,
    ) -> JobOutcome {
        match self.admit(request) {
            Admission::Admitted(admitted) => self.execute(admitted, events).await,
            Admission::Rejected { job, error } => Self::reject(&job, error, events).await,
        }
    }

    /// Run a request on its own task
    ///
    /// The session is claimed before this returns, so a second request for
    /// the same session is rejected even if the first task has not started.
    pub fn spawn(
        self: &Arc<Self>,
        request: ChatRequest,
        events: mpsc::Sender<ChatEvent>,
    ) -> JoinHandle<JobOutcome> {
        self.spawn_admitted(request, events).1
    }

    /// Like [`spawn`](Self::spawn), also reporting the job id when admitted
    ///
    /// The id is `None` when the request was rejected, in which case the
    /// task only delivers the error and `Done` events.
    pub fn spawn_admitted(
        self: &Arc<Self>,
        request: ChatRequest,
        events: mpsc::Sender<ChatEvent>,
    ) -> (Option<JobId>, JoinHandle<JobOutcome>) {
        match self.admit(request) {
            Admission::Admitted(admitted) => {
                let session_id = admitted.job.session_id.clone();
                let job_id = admitted.job.id;
                let controller = Arc::clone(self);
                let handle =
                    tokio::spawn(async move { controller.execute(admitted, &events).await });
                self.sessions.register_task(&session_id, handle.abort_handle());
                (Some(job_id), handle)
            }
            Admission::Rejected { job, error } => (
                None,
                tokio::spawn(async move { Self::reject(&job, error, &events).await }),
            ),
        }
    }

    /// Run a request on its own task and hand back its events as a stream
    ///
    /// The stream ends after the terminal event. For in-process callers that
    /// have no transport of their own.
    pub fn stream(self: &Arc<Self>, request: ChatRequest, buffer: usize) -> ReceiverStream<ChatEvent> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        // The task runs detached; its outcome is visible in the events
        drop(self.spawn(request, tx));
        ReceiverStream::new(rx)
    }

    /// Run an admitted job and finalize it
    pub async fn execute(
        &self,
        admitted: AdmittedJob,
        events: &mpsc::Sender<ChatEvent>,
    ) -> JobOutcome {
        let AdmittedJob { job, guard } = admitted;
        let span = tracing::info_span!(
            "job",
            session_id = %job.session_id,
            job_id = %job.id,
            provider = %job.provider,
            model = %job.model,
        );

        async move {
            tracing::debug!("Job started");
            let token = guard.token().clone();

            let outcome = match self.run(&job, &token, events).await {
                Ok(()) => JobOutcome::Completed,
                Err(Interrupt::Cancelled) => {
                    tracing::info!("Job cancelled");
                    JobOutcome::Cancelled
                }
                Err(Interrupt::Disconnected) => {
                    tracing::info!("Client went away; abandoning job");
                    JobOutcome::Cancelled
                }
                Err(Interrupt::Failed(error)) => {
                    tracing::warn!(error = %error, kind = error.kind(), "Job failed");
                    if events.send(ChatEvent::error(error.to_string())).await.is_err() {
                        tracing::debug!("Client went away before error event");
                    }
                    JobOutcome::Failed
                }
            };

            // Finalize: free the session before the client can react to the
            // terminal event with a new request
            guard.release();
            let terminal = match outcome {
                JobOutcome::Cancelled => ChatEvent::Cancelled,
                _ => ChatEvent::Done,
            };
            if events.send(terminal).await.is_err() {
                tracing::debug!("Client went away before terminal event");
            }
            tracing::debug!(outcome = ?outcome, "Job finished");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn reject(job: &Job, error: ChatError, events: &mpsc::Sender<ChatEvent>) -> JobOutcome {
        tracing::info!(
            session_id = %job.session_id,
            job_id = %job.id,
            reason = %error,
            "Rejected chat request"
        );
        if events.send(ChatEvent::error(error.to_string())).await.is_ok()
            && events.send(ChatEvent::Done).await.is_err()
        {
            tracing::debug!("Client went away before terminal event");
        }
        JobOutcome::Rejected
    }

    async fn run(
        &self,
        job: &Job,
        token: &CancellationToken,
        events: &mpsc::Sender<ChatEvent>,
    ) -> Result<(), Interrupt> {
        checkpoint(token)?;

        // Context retrieval
        let context = if job.use_context {
            let fetch =
                self.context
                    .retrieve_context(&job.message, &job.session_id, self.config.context_top_k);
            let context = tokio::select! {
                biased;
                () = token.cancelled() => return Err(Interrupt::Cancelled),
                result = fetch => result.map_err(ChatError::from)?,
            };
            if self.config.require_context && context.trim().is_empty() {
                return Err(ChatError::ContextMissing.into());
            }
            context
        } else {
            String::new()
        };
        checkpoint(token)?;

        // Prompt assembly
        let history = self.load_history(job).await;
        let messages = assemble_prompt(&self.config.system_prompt, &context, &history, &job.message);

        // Provider selection
        let (adapter, credentials) = self.select_provider(&job.provider)?;
        checkpoint(token)?;

        let options = StreamOptions {
            reasoning_mode: job.reasoning_mode,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            idle_timeout: self.config.idle_timeout,
        };
        let start = adapter.stream_chat(&job.model, &messages, &credentials, &options);
        let mut stream = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Interrupt::Cancelled),
            result = start => result.map_err(|e| match e {
                ProviderError::MissingCredentials(_) => {
                    ChatError::provider_unavailable(&job.provider, "missing credentials")
                }
                other => ChatError::from(other),
            })?,
        };

        // Streaming
        let mut answer = String::new();
        let mut reasoning = String::new();
        loop {
            checkpoint(token)?;
            let item = tokio::select! {
                biased;
                () = token.cancelled() => return Err(Interrupt::Cancelled),
                item = stream.next() => item,
            };
            let Some(item) = item else { break };
            self.sessions.touch(&job.session_id);

            match item.map_err(ChatError::from)? {
                ChatEvent::Typing => forward(events, ChatEvent::Typing).await?,
                ChatEvent::Token { content } => {
                    answer.push_str(&content);
                    forward(events, ChatEvent::Token { content }).await?;
                }
                ChatEvent::Reasoning { content } if job.reasoning_mode => {
                    reasoning.push_str(&content);
                    forward(events, ChatEvent::Reasoning { content }).await?;
                }
                ChatEvent::Reasoning { content } => {
                    tracing::debug!(len = content.len(), "Dropping reasoning text");
                }
                ChatEvent::Error { message } => {
                    return Err(ChatError::from(ProviderError::Reported(message)).into());
                }
                terminal @ (ChatEvent::Done | ChatEvent::Cancelled) => {
                    tracing::warn!(event = ?terminal, "Ignoring terminal event from adapter");
                }
            }
        }
        drop(stream);

        // Persistence
        if !answer.is_empty() {
            self.persist(job, &answer, &reasoning).await;
        }
        Ok(())
    }

    async fn load_history(&self, job: &Job) -> Vec<StoredMessage> {
        if self.config.history_limit == 0 {
            return Vec::new();
        }
        match self
            .store
            .load_history(&job.conversation_id, self.config.history_limit)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load history; continuing without it");
                Vec::new()
            }
        }
    }

    fn select_provider(
        &self,
        name: &str,
    ) -> Result<(Arc<dyn ProviderAdapter>, Credentials), ChatError> {
        let kind: ProviderKind = name
            .parse()
            .map_err(|e: UnknownProvider| ChatError::provider_unavailable(name, e.to_string()))?;
        let adapter = self
            .providers
            .get(kind)
            .ok_or_else(|| ChatError::provider_unavailable(name, "no adapter registered"))?;
        let credentials = self.credentials.get(kind);
        if adapter.requires_credentials() && !credentials.has_api_key() {
            return Err(ChatError::provider_unavailable(name, "missing credentials"));
        }
        Ok((adapter, credentials))
    }

    async fn persist(&self, job: &Job, answer: &str, reasoning: &str) {
        let user_id = job.user_id.as_deref();
        let saved = self
            .store
            .save_message(&job.conversation_id, user_id, MessageRole::User, &job.message, None)
            .await;
        if let Err(e) = saved {
            let error = ChatError::from(e);
            tracing::warn!(error = %error, "Conversation not saved");
            return;
        }

        let mut metadata = serde_json::json!({
            "provider": job.provider,
            "model": job.model,
            "jobId": job.id.to_string(),
        });
        if !reasoning.is_empty() {
            metadata["reasoning"] = serde_json::Value::String(reasoning.to_string());
        }
        let saved = self
            .store
            .save_message(
                &job.conversation_id,
                user_id,
                MessageRole::Assistant,
                answer,
                Some(metadata),
            )
            .await;
        if let Err(e) = saved {
            let error = ChatError::from(e);
            tracing::warn!(error = %error, "Assistant answer not saved");
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("sessions", &self.sessions.len())
            .field("providers", &self.providers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn checkpoint(token: &CancellationToken) -> Result<(), Interrupt> {
    if token.is_cancelled() {
        Err(Interrupt::Cancelled)
    } else {
        Ok(())
    }
}

async fn forward(events: &mpsc::Sender<ChatEvent>, event: ChatEvent) -> Result<(), Interrupt> {
    events.send(event).await.map_err(|_| Interrupt::Disconnected)
}
