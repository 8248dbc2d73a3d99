//! Integration tests for the orchestration controller
//!
//! These drive whole jobs through the controller with scripted provider
//! adapters and check what the client sees:
//! - Event order and the single terminal event
//! - Single-flight sessions and cancellation
//! - Provider selection and credential failures
//! - Context requirements and persistence

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

use chatmux_core::{
    ChatEvent, ChatMessage, ChatRequest, CommandDispatcher, ContextError, ContextProvider,
    Controller, ControllerConfig, CredentialStore, Credentials, EventStream,
    InMemoryConversationStore, JobOutcome, MessageRole, ProviderAdapter, ProviderError,
    ProviderKind, ProviderRegistry, SessionId, SessionRegistry, StaticContext, StreamOptions,
};

// =============================================================================
// Test Adapters
// =============================================================================

/// Replays a fixed script, then either ends or hangs
struct ScriptedAdapter {
    script: Vec<Result<ChatEvent, ProviderError>>,
    hang: bool,
    stall: bool,
    requires_key: bool,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedAdapter {
    fn new(script: Vec<Result<ChatEvent, ProviderError>>) -> Self {
        Self {
            script,
            hang: false,
            stall: false,
            requires_key: false,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn answering(tokens: &[&str]) -> Self {
        let mut script = vec![Ok(ChatEvent::Typing)];
        script.extend(tokens.iter().map(|t| Ok(ChatEvent::token(*t))));
        Self::new(script)
    }

    /// Emits typing and one token, then never finishes
    fn hanging() -> Self {
        let mut adapter = Self::answering(&["a"]);
        adapter.hang = true;
        adapter
    }

    /// Never returns from `stream_chat`
    fn stalled() -> Self {
        let mut adapter = Self::answering(&["a"]);
        adapter.stall = true;
        adapter
    }

    fn requiring_key(mut self) -> Self {
        self.requires_key = true;
        self
    }

    fn last_prompt(&self) -> Vec<ChatMessage> {
        self.prompts.lock().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn requires_credentials(&self) -> bool {
        self.requires_key
    }

    async fn stream_chat(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _credentials: &Credentials,
        _options: &StreamOptions,
    ) -> Result<EventStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(messages.to_vec());
        if self.stall {
            std::future::pending::<()>().await;
        }
        let script = stream::iter(self.script.clone());
        let events: EventStream = if self.hang {
            Box::pin(script.chain(stream::pending()))
        } else {
            Box::pin(script)
        };
        Ok(events)
    }
}

/// Context lookup that never completes
#[derive(Default)]
struct StuckContext {
    entered: AtomicUsize,
}

#[async_trait]
impl ContextProvider for StuckContext {
    async fn retrieve_context(
        &self,
        _query: &str,
        _session_id: &SessionId,
        _top_k: usize,
    ) -> Result<String, ContextError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn controller_with(adapter: Arc<ScriptedAdapter>) -> Arc<Controller> {
    controller_with_config(adapter, ControllerConfig::default())
}

fn controller_with_config(
    adapter: Arc<ScriptedAdapter>,
    config: ControllerConfig,
) -> Arc<Controller> {
    let providers = ProviderRegistry::new().with(ProviderKind::Ollama, adapter);
    Arc::new(Controller::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(providers),
        config,
    ))
}

/// Run one request to completion and collect every event it produced
async fn run(controller: &Controller, request: ChatRequest) -> (JobOutcome, Vec<ChatEvent>) {
    let (tx, mut rx) = mpsc::channel(64);
    let outcome = controller.process(request, &tx).await;
    drop(tx);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (outcome, events)
}

/// Wait until the first token arrives
async fn until_token(rx: &mut mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut seen = Vec::new();
    while let Some(event) = rx.recv().await {
        let is_token = matches!(event, ChatEvent::Token { .. });
        seen.push(event);
        if is_token {
            break;
        }
    }
    seen
}

async fn drain(mut rx: mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// Yield until `counter` has been bumped at least once
async fn until_entered(counter: &AtomicUsize) {
    for _ in 0..500 {
        if counter.load(Ordering::SeqCst) > 0 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    panic!("job never reached the awaited call");
}

fn terminal_count(events: &[ChatEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

// =============================================================================
// Event Order
// =============================================================================

#[tokio::test]
async fn test_tokens_stream_then_done() {
    let controller = controller_with(Arc::new(ScriptedAdapter::answering(&["Hel", "lo"])));
    let (outcome, events) = run(&controller, ChatRequest::new("s1", "hi")).await;

    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(
        events,
        vec![
            ChatEvent::Typing,
            ChatEvent::token("Hel"),
            ChatEvent::token("lo"),
            ChatEvent::Done,
        ]
    );
    let status = controller.get_session_status(&SessionId::from("s1")).unwrap();
    assert!(!status.streaming);
    assert!(status.job_id.is_none());
}

#[tokio::test]
async fn test_mid_stream_error_then_done() {
    let adapter = ScriptedAdapter::new(vec![
        Ok(ChatEvent::Typing),
        Ok(ChatEvent::token("a")),
        Ok(ChatEvent::token("b")),
        Err(ProviderError::Reported("x".to_string())),
        Ok(ChatEvent::token("never")),
    ]);
    let controller = controller_with(Arc::new(adapter));
    let (outcome, events) = run(&controller, ChatRequest::new("s1", "hi")).await;

    assert_eq!(outcome, JobOutcome::Failed);
    assert_eq!(
        events,
        vec![
            ChatEvent::Typing,
            ChatEvent::token("a"),
            ChatEvent::token("b"),
            ChatEvent::error("x"),
            ChatEvent::Done,
        ]
    );
    assert!(!controller.sessions().is_streaming(&SessionId::from("s1")));
}

#[tokio::test]
async fn test_reasoning_forwarded_only_when_requested() {
    let script = vec![
        Ok(ChatEvent::Typing),
        Ok(ChatEvent::reasoning("hmm")),
        Ok(ChatEvent::token("42")),
    ];
    let controller = controller_with(Arc::new(ScriptedAdapter::new(script)));

    let (_, plain) = run(&controller, ChatRequest::new("s1", "q")).await;
    assert_eq!(
        plain,
        vec![ChatEvent::Typing, ChatEvent::token("42"), ChatEvent::Done]
    );

    let (_, reasoned) = run(&controller, ChatRequest::new("s1", "q").with_reasoning(true)).await;
    assert_eq!(
        reasoned,
        vec![
            ChatEvent::Typing,
            ChatEvent::reasoning("hmm"),
            ChatEvent::token("42"),
            ChatEvent::Done,
        ]
    );
}

#[tokio::test]
async fn test_stream_helper_ends_after_terminal() {
    let controller = controller_with(Arc::new(ScriptedAdapter::answering(&["ok"])));
    let events: Vec<ChatEvent> = controller
        .stream(ChatRequest::new("s1", "hi"), 4)
        .collect()
        .await;
    assert_eq!(events.last(), Some(&ChatEvent::Done));
    assert_eq!(terminal_count(&events), 1);
}

// =============================================================================
// Sessions and Cancellation
// =============================================================================

#[tokio::test]
async fn test_second_request_rejected_while_streaming() {
    let controller = controller_with(Arc::new(ScriptedAdapter::hanging()));
    let (tx, mut rx) = mpsc::channel(64);
    let first = controller.spawn(ChatRequest::new("s1", "one"), tx);
    until_token(&mut rx).await;

    let (outcome, events) = run(&controller, ChatRequest::new("s1", "two")).await;
    assert_eq!(outcome, JobOutcome::Rejected);
    assert_eq!(
        events,
        vec![ChatEvent::error("Session already streaming"), ChatEvent::Done]
    );

    // Another session is unaffected
    let (other_tx, mut other_rx) = mpsc::channel(64);
    let other = controller.spawn(ChatRequest::new("s2", "hi"), other_tx);
    until_token(&mut other_rx).await;

    assert!(controller.cancel_chat(&SessionId::from("s1")));
    assert!(controller.cancel_chat(&SessionId::from("s2")));
    assert_eq!(first.await.unwrap(), JobOutcome::Cancelled);
    assert_eq!(other.await.unwrap(), JobOutcome::Cancelled);
}

#[tokio::test]
async fn test_cancel_sends_cancelled_and_frees_session() {
    let adapter = Arc::new(ScriptedAdapter::hanging());
    let controller = controller_with(Arc::clone(&adapter));
    let (tx, mut rx) = mpsc::channel(64);
    let job = controller.spawn(ChatRequest::new("s1", "one"), tx);

    let mut events = until_token(&mut rx).await;
    assert!(controller.sessions().is_streaming(&SessionId::from("s1")));
    assert!(controller.cancel_chat(&SessionId::from("s1")));
    assert_eq!(job.await.unwrap(), JobOutcome::Cancelled);
    events.extend(drain(rx).await);

    assert_eq!(
        events,
        vec![ChatEvent::Typing, ChatEvent::token("a"), ChatEvent::Cancelled]
    );
    assert!(!controller.sessions().is_streaming(&SessionId::from("s1")));

    // The session accepts a new job straight away
    let (tx, mut rx) = mpsc::channel(64);
    let again = controller.spawn(ChatRequest::new("s1", "two"), tx);
    until_token(&mut rx).await;
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
    controller.cancel_chat(&SessionId::from("s1"));
    assert_eq!(again.await.unwrap(), JobOutcome::Cancelled);
}

#[tokio::test]
async fn test_cancelled_job_is_not_persisted() {
    let store = Arc::new(InMemoryConversationStore::new());
    let providers = ProviderRegistry::new()
        .with(ProviderKind::Ollama, Arc::new(ScriptedAdapter::hanging()));
    let controller = Arc::new(
        Controller::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(providers),
            ControllerConfig::default(),
        )
        .with_store(Arc::clone(&store) as _),
    );

    let (tx, mut rx) = mpsc::channel(64);
    let job = controller.spawn(ChatRequest::new("s1", "one"), tx);
    until_token(&mut rx).await;
    controller.cancel_chat(&SessionId::from("s1"));
    assert_eq!(job.await.unwrap(), JobOutcome::Cancelled);
    assert!(store.messages("s1").is_empty());
}

#[tokio::test]
async fn test_abort_all_releases_sessions() {
    let controller = controller_with(Arc::new(ScriptedAdapter::hanging()));
    let (tx, mut rx) = mpsc::channel(64);
    let job = controller.spawn(ChatRequest::new("s1", "one"), tx);
    until_token(&mut rx).await;

    assert_eq!(controller.sessions().abort_all(), 1);
    assert!(job.await.unwrap_err().is_cancelled());
    assert!(!controller.sessions().is_streaming(&SessionId::from("s1")));
}

#[tokio::test]
async fn test_dispatcher_disconnect_cancels_its_jobs() {
    let controller = controller_with(Arc::new(ScriptedAdapter::hanging()));
    let (tx, mut rx) = mpsc::channel(64);
    let dispatcher = CommandDispatcher::new(Arc::clone(&controller), tx);

    let job = dispatcher
        .handle_text(r#"{"type":"chat","sessionId":"conn-a","message":"hi"}"#)
        .await
        .unwrap();
    until_token(&mut rx).await;

    assert_eq!(dispatcher.disconnect(), 1);
    assert_eq!(job.await.unwrap(), JobOutcome::Cancelled);
    assert!(!controller.sessions().is_streaming(&SessionId::from("conn-a")));
}

#[tokio::test]
async fn test_disconnect_spares_other_connections_job() {
    let controller = controller_with(Arc::new(ScriptedAdapter::hanging()));
    let (tx_b, mut rx_b) = mpsc::channel(64);
    let owner = CommandDispatcher::new(Arc::clone(&controller), tx_b);
    let (tx_a, mut rx_a) = mpsc::channel(64);
    let intruder = CommandDispatcher::new(Arc::clone(&controller), tx_a);

    let job = owner
        .handle_text(r#"{"type":"chat","sessionId":"shared","message":"hi"}"#)
        .await
        .unwrap();
    until_token(&mut rx_b).await;

    let rejected = intruder
        .handle_text(r#"{"type":"chat","sessionId":"shared","message":"me too"}"#)
        .await
        .unwrap();
    assert_eq!(rejected.await.unwrap(), JobOutcome::Rejected);
    assert_eq!(
        rx_a.recv().await,
        Some(ChatEvent::error("Session already streaming"))
    );

    assert_eq!(intruder.disconnect(), 0);
    assert!(controller.sessions().is_streaming(&SessionId::from("shared")));
    assert!(!job.is_finished());

    assert_eq!(owner.disconnect(), 1);
    assert_eq!(job.await.unwrap(), JobOutcome::Cancelled);
}

#[tokio::test]
async fn test_cancel_while_context_lookup_hangs() {
    let context = Arc::new(StuckContext::default());
    let adapter = Arc::new(ScriptedAdapter::answering(&["x"]));
    let providers = ProviderRegistry::new().with(ProviderKind::Ollama, Arc::clone(&adapter) as _);
    let controller = Arc::new(
        Controller::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(providers),
            ControllerConfig::default(),
        )
        .with_context_provider(Arc::clone(&context) as _),
    );

    let (tx, rx) = mpsc::channel(64);
    let job = controller.spawn(ChatRequest::new("s1", "hi"), tx);
    until_entered(&context.entered).await;
    assert!(controller.cancel_chat(&SessionId::from("s1")));

    assert_eq!(job.await.unwrap(), JobOutcome::Cancelled);
    assert_eq!(drain(rx).await, vec![ChatEvent::Cancelled]);
    assert!(!controller.sessions().is_streaming(&SessionId::from("s1")));
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_while_provider_call_hangs() {
    let adapter = Arc::new(ScriptedAdapter::stalled());
    let controller = controller_with(Arc::clone(&adapter));

    let (tx, rx) = mpsc::channel(64);
    let job = controller.spawn(ChatRequest::new("s1", "hi"), tx);
    until_entered(&adapter.calls).await;
    assert!(controller.cancel_chat(&SessionId::from("s1")));

    assert_eq!(job.await.unwrap(), JobOutcome::Cancelled);
    assert_eq!(drain(rx).await, vec![ChatEvent::Cancelled]);
    assert!(!controller.sessions().is_streaming(&SessionId::from("s1")));
}

#[tokio::test]
async fn test_cancel_command_over_dispatcher() {
    let controller = controller_with(Arc::new(ScriptedAdapter::hanging()));
    let (tx, mut rx) = mpsc::channel(64);
    let dispatcher = CommandDispatcher::new(Arc::clone(&controller), tx);

    let job = dispatcher
        .handle_text(r#"{"type":"chat","sessionId":"s1","message":"hi"}"#)
        .await
        .unwrap();
    until_token(&mut rx).await;
    assert!(dispatcher
        .handle_text(r#"{"type":"cancel","sessionId":"s1"}"#)
        .await
        .is_none());

    assert_eq!(job.await.unwrap(), JobOutcome::Cancelled);
    assert_eq!(rx.recv().await, Some(ChatEvent::Cancelled));
}

#[tokio::test]
async fn test_exactly_one_terminal_event_per_job() {
    let script = vec![
        Ok(ChatEvent::Typing),
        Ok(ChatEvent::token("a")),
        // Adapters must not send terminals; the controller ignores them
        Ok(ChatEvent::Done),
        Ok(ChatEvent::token("b")),
    ];
    let controller = controller_with(Arc::new(ScriptedAdapter::new(script)));
    let (outcome, events) = run(&controller, ChatRequest::new("s1", "hi")).await;

    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(events.last(), Some(&ChatEvent::Done));
}

// =============================================================================
// Validation and Providers
// =============================================================================

#[tokio::test]
async fn test_empty_message_rejected() {
    let adapter = Arc::new(ScriptedAdapter::answering(&["x"]));
    let controller = controller_with(Arc::clone(&adapter));
    let (outcome, events) = run(&controller, ChatRequest::new("s1", "  \n ")).await;

    assert_eq!(outcome, JobOutcome::Rejected);
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], ChatEvent::Error { .. }));
    assert_eq!(events[1], ChatEvent::Done);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_provider_is_unavailable() {
    let controller = controller_with(Arc::new(ScriptedAdapter::answering(&["x"])));
    let request = ChatRequest::new("s1", "hi").with_provider("anthropic");
    let (outcome, events) = run(&controller, request).await;

    assert_eq!(outcome, JobOutcome::Failed);
    assert_eq!(
        events,
        vec![
            ChatEvent::error("Provider 'anthropic' unavailable: no adapter registered"),
            ChatEvent::Done,
        ]
    );
}

#[tokio::test]
async fn test_missing_credentials_then_configured() {
    let adapter = Arc::new(ScriptedAdapter::answering(&["hi"]).requiring_key());
    let providers = ProviderRegistry::new().with(ProviderKind::OpenAi, Arc::clone(&adapter) as _);
    let credentials = Arc::new(CredentialStore::new());
    let controller = Controller::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(providers),
        ControllerConfig::default(),
    )
    .with_credentials(Arc::clone(&credentials));

    let request = || ChatRequest::new("s1", "hello").with_provider("openai");
    let (outcome, events) = run(&controller, request()).await;
    assert_eq!(outcome, JobOutcome::Failed);
    assert_eq!(
        events[0],
        ChatEvent::error("Provider 'openai' unavailable: missing credentials")
    );
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);

    credentials.insert(ProviderKind::OpenAi, Credentials::api_key("sk-test"));
    let (outcome, _) = run(&controller, request()).await;
    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_default_provider_from_config() {
    let adapter = Arc::new(ScriptedAdapter::answering(&["hi"]));
    let providers = ProviderRegistry::new().with(ProviderKind::Local, Arc::clone(&adapter) as _);
    let config = ControllerConfig {
        default_provider: "local".to_string(),
        ..ControllerConfig::default()
    };
    let controller = Controller::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(providers),
        config,
    );

    let (outcome, _) = run(&controller, ChatRequest::new("s1", "hi")).await;
    assert_eq!(outcome, JobOutcome::Completed);
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Context and Persistence
// =============================================================================

#[tokio::test]
async fn test_required_context_missing_fails() {
    let adapter = Arc::new(ScriptedAdapter::answering(&["x"]));
    let config = ControllerConfig {
        require_context: true,
        ..ControllerConfig::default()
    };
    let controller = controller_with_config(Arc::clone(&adapter), config);

    let (outcome, events) = run(&controller, ChatRequest::new("s1", "hi")).await;
    assert_eq!(outcome, JobOutcome::Failed);
    assert_eq!(
        events,
        vec![
            ChatEvent::error("No relevant context found for this message"),
            ChatEvent::Done,
        ]
    );
    assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);

    // Requests that skip retrieval are not held to the requirement
    let mut request = ChatRequest::new("s1", "hi");
    request.use_context = false;
    let (outcome, _) = run(&controller, request).await;
    assert_eq!(outcome, JobOutcome::Completed);
}

#[tokio::test]
async fn test_context_lands_in_system_prompt() {
    let adapter = Arc::new(ScriptedAdapter::answering(&["x"]));
    let providers = ProviderRegistry::new().with(ProviderKind::Ollama, Arc::clone(&adapter) as _);
    let controller = Controller::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(providers),
        ControllerConfig::default(),
    )
    .with_context_provider(Arc::new(StaticContext("The sky is green here.".to_string())));

    let (outcome, _) = run(&controller, ChatRequest::new("s1", "What colour is the sky?")).await;
    assert_eq!(outcome, JobOutcome::Completed);

    let prompt = adapter.last_prompt();
    assert_eq!(prompt.first().map(|m| m.role), Some(MessageRole::System));
    assert!(prompt[0].content.contains("The sky is green here."));
    assert_eq!(
        prompt.last(),
        Some(&ChatMessage::user("What colour is the sky?"))
    );
}

#[tokio::test]
async fn test_completed_turns_persisted_and_replayed() {
    let store = Arc::new(InMemoryConversationStore::new());
    let adapter = Arc::new(ScriptedAdapter::new(vec![
        Ok(ChatEvent::Typing),
        Ok(ChatEvent::reasoning("thinking hard")),
        Ok(ChatEvent::token("4")),
        Ok(ChatEvent::token("2")),
    ]));
    let providers = ProviderRegistry::new().with(ProviderKind::Ollama, Arc::clone(&adapter) as _);
    let controller = Controller::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(providers),
        ControllerConfig::default(),
    )
    .with_store(Arc::clone(&store) as _);

    let request = ChatRequest::new("s1", "What is the answer?")
        .with_conversation("conv-1")
        .with_reasoning(true);
    let (outcome, _) = run(&controller, request).await;
    assert_eq!(outcome, JobOutcome::Completed);

    let saved = store.messages("conv-1");
    assert_eq!(saved.len(), 2);
    assert_eq!(saved[0].role, MessageRole::User);
    assert_eq!(saved[0].content, "What is the answer?");
    assert_eq!(saved[1].role, MessageRole::Assistant);
    assert_eq!(saved[1].content, "42");
    let metadata = saved[1].metadata.clone().unwrap();
    assert_eq!(metadata["provider"], "ollama");
    assert_eq!(metadata["model"], "llama3.2");
    assert_eq!(metadata["reasoning"], "thinking hard");

    // The next turn sees the history
    let request = ChatRequest::new("s1", "And again?").with_conversation("conv-1");
    run(&controller, request).await;
    let prompt = adapter.last_prompt();
    assert_eq!(
        prompt[1..].to_vec(),
        vec![
            ChatMessage::user("What is the answer?"),
            ChatMessage::assistant("42"),
            ChatMessage::user("And again?"),
        ]
    );
}

#[tokio::test]
async fn test_failed_job_is_not_persisted() {
    let store = Arc::new(InMemoryConversationStore::new());
    let adapter = ScriptedAdapter::new(vec![
        Ok(ChatEvent::token("partial")),
        Err(ProviderError::timeout("no data from provider for 1s")),
    ]);
    let providers = ProviderRegistry::new().with(ProviderKind::Ollama, Arc::new(adapter));
    let controller = Controller::new(
        Arc::new(SessionRegistry::new()),
        Arc::new(providers),
        ControllerConfig::default(),
    )
    .with_store(Arc::clone(&store) as _);

    let (outcome, events) = run(&controller, ChatRequest::new("s1", "hi")).await;
    assert_eq!(outcome, JobOutcome::Failed);
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(store.conversation_count(), 0);
}
