use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::stream::Stream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agent::{OllamaAgentService, FALLBACK_MODELS};
use crate::config::{normalize_host, AppConfig};
use crate::conversation::Conversation;
use crate::errors::AppError;
use crate::models::{ChatEvent, Message, MessageRole, ModelInfo, TurnId};

struct SessionState {
    host: String,
    current_model: Option<String>,
    system_prompt: Option<String>,
    conversation: Conversation,
    /// Bumped on every clear so late replies from an older conversation are dropped.
    epoch: u64,
    /// The in-flight turn. Guarded together with the conversation so that a
    /// stopped turn can never store its reply after the next turn has started.
    active: Option<ActiveTurn>,
}

impl SessionState {
    fn owns_slot(&self, turn: TurnId) -> bool {
        self.active.as_ref().is_some_and(|a| a.turn == turn)
    }
}

struct ActiveTurn {
    turn: TurnId,
    cancel: CancellationToken,
}

struct Inner {
    agent: OllamaAgentService,
    runtime: Handle,
    state: Mutex<SessionState>,
    next_turn: AtomicU64,
}

impl Inner {
    fn finish_turn(&self, turn: TurnId) {
        let mut state = lock(&self.state);
        if state.owns_slot(turn) {
            state.active = None;
        }
    }

    /// Stores the reply of `turn` unless it was stopped in the meantime.
    ///
    /// Ownership of the slot is checked under the same lock that `stop_turn`
    /// and `start_turn` take, so a stopped turn never appends after a newer one.
    fn record_reply(
        &self,
        turn: TurnId,
        epoch: u64,
        cancel: &CancellationToken,
        text: &str,
    ) -> Result<(), AppError> {
        let mut state = lock(&self.state);
        if cancel.is_cancelled() || !state.owns_slot(turn) {
            return Err(AppError::Cancelled);
        }
        if state.epoch != epoch {
            info!("Turn {turn} finished after the conversation was cleared, reply not stored");
            return Ok(());
        }
        state.conversation.append(MessageRole::Assistant, text);
        Ok(())
    }
}

/// Releases the in-flight slot when a turn ends, however it ends.
struct TurnGuard {
    inner: Arc<Inner>,
    turn: TurnId,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.inner.finish_turn(self.turn);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Chat session against one Ollama host.
///
/// Cloning yields another handle to the same session. At most one turn is in
/// flight at a time; its network I/O runs on the Tokio runtime captured at
/// construction, so none of the `send_*` methods block the caller.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

impl ChatSession {
    /// Builds a session on the current Tokio runtime.
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let runtime = Handle::try_current()
            .map_err(|e| AppError::Unexpected(format!("chat session needs a Tokio runtime: {e}")))?;
        Ok(Self::with_runtime(OllamaAgentService::new()?, runtime, config))
    }

    pub fn with_runtime(agent: OllamaAgentService, runtime: Handle, config: &AppConfig) -> Self {
        let state = SessionState {
            host: normalize_host(&config.host),
            current_model: config.default_model.clone(),
            system_prompt: config.system_prompt.clone(),
            conversation: Conversation::new(config.system_prompt.as_deref()),
            epoch: 0,
            active: None,
        };
        Self {
            inner: Arc::new(Inner {
                agent,
                runtime,
                state: Mutex::new(state),
                next_turn: AtomicU64::new(0),
            }),
        }
    }

    // ── Settings ─────────────────────────────────────────────────────────────

    pub fn set_model(&self, model: impl Into<String>) {
        let model = model.into();
        info!("Switched to model: {model}");
        lock(&self.inner.state).current_model = Some(model);
    }

    pub fn current_model(&self) -> Option<String> {
        lock(&self.inner.state).current_model.clone()
    }

    /// Takes effect on the next request.
    pub fn set_host(&self, host: &str) {
        let host = normalize_host(host);
        info!("Ollama host set to: {host}");
        lock(&self.inner.state).host = host;
    }

    pub fn host(&self) -> String {
        lock(&self.inner.state).host.clone()
    }

    pub fn system_prompt(&self) -> Option<String> {
        lock(&self.inner.state).system_prompt.clone()
    }

    // ── Conversation ─────────────────────────────────────────────────────────

    /// Empties the conversation, re-seeding it with the system prompt if one is set.
    pub fn clear_conversation(&self) {
        let mut state = lock(&self.inner.state);
        let seed = state
            .system_prompt
            .as_deref()
            .map(|prompt| Message::new(MessageRole::System, prompt));
        state.conversation.reset(seed);
        state.epoch += 1;
        info!("Conversation cleared");
    }

    /// Everything that is sent to the model on the next turn.
    pub fn history(&self) -> Vec<Message> {
        lock(&self.inner.state).conversation.snapshot()
    }

    /// The conversation as shown to the user, without the system prompt.
    pub fn transcript(&self) -> Vec<Message> {
        lock(&self.inner.state).conversation.transcript()
    }

    // ── Generation ───────────────────────────────────────────────────────────

    pub fn is_generating(&self) -> bool {
        lock(&self.inner.state).active.is_some()
    }

    pub fn current_turn(&self) -> Option<TurnId> {
        lock(&self.inner.state).active.as_ref().map(|a| a.turn)
    }

    /// Cancels the in-flight turn, if any. Its worker stops reading the
    /// stream and reports [`AppError::Cancelled`] as its terminal event.
    pub fn stop_generation(&self) -> bool {
        let mut state = lock(&self.inner.state);
        let Some(active) = state.active.take() else {
            return false;
        };
        info!("Stopping generation for turn {}", active.turn);
        active.cancel.cancel();
        true
    }

    /// Like [`ChatSession::stop_generation`], but only if `turn` is the one in flight.
    pub fn stop_turn(&self, turn: TurnId) -> bool {
        let mut state = lock(&self.inner.state);
        if !state.owns_slot(turn) {
            return false;
        }
        if let Some(active) = state.active.take() {
            info!("Stopping generation for turn {turn}");
            active.cancel.cancel();
        }
        true
    }

    /// Starts a turn and reports progress as `(text, final)` pairs.
    ///
    /// `on_update` sees the accumulated reply after every streamed increment
    /// and is then called exactly once with `final == true`, carrying either
    /// the full reply or an error message.
    pub fn send_message<F>(&self, text: impl Into<String>, mut on_update: F) -> TurnId
    where
        F: FnMut(&str, bool) + Send + 'static,
    {
        self.start_turn(text.into(), move |event| {
            on_update(&*event.text(), event.is_final())
        })
    }

    /// Starts a turn and returns its events as a stream.
    pub fn send_message_events(&self, text: impl Into<String>) -> TurnEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        let turn = self.start_turn(text.into(), move |event| {
            let _ = tx.send(event);
        });
        TurnEvents { turn, rx }
    }

    /// Runs a turn to completion and returns the assistant reply.
    pub async fn chat(&self, text: impl Into<String>) -> Result<String, AppError> {
        let mut events = self.send_message_events(text);
        while let Some(event) = events.next_event().await {
            match event {
                ChatEvent::Partial { .. } => continue,
                ChatEvent::Completed { text, .. } => return Ok(text),
                ChatEvent::Failed { error, .. } => return Err(error),
            }
        }
        Err(AppError::Unexpected(format!(
            "turn {} ended without a final response",
            events.turn()
        )))
    }

    fn start_turn<F>(&self, text: String, mut emit: F) -> TurnId
    where
        F: FnMut(ChatEvent) + Send + 'static,
    {
        let turn = TurnId(self.inner.next_turn.fetch_add(1, Ordering::Relaxed) + 1);

        let cancel = CancellationToken::new();

        let started = {
            let mut state = lock(&self.inner.state);
            match (state.current_model.clone(), state.active.as_ref().map(|a| a.turn)) {
                (None, _) => Err(AppError::NoModelSelected),
                (Some(_), Some(_)) => Err(AppError::Busy),
                (Some(model), None) => {
                    state.active = Some(ActiveTurn { turn, cancel: cancel.clone() });
                    state.conversation.append(MessageRole::User, text);
                    Ok((model, state.host.clone(), state.conversation.snapshot(), state.epoch))
                }
            }
        };
        let (model, host, history, epoch) = match started {
            Ok(started) => started,
            Err(error) => {
                warn!("Turn {turn} rejected: {error}");
                emit(ChatEvent::Failed { turn, error });
                return turn;
            }
        };
        let guard = TurnGuard { inner: Arc::clone(&self.inner), turn };
        info!("Turn {turn}: sending message to {model} at {host}");

        let inner = Arc::clone(&self.inner);
        self.inner.runtime.spawn(async move {
            let result = inner
                .agent
                .stream_chat(&host, &model, &history, &cancel, |so_far| {
                    emit(ChatEvent::Partial { turn, text: so_far.to_string() })
                })
                .await;

            let event = match result {
                _ if cancel.is_cancelled() => ChatEvent::Failed { turn, error: AppError::Cancelled },
                Ok(text) if text.is_empty() => ChatEvent::Failed { turn, error: AppError::EmptyResponse },
                Ok(text) => match inner.record_reply(turn, epoch, &cancel, &text) {
                    Ok(()) => ChatEvent::Completed { turn, text },
                    Err(error) => ChatEvent::Failed { turn, error },
                },
                Err(error) => ChatEvent::Failed { turn, error },
            };

            match &event {
                ChatEvent::Failed { error: AppError::Cancelled, .. } => {
                    info!("Turn {turn} stopped by user")
                }
                ChatEvent::Failed { error, .. } => error!("Turn {turn} failed: {error}"),
                _ => info!("Turn {turn} completed"),
            }

            drop(guard);
            emit(event);
        });

        turn
    }

    // ── Host metadata ────────────────────────────────────────────────────────

    /// Model names advertised by the host, or [`FALLBACK_MODELS`] when the
    /// host cannot be reached or answers with garbage.
    pub async fn list_models(&self) -> Vec<String> {
        let host = self.host();
        match self.inner.agent.list_models(&host).await {
            Ok(models) => models.into_iter().map(|m| m.name).collect(),
            Err(e) => {
                error!("Error getting models from {host}: {e}");
                fallback_models()
            }
        }
    }

    /// Like [`ChatSession::list_models`] but with sizes and without the fallback.
    pub async fn available_models(&self) -> Result<Vec<ModelInfo>, AppError> {
        let host = self.host();
        self.inner.agent.list_models(&host).await
    }

    pub async fn test_connection(&self) -> bool {
        let host = self.host();
        match self.inner.agent.ping(&host).await {
            Ok(()) => {
                info!("Connection test to {host} successful");
                true
            }
            Err(e) => {
                error!("Connection test to {host} failed: {e}");
                false
            }
        }
    }
}

pub fn fallback_models() -> Vec<String> {
    FALLBACK_MODELS.iter().map(|m| m.to_string()).collect()
}

/// True when `models` is exactly the fallback list, i.e. the host was not reached.
pub fn uses_fallback_models(models: &[String]) -> bool {
    models.iter().map(String::as_str).eq(FALLBACK_MODELS)
}

/// Events of one turn, ending after the terminal event.
pub struct TurnEvents {
    turn: TurnId,
    rx: mpsc::UnboundedReceiver<ChatEvent>,
}

impl TurnEvents {
    pub fn turn(&self) -> TurnId {
        self.turn
    }

    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        self.rx.recv().await
    }
}

impl Stream for TurnEvents {
    type Item = ChatEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ChatEvent>> {
        self.rx.poll_recv(cx)
    }
}
