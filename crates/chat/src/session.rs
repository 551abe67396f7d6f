//! Conversation state machine driving one support chat.
//!
//! The session owns the message list, the draft, and at most one in-flight
//! reply stream. Every mutating call returns the [`SessionUpdate`]s a view
//! needs to re-render.

use std::sync::Arc;

use buddy_llm::{
    ChatMessage, CompletionRequest, EngineError, EngineEventStream, EngineResult,
    EngineStreamHandle, InferenceEngine, LifecycleStatus, LifecycleWorker, ModelLifecycle,
    StreamEvent,
};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::events::SessionUpdate;
use crate::knowledge::KnowledgeBase;
use crate::message::{Message, MessageId, MessageIdAllocator, Role};
use crate::scroll::{ScrollMetrics, ScrollTracker};

/// Appended to the partial reply when generation fails.
pub const ERROR_SUFFIX: &str = "\n\n**Error:** LLM failed to generate a complete response.";

const STREAM_CLOSED_MESSAGE: &str = "engine stream ended before a terminal event";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    AwaitingConsent,
    Idle,
    Streaming,
}

/// How a message body should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayMode {
    Raw,
    Markdown,
}

struct ActiveStream {
    message_id: MessageId,
    stream: EngineEventStream,
    worker: JoinHandle<()>,
}

pub struct ChatSession {
    lifecycle: Arc<ModelLifecycle>,
    knowledge: KnowledgeBase,
    messages: Vec<Message>,
    draft: String,
    ids: MessageIdAllocator,
    scroll: ScrollTracker,
    active: Option<ActiveStream>,
}

impl ChatSession {
    pub fn new(lifecycle: Arc<ModelLifecycle>, knowledge: KnowledgeBase) -> Self {
        let mut ids = MessageIdAllocator::new();
        let welcome = Message::new(ids.alloc(), Role::Assistant, knowledge.welcome_message());

        Self {
            lifecycle,
            knowledge,
            messages: vec![welcome],
            draft: String::new(),
            ids,
            scroll: ScrollTracker::new(),
            active: None,
        }
    }

    pub fn with_scroll_threshold(mut self, threshold: f32) -> Self {
        self.scroll = ScrollTracker::with_threshold(threshold);
        self
    }

    pub fn lifecycle(&self) -> &Arc<ModelLifecycle> {
        &self.lifecycle
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    pub fn auto_scroll(&self) -> bool {
        self.scroll.is_following_bottom()
    }

    /// Id of the assistant message currently receiving deltas.
    pub fn streaming_message_id(&self) -> Option<MessageId> {
        self.active.as_ref().map(|active| active.message_id)
    }

    pub fn phase(&self) -> SessionPhase {
        if self.is_streaming() {
            return SessionPhase::Streaming;
        }

        match self.lifecycle.status() {
            LifecycleStatus::Uninitialized | LifecycleStatus::Pending => {
                SessionPhase::AwaitingConsent
            }
            LifecycleStatus::Loading | LifecycleStatus::Ready | LifecycleStatus::Error => {
                SessionPhase::Idle
            }
        }
    }

    pub fn is_engine_ready(&self) -> bool {
        self.lifecycle.status() == LifecycleStatus::Ready
    }

    /// Only the reply still being streamed is shown raw; partial Markdown
    /// would flicker between layouts on every token.
    pub fn display_mode(&self, message: &Message) -> DisplayMode {
        match message.role {
            Role::User => DisplayMode::Raw,
            Role::Assistant if self.streaming_message_id() == Some(message.id) => DisplayMode::Raw,
            Role::Assistant => DisplayMode::Markdown,
        }
    }

    pub fn set_draft(&mut self, text: impl Into<String>) -> Vec<SessionUpdate> {
        if self.is_streaming() || !self.is_engine_ready() {
            return Vec::new();
        }

        let text = text.into();
        if text == self.draft {
            return Vec::new();
        }

        self.draft = text;
        vec![SessionUpdate::DraftChanged]
    }

    /// Records consent and starts the model download.
    ///
    /// Returns the initialization worker for the caller to spawn, or `None`
    /// when the lifecycle is not waiting for consent.
    pub fn agree_and_start(&self, model_id: impl Into<String>) -> Option<LifecycleWorker> {
        if self.lifecycle.status() != LifecycleStatus::Pending {
            return None;
        }

        self.lifecycle.begin_initialization(model_id)
    }

    pub fn on_scroll(&mut self, metrics: ScrollMetrics) -> bool {
        self.scroll.on_scroll(metrics)
    }

    /// Sends the draft as a user turn and opens the assistant reply stream.
    ///
    /// Does nothing when the draft is blank, a reply is streaming, or the
    /// engine is not ready.
    pub fn submit(&mut self) -> Vec<SessionUpdate> {
        if self.is_streaming() {
            return Vec::new();
        }
        let content = self.draft.trim();
        if content.is_empty() {
            return Vec::new();
        }
        let Some(engine) = self.lifecycle.engine() else {
            return Vec::new();
        };
        let content = content.to_string();

        let mut updates = Vec::new();

        let user_id = self.ids.alloc();
        self.messages.push(Message::user(user_id, content));
        updates.push(SessionUpdate::MessageAppended(user_id));

        self.draft.clear();
        updates.push(SessionUpdate::DraftChanged);

        self.scroll.force_follow();
        self.request_scroll(false, &mut updates);

        let request = self.build_request();

        let assistant_id = self.ids.alloc();
        self.messages.push(Message::assistant_placeholder(assistant_id));
        updates.push(SessionUpdate::MessageAppended(assistant_id));
        updates.push(SessionUpdate::StreamingChanged(true));
        self.request_scroll(true, &mut updates);

        match open_stream(engine.as_ref(), request) {
            Ok((stream, worker)) => {
                tracing::info!(
                    message_id = assistant_id.0,
                    model_id = %engine.model_id(),
                    "assistant reply streaming"
                );
                self.active = Some(ActiveStream {
                    message_id: assistant_id,
                    stream,
                    worker,
                });
            }
            Err(error) => {
                tracing::error!(
                    message_id = assistant_id.0,
                    error = %error,
                    "failed to open assistant reply stream"
                );
                self.fail_message(assistant_id, &mut updates);
                updates.push(SessionUpdate::StreamingChanged(false));
                self.request_scroll(false, &mut updates);
            }
        }

        updates
    }

    /// Waits for the next event of the active reply stream.
    ///
    /// Never resolves while idle, so it can sit in a `tokio::select!` next to
    /// other input sources. A stream whose sender disappears yields an error.
    pub async fn next_stream_event(&mut self) -> StreamEvent {
        let Some(active) = self.active.as_mut() else {
            return std::future::pending().await;
        };

        match active.stream.recv().await {
            Some(event) => event,
            None => StreamEvent::Error(STREAM_CLOSED_MESSAGE.to_string()),
        }
    }

    pub fn apply_stream_event(&mut self, event: StreamEvent) -> Vec<SessionUpdate> {
        let Some(message_id) = self.streaming_message_id() else {
            return Vec::new();
        };

        let mut updates = Vec::new();
        match event {
            StreamEvent::Delta(delta) => {
                if delta.is_empty() {
                    return updates;
                }
                if let Some(message) = self.message_mut(message_id) {
                    message.text.push_str(&delta);
                }
                updates.push(SessionUpdate::MessageUpdated(message_id));
                self.request_scroll(true, &mut updates);
            }
            StreamEvent::Done => {
                tracing::debug!(message_id = message_id.0, "assistant reply complete");
                self.finish_active(&mut updates);
            }
            StreamEvent::Error(error) => {
                tracing::warn!(
                    message_id = message_id.0,
                    error = %error,
                    "assistant reply stream failed"
                );
                self.fail_message(message_id, &mut updates);
                self.finish_active(&mut updates);
            }
        }

        updates
    }

    /// Drives the active stream until it finishes.
    pub async fn finish_stream(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while self.is_streaming() {
            let event = self.next_stream_event().await;
            updates.extend(self.apply_stream_event(event));
        }
        updates
    }

    /// Stops the active reply, keeping whatever text already arrived.
    pub fn cancel_stream(&mut self) -> Vec<SessionUpdate> {
        let Some(active) = self.active.as_mut() else {
            return Vec::new();
        };

        tracing::info!(message_id = active.message_id.0, "cancelling assistant reply");
        active.stream.cancel();

        let mut updates = Vec::new();
        self.finish_active(&mut updates);
        updates
    }

    fn build_request(&self) -> CompletionRequest {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        messages.push(ChatMessage::system(self.knowledge.build_system_instruction()));
        messages.extend(self.messages.iter().map(Message::to_engine_message));
        CompletionRequest::new(messages)
    }

    fn finish_active(&mut self, updates: &mut Vec<SessionUpdate>) {
        let Some(active) = self.active.take() else {
            return;
        };

        // The worker winds down on its own once the stream is released.
        drop(active.stream);
        drop(active.worker);

        updates.push(SessionUpdate::MessageUpdated(active.message_id));
        updates.push(SessionUpdate::StreamingChanged(false));
        self.request_scroll(false, updates);
    }

    fn fail_message(&mut self, message_id: MessageId, updates: &mut Vec<SessionUpdate>) {
        if let Some(message) = self.message_mut(message_id) {
            message.text.push_str(ERROR_SUFFIX);
            updates.push(SessionUpdate::MessageUpdated(message_id));
        }
    }

    fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().rev().find(|message| message.id == id)
    }

    fn request_scroll(&self, streaming: bool, updates: &mut Vec<SessionUpdate>) {
        if let Some(behavior) = self.scroll.scroll_request(streaming) {
            updates.push(SessionUpdate::ScrollToBottom(behavior));
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            // Dropping the stream signals cancellation; abort covers workers
            // that never poll their cancel receiver.
            active.worker.abort();
        }
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("messages", &self.messages.len())
            .field("draft", &self.draft)
            .field("streaming", &self.streaming_message_id())
            .field("auto_scroll", &self.auto_scroll())
            .finish()
    }
}

fn open_stream(
    engine: &dyn InferenceEngine,
    request: CompletionRequest,
) -> EngineResult<(EngineEventStream, JoinHandle<()>)> {
    let runtime = Handle::try_current()
        .map_err(|error| EngineError::backend("spawn-stream-worker", error.to_string()))?;
    let EngineStreamHandle { stream, worker } = engine.stream_chat(request)?;
    Ok((stream, runtime.spawn(worker)))
}
