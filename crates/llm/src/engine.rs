use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::error::EngineResult;

/// Speaker role at the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// One streamed chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }
}

/// Engine-agnostic stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
    Error(String),
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type EngineWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Receiving half of a streamed completion.
///
/// Dropping the stream signals cancellation to the worker that feeds it.
pub struct EngineEventStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

pub struct EngineStreamHandle {
    pub stream: EngineEventStream,
    pub worker: EngineWorker,
}

impl EngineEventStream {
    fn new(events: mpsc::UnboundedReceiver<StreamEvent>, cancel_tx: oneshot::Sender<()>) -> Self {
        Self {
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    /// Waits for the next event. `None` once the worker is gone.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for EngineEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

impl fmt::Debug for EngineEventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineEventStream")
            .field("cancelled", &self.cancel_tx.is_none())
            .finish()
    }
}

/// Creates the channel pair shared by an engine worker and its consumer.
///
/// The worker sends events on the returned sender and should stop once the
/// cancel receiver resolves.
pub fn event_channel() -> (
    mpsc::UnboundedSender<StreamEvent>,
    EngineEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (event_tx, EngineEventStream::new(event_rx, cancel_tx), cancel_rx)
}

/// Chat-completion capability of a ready inference engine.
pub trait InferenceEngine: Send + Sync {
    fn model_id(&self) -> &str;
    fn stream_chat(&self, request: CompletionRequest) -> EngineResult<EngineStreamHandle>;
}

/// One initialization progress report.
#[derive(Debug, Clone, PartialEq)]
pub struct InitProgress {
    pub progress: f64,
    pub text: String,
}

/// Callback handed to a loader; may be invoked any number of times.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Arc<dyn Fn(InitProgress) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(callback: impl Fn(InitProgress) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    pub fn report(&self, progress: f64, text: impl Into<String>) {
        (self.callback)(InitProgress {
            progress,
            text: text.into(),
        });
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressReporter")
    }
}

/// Creates (downloads, loads, or connects to) an inference engine.
pub trait EngineLoader: Send + Sync {
    fn create<'a>(
        &'a self,
        model_id: &'a str,
        progress: ProgressReporter,
    ) -> BoxFuture<'a, EngineResult<Arc<dyn InferenceEngine>>>;
}
