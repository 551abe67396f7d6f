//! Process-wide readiness state of the local inference engine.
//!
//! The store is the single writer of [`LifecycleState`]. Reads are lock-free
//! snapshots; writes are serialized so at most one initialization can leave
//! `Pending`.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use arc_swap::ArcSwap;
use futures::FutureExt;
use tokio::sync::watch;

use crate::engine::{EngineLoader, EngineWorker, InferenceEngine, InitProgress, ProgressReporter};

/// Message stored when a failure carries no description.
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";
pub const INITIAL_LOADING_MESSAGE: &str = "Creating engine...";

pub type LifecycleWorker = EngineWorker;

#[derive(Clone)]
pub enum LifecycleState {
    Uninitialized,
    Pending,
    Loading { progress: f64, message: String },
    Ready { engine: Arc<dyn InferenceEngine> },
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStatus {
    Uninitialized,
    Pending,
    Loading,
    Ready,
    Error,
}

impl LifecycleState {
    pub fn status(&self) -> LifecycleStatus {
        match self {
            Self::Uninitialized => LifecycleStatus::Uninitialized,
            Self::Pending => LifecycleStatus::Pending,
            Self::Loading { .. } => LifecycleStatus::Loading,
            Self::Ready { .. } => LifecycleStatus::Ready,
            Self::Error { .. } => LifecycleStatus::Error,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn engine(&self) -> Option<Arc<dyn InferenceEngine>> {
        match self {
            Self::Ready { engine } => Some(Arc::clone(engine)),
            _ => None,
        }
    }
}

impl fmt::Debug for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("Uninitialized"),
            Self::Pending => f.write_str("Pending"),
            Self::Loading { progress, message } => f
                .debug_struct("Loading")
                .field("progress", progress)
                .field("message", message)
                .finish(),
            Self::Ready { engine } => f
                .debug_struct("Ready")
                .field("model_id", &engine.model_id())
                .finish(),
            Self::Error { message } => f.debug_struct("Error").field("message", message).finish(),
        }
    }
}

type Callback = Arc<dyn Fn(&LifecycleState) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: BTreeMap<u64, Callback>,
}

pub struct ModelLifecycle {
    state: ArcSwap<LifecycleState>,
    // Serializes transitions and their notifications.
    write_lock: Mutex<()>,
    subscribers: Mutex<Subscribers>,
    status_tx: watch::Sender<LifecycleStatus>,
    loader: Arc<dyn EngineLoader>,
}

/// Keeps a lifecycle callback registered until dropped.
#[must_use = "dropping a Subscription unsubscribes its callback"]
pub struct Subscription {
    lifecycle: Weak<ModelLifecycle>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(lifecycle) = self.lifecycle.upgrade() {
            lock(&lifecycle.subscribers).callbacks.remove(&self.id);
        }
    }
}

impl ModelLifecycle {
    /// Creates a store in `Pending`, awaiting consent to download.
    pub fn new(loader: Arc<dyn EngineLoader>) -> Arc<Self> {
        Self::with_state(loader, LifecycleState::Pending)
    }

    pub fn with_state(loader: Arc<dyn EngineLoader>, initial: LifecycleState) -> Arc<Self> {
        let (status_tx, _) = watch::channel(initial.status());
        Arc::new(Self {
            state: ArcSwap::from_pointee(initial),
            write_lock: Mutex::new(()),
            subscribers: Mutex::new(Subscribers::default()),
            status_tx,
            loader,
        })
    }

    pub fn state(&self) -> Arc<LifecycleState> {
        self.state.load_full()
    }

    pub fn status(&self) -> LifecycleStatus {
        self.state.load().status()
    }

    pub fn engine(&self) -> Option<Arc<dyn InferenceEngine>> {
        self.state.load().engine()
    }

    /// Registers `callback` for every subsequent transition.
    ///
    /// Callbacks run synchronously on the transitioning thread and must not
    /// trigger another transition.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(&LifecycleState) + Send + Sync + 'static,
    ) -> Subscription {
        let mut subscribers = lock(&self.subscribers);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.callbacks.insert(id, Arc::new(callback));

        Subscription {
            lifecycle: Arc::downgrade(self),
            id,
        }
    }

    /// Status changes for async observers. Intermediate values may coalesce.
    pub fn watch(&self) -> watch::Receiver<LifecycleStatus> {
        self.status_tx.subscribe()
    }

    /// Starts engine creation when the store is `Pending`.
    ///
    /// The store is `Loading` when this returns `Some`; the returned worker
    /// drives engine creation and must be awaited or spawned. Returns `None`
    /// in every other state.
    pub fn begin_initialization(
        self: &Arc<Self>,
        model_id: impl Into<String>,
    ) -> Option<LifecycleWorker> {
        let model_id = model_id.into();
        let started = self.transition("begin-initialization", |current| match current {
            LifecycleState::Pending => Some(LifecycleState::Loading {
                progress: 0.0,
                message: INITIAL_LOADING_MESSAGE.to_string(),
            }),
            _ => None,
        });

        if !started {
            tracing::debug!(
                model_id = %model_id,
                status = ?self.status(),
                "ignoring initialization request outside pending state"
            );
            return None;
        }

        tracing::info!(model_id = %model_id, "starting engine initialization");
        let lifecycle = Arc::clone(self);
        Some(Box::pin(lifecycle.run_initialization(model_id)))
    }

    async fn run_initialization(self: Arc<Self>, model_id: String) {
        let weak = Arc::downgrade(&self);
        let progress = ProgressReporter::new(move |report| {
            if let Some(lifecycle) = weak.upgrade() {
                lifecycle.apply_progress(report);
            }
        });

        let loader = Arc::clone(&self.loader);
        let outcome = AssertUnwindSafe(loader.create(&model_id, progress))
            .catch_unwind()
            .await;

        let next = match outcome {
            Ok(Ok(engine)) => {
                tracing::info!(model_id = %model_id, "engine ready");
                LifecycleState::Ready { engine }
            }
            Ok(Err(error)) => {
                tracing::error!(model_id = %model_id, error = %error, "engine initialization failed");
                LifecycleState::Error {
                    message: describe_failure(&error.to_string()),
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(model_id = %model_id, error = %message, "engine loader panicked");
                LifecycleState::Error { message }
            }
        };

        self.transition("finish-initialization", move |current| {
            matches!(current, LifecycleState::Loading { .. }).then_some(next)
        });
    }

    fn apply_progress(&self, report: InitProgress) {
        let InitProgress { progress, text } = report;
        // Reports are stored as given; ordering is the loader's business.
        self.transition("initialization-progress", move |current| {
            matches!(current, LifecycleState::Loading { .. }).then(|| LifecycleState::Loading {
                progress: if progress.is_finite() { progress } else { 0.0 },
                message: text,
            })
        });
    }

    fn transition(
        &self,
        stage: &'static str,
        next: impl FnOnce(&LifecycleState) -> Option<LifecycleState>,
    ) -> bool {
        let _guard = lock(&self.write_lock);
        let current = self.state.load_full();
        let Some(next) = next(&current) else {
            tracing::trace!(stage, status = ?current.status(), "transition rejected");
            return false;
        };

        let next = Arc::new(next);
        self.state.store(Arc::clone(&next));
        self.status_tx.send_replace(next.status());

        let callbacks = lock(&self.subscribers)
            .callbacks
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for callback in callbacks {
            callback(&next);
        }

        true
    }
}

fn describe_failure(description: &str) -> String {
    let description = description.trim();
    if description.is_empty() {
        UNKNOWN_ERROR_MESSAGE.to_string()
    } else {
        description.to_string()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let description = payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_default();
    describe_failure(&description)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::engine::{BoxFuture, CompletionRequest, EngineStreamHandle, StreamEvent, event_channel};
    use crate::error::{EngineError, EngineResult};

    struct NullEngine;

    impl InferenceEngine for NullEngine {
        fn model_id(&self) -> &str {
            "null"
        }

        fn stream_chat(&self, _request: CompletionRequest) -> EngineResult<EngineStreamHandle> {
            let (event_tx, stream, _cancel_rx) = event_channel();
            let worker = Box::pin(async move {
                let _ = event_tx.send(StreamEvent::Done);
            });
            Ok(EngineStreamHandle { stream, worker })
        }
    }

    enum Outcome {
        Ready,
        Fail(String),
        Panic,
    }

    struct ScriptedLoader {
        reports: Vec<(f64, &'static str)>,
        outcome: Outcome,
        calls: AtomicUsize,
        reporter: Mutex<Option<ProgressReporter>>,
    }

    impl ScriptedLoader {
        fn new(reports: Vec<(f64, &'static str)>, outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                reports,
                outcome,
                calls: AtomicUsize::new(0),
                reporter: Mutex::new(None),
            })
        }
    }

    impl EngineLoader for ScriptedLoader {
        fn create<'a>(
            &'a self,
            _model_id: &'a str,
            progress: ProgressReporter,
        ) -> BoxFuture<'a, EngineResult<Arc<dyn InferenceEngine>>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                for (value, text) in &self.reports {
                    progress.report(*value, *text);
                    tokio::task::yield_now().await;
                }
                *lock(&self.reporter) = Some(progress);

                match &self.outcome {
                    Outcome::Ready => Ok(Arc::new(NullEngine) as Arc<dyn InferenceEngine>),
                    Outcome::Fail(message) => Err(EngineError::backend("test", message.clone())),
                    Outcome::Panic => panic!("loader exploded"),
                }
            })
        }
    }

    fn record(lifecycle: &Arc<ModelLifecycle>) -> (Subscription, Arc<Mutex<Vec<LifecycleState>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = lifecycle.subscribe(move |state| lock(&sink).push(state.clone()));
        (subscription, seen)
    }

    #[tokio::test]
    async fn initialization_reports_progress_then_ready() {
        let loader = ScriptedLoader::new(vec![(0.25, "fetching"), (0.75, "loading")], Outcome::Ready);
        let lifecycle = ModelLifecycle::new(loader.clone());
        let (_subscription, seen) = record(&lifecycle);
        assert_eq!(lifecycle.status(), LifecycleStatus::Pending);

        let worker = lifecycle.begin_initialization("test-model").unwrap();
        assert!(matches!(
            &*lifecycle.state(),
            LifecycleState::Loading { progress, .. } if *progress == 0.0
        ));

        worker.await;
        assert_eq!(lifecycle.status(), LifecycleStatus::Ready);
        assert_eq!(lifecycle.engine().unwrap().model_id(), "null");

        let seen = lock(&seen);
        let statuses = seen.iter().map(LifecycleState::status).collect::<Vec<_>>();
        assert_eq!(
            statuses,
            [
                LifecycleStatus::Loading,
                LifecycleStatus::Loading,
                LifecycleStatus::Loading,
                LifecycleStatus::Ready
            ]
        );
        assert!(matches!(
            &seen[2],
            LifecycleState::Loading { progress, message } if *progress == 0.75 && message == "loading"
        ));
    }

    #[tokio::test]
    async fn second_begin_is_ignored() {
        let loader = ScriptedLoader::new(vec![], Outcome::Ready);
        let lifecycle = ModelLifecycle::new(loader.clone());

        let first = lifecycle.begin_initialization("m");
        let second = lifecycle.begin_initialization("m");
        assert!(first.is_some());
        assert!(second.is_none());

        first.unwrap().await;
        assert!(lifecycle.begin_initialization("m").is_none());
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_begin_yields_one_chain() {
        let loader = ScriptedLoader::new(vec![(0.5, "half")], Outcome::Ready);
        let lifecycle = ModelLifecycle::new(loader.clone());
        let (_subscription, seen) = record(&lifecycle);

        let workers = std::thread::scope(|scope| {
            let handles = (0..8)
                .map(|_| scope.spawn(|| lifecycle.begin_initialization("m")))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .filter_map(|handle| handle.join().ok().flatten())
                .collect::<Vec<_>>()
        });
        assert_eq!(workers.len(), 1);

        for worker in workers {
            worker.await;
        }

        let ready_count = lock(&seen)
            .iter()
            .filter(|state| state.is_ready())
            .count();
        assert_eq!(ready_count, 1);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_without_description_uses_fallback() {
        let loader = ScriptedLoader::new(vec![], Outcome::Fail(String::new()));
        let lifecycle = ModelLifecycle::new(loader);

        lifecycle.begin_initialization("m").unwrap().await;

        match &*lifecycle.state() {
            LifecycleState::Error { message } => assert_eq!(message, UNKNOWN_ERROR_MESSAGE),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_keeps_error_description() {
        let loader = ScriptedLoader::new(vec![(0.1, "start")], Outcome::Fail("out of memory".into()));
        let lifecycle = ModelLifecycle::new(loader);

        lifecycle.begin_initialization("m").unwrap().await;

        match &*lifecycle.state() {
            LifecycleState::Error { message } => assert_eq!(message, "out of memory"),
            other => panic!("unexpected state {other:?}"),
        }
        assert!(lifecycle.begin_initialization("m").is_none());
    }

    #[tokio::test]
    async fn loader_panic_becomes_error_state() {
        let loader = ScriptedLoader::new(vec![], Outcome::Panic);
        let lifecycle = ModelLifecycle::new(loader);

        lifecycle.begin_initialization("m").unwrap().await;

        match &*lifecycle.state() {
            LifecycleState::Error { message } => assert_eq!(message, "loader exploded"),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn out_of_order_progress_is_stored_as_reported() {
        let loader = ScriptedLoader::new(vec![(0.6, "b"), (0.3, "a"), (f64::NAN, "c")], Outcome::Ready);
        let lifecycle = ModelLifecycle::new(loader);
        let (_subscription, seen) = record(&lifecycle);

        lifecycle.begin_initialization("m").unwrap().await;

        let progress = lock(&seen)
            .iter()
            .filter_map(|state| match state {
                LifecycleState::Loading { progress, .. } => Some(*progress),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(progress, [0.0, 0.6, 0.3, 0.0]);
        assert!(lifecycle.state().is_ready());
    }

    #[tokio::test]
    async fn progress_after_ready_is_ignored() {
        let loader = ScriptedLoader::new(vec![], Outcome::Ready);
        let lifecycle = ModelLifecycle::new(loader.clone());

        lifecycle.begin_initialization("m").unwrap().await;
        let reporter = lock(&loader.reporter).clone().unwrap();
        reporter.report(0.9, "late");

        assert_eq!(lifecycle.status(), LifecycleStatus::Ready);
    }

    #[tokio::test]
    async fn dropped_subscription_stops_notifications() {
        let loader = ScriptedLoader::new(vec![(0.5, "half")], Outcome::Ready);
        let lifecycle = ModelLifecycle::new(loader);
        let (subscription, seen) = record(&lifecycle);
        let mut status_rx = lifecycle.watch();

        let worker = lifecycle.begin_initialization("m").unwrap();
        subscription.unsubscribe();
        worker.await;

        assert_eq!(lock(&seen).len(), 1);
        assert_eq!(*status_rx.borrow_and_update(), LifecycleStatus::Ready);
    }

    #[test]
    fn non_pending_states_reject_initialization() {
        let loader = ScriptedLoader::new(vec![], Outcome::Ready);
        let lifecycle = ModelLifecycle::with_state(loader, LifecycleState::Uninitialized);
        assert!(lifecycle.begin_initialization("m").is_none());
        assert_eq!(lifecycle.status(), LifecycleStatus::Uninitialized);
    }
}
