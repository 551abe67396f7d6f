#![deny(unsafe_code)]

//! Inference engine contracts, the model lifecycle store, and the local
//! runtime adapter used by the support chat.

mod engine;
mod error;
pub mod lifecycle;
mod model;
mod rig_adapter;

pub use engine::{
    BoxFuture, ChatMessage, CompletionRequest, EngineEventStream, EngineLoader,
    EngineStreamHandle, EngineWorker, InferenceEngine, InitProgress, ProgressReporter, Role,
    StreamEvent, event_channel,
};
pub use error::{EngineError, EngineResult};
pub use lifecycle::{
    LifecycleState, LifecycleStatus, LifecycleWorker, ModelLifecycle, Subscription,
    UNKNOWN_ERROR_MESSAGE,
};
pub use model::{DEFAULT_MODEL_ID, Model, model_matches, parse_model_list};
pub use rig_adapter::{DEFAULT_ENDPOINT, RigEngine, RigEngineLoader, RuntimeConfig};
