use std::sync::Arc;

use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::http_client::{self, HttpClientExt, NoBody};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use crate::engine::{
    BoxFuture, ChatMessage, CompletionRequest, EngineLoader, EngineStreamHandle, EngineWorker,
    InferenceEngine, ProgressReporter, Role, StreamEvent, event_channel,
};
use crate::error::{
    CompletionsFailedSnafu, EmptyMessageSetSnafu, EngineError, EngineResult, HttpClientSnafu,
    MissingModelIdSnafu, ModelListStatusSnafu, ModelUnavailableSnafu,
};
use crate::model::{Model, model_matches, parse_model_list};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8080/v1";
/// Local runtimes ignore the key, but the client refuses to build without one.
const PLACEHOLDER_API_KEY: &str = "local";

type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<
    rig::providers::openai::responses_api::streaming::StreamingCompletionResponse,
>;

/// Connection settings for an OpenAI-compatible local inference server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub endpoint: String,
    pub api_key: String,
}

impl RuntimeConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim().trim_end_matches('/').to_string();
        Self {
            endpoint: if endpoint.is_empty() {
                DEFAULT_ENDPOINT.to_string()
            } else {
                endpoint
            },
            api_key: api_key.into().trim().to_string(),
        }
    }

    fn build_client(&self) -> EngineResult<openai::Client> {
        let api_key = if self.api_key.is_empty() {
            PLACEHOLDER_API_KEY
        } else {
            self.api_key.as_str()
        };

        openai::Client::builder()
            .api_key(api_key)
            .base_url(self.endpoint.as_str())
            .build()
            .context(HttpClientSnafu {
                stage: "build-client",
            })
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, "")
    }
}

/// Connects to the local runtime and resolves the requested model.
pub struct RigEngineLoader {
    config: RuntimeConfig,
}

impl RigEngineLoader {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    async fn fetch_models(&self) -> EngineResult<Vec<Model>> {
        let client = self.config.build_client()?;
        let request = client
            .get("/models")
            .context(HttpClientSnafu {
                stage: "build-model-request",
            })?
            .body(NoBody)
            .map_err(|source| EngineError::BuildHttpRequestBody {
                stage: "build-model-request-body",
                message: source.to_string(),
            })?;

        let response = client.send(request).await.context(HttpClientSnafu {
            stage: "send-model-request",
        })?;
        let status = response.status();
        let payload = http_client::text(response).await.context(HttpClientSnafu {
            stage: "read-model-response",
        })?;

        if !status.is_success() {
            return ModelListStatusSnafu {
                stage: "model-http-status",
                status: status.as_u16(),
                body: payload,
            }
            .fail();
        }

        parse_model_list(&payload)
    }

    async fn connect(
        &self,
        model_id: &str,
        progress: ProgressReporter,
    ) -> EngineResult<Arc<dyn InferenceEngine>> {
        ensure!(
            !model_id.trim().is_empty(),
            MissingModelIdSnafu {
                stage: "connect-runtime",
            }
        );

        progress.report(0.0, format!("Connecting to {}", self.config.endpoint));
        let models = self.fetch_models().await?;

        progress.report(0.5, format!("Resolving {model_id} among {} models", models.len()));
        let Some(served) = models
            .iter()
            .find(|model| model_matches(&model.id, model_id))
        else {
            tracing::warn!(
                model_id = %model_id,
                served_model_count = models.len(),
                "requested model is not served by the local runtime"
            );
            return ModelUnavailableSnafu {
                stage: "resolve-model",
                model_id: model_id.to_string(),
            }
            .fail();
        };

        progress.report(1.0, format!("Finish loading {}", served.id));
        Ok(Arc::new(RigEngine {
            config: self.config.clone(),
            model_id: served.id.clone(),
        }))
    }
}

impl EngineLoader for RigEngineLoader {
    fn create<'a>(
        &'a self,
        model_id: &'a str,
        progress: ProgressReporter,
    ) -> BoxFuture<'a, EngineResult<Arc<dyn InferenceEngine>>> {
        Box::pin(self.connect(model_id, progress))
    }
}

/// Streams chat completions from the local runtime through rig.
pub struct RigEngine {
    config: RuntimeConfig,
    model_id: String,
}

impl RigEngine {
    fn to_rig_message(message: &ChatMessage) -> Option<RigMessage> {
        match message.role {
            Role::System => None,
            Role::User => Some(RigMessage::user(message.content.clone())),
            Role::Assistant => Some(RigMessage::assistant(message.content.clone())),
        }
    }

    fn merged_preamble(request: &CompletionRequest) -> Option<String> {
        // Rig exposes a single preamble field, so system-role messages are folded into it.
        let parts = request
            .messages
            .iter()
            .filter(|message| matches!(message.role, Role::System))
            .filter(|message| !message.content.trim().is_empty())
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }

    async fn open_stream(
        config: &RuntimeConfig,
        model_id: &str,
        request: &CompletionRequest,
    ) -> EngineResult<RigStreamingResponse> {
        let client = config.build_client()?;
        let model = client.completion_model(model_id.to_string());

        let mut messages = request
            .messages
            .iter()
            .filter_map(Self::to_rig_message)
            .collect::<Vec<_>>();

        let Some(prompt) = messages.pop() else {
            tracing::warn!(
                model_id = %model_id,
                total_message_count = request.messages.len(),
                "cannot open stream because no user/assistant messages remain after filtering"
            );
            return EmptyMessageSetSnafu {
                stage: "open-stream-pop-prompt",
            }
            .fail();
        };
        let mut builder = model.completion_request(prompt).messages(messages);

        if let Some(preamble) = Self::merged_preamble(request) {
            builder = builder.preamble(preamble);
        }

        builder.stream().await.context(CompletionsFailedSnafu {
            stage: "open-stream",
        })
    }

    fn map_stream_item<R>(item: StreamedAssistantContent<R>) -> Option<StreamEvent>
    where
        R: Clone + Unpin,
    {
        match item {
            StreamedAssistantContent::Text(text) if !text.text.is_empty() => {
                Some(StreamEvent::Delta(text.text))
            }
            // Reasoning and tool traffic never reaches the transcript.
            StreamedAssistantContent::Text(_)
            | StreamedAssistantContent::Reasoning(_)
            | StreamedAssistantContent::ReasoningDelta { .. }
            | StreamedAssistantContent::ToolCall { .. }
            | StreamedAssistantContent::ToolCallDelta { .. }
            | StreamedAssistantContent::Final(_) => None,
        }
    }

    async fn run_stream_worker(
        config: RuntimeConfig,
        model_id: String,
        request: CompletionRequest,
        event_tx: mpsc::UnboundedSender<StreamEvent>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let mut stream = match Self::open_stream(&config, &model_id, &request).await {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(
                    model_id = %model_id,
                    endpoint = %config.endpoint,
                    error = %error,
                    "failed to open completion stream"
                );
                let _ = event_tx.send(StreamEvent::Error(error.to_string()));
                return;
            }
        };

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    tracing::debug!(model_id = %model_id, "completion stream cancelled");
                    stream.cancel();
                    return;
                }
                next_item = stream.next() => {
                    match next_item {
                        Some(Ok(item)) => {
                            if let Some(event) = Self::map_stream_item(item)
                                && event_tx.send(event).is_err()
                            {
                                return;
                            }
                        }
                        Some(Err(source)) => {
                            tracing::warn!(
                                model_id = %model_id,
                                error = %source,
                                "completion stream emitted an error chunk"
                            );
                            let error = EngineError::CompletionsFailed {
                                stage: "stream-chunk",
                                source,
                            };
                            let _ = event_tx.send(StreamEvent::Error(error.to_string()));
                            return;
                        }
                        None => break,
                    }
                }
            }
        }

        let _ = event_tx.send(StreamEvent::Done);
    }
}

impl InferenceEngine for RigEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn stream_chat(&self, request: CompletionRequest) -> EngineResult<EngineStreamHandle> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "stream-chat",
            }
        );

        let (event_tx, stream, cancel_rx) = event_channel();
        let worker: EngineWorker = Box::pin(Self::run_stream_worker(
            self.config.clone(),
            self.model_id.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(EngineStreamHandle { stream, worker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_fold_into_preamble() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("persona"),
            ChatMessage::new(Role::User, "hi"),
            ChatMessage::system("  "),
            ChatMessage::system("faq"),
        ]);

        assert_eq!(
            RigEngine::merged_preamble(&request).as_deref(),
            Some("persona\n\nfaq")
        );
        assert!(RigEngine::to_rig_message(&request.messages[0]).is_none());
        assert!(RigEngine::to_rig_message(&request.messages[1]).is_some());
    }

    #[test]
    fn config_normalizes_endpoint() {
        let config = RuntimeConfig::new(" http://localhost:11434/v1/ ", " ");
        assert_eq!(config.endpoint, "http://localhost:11434/v1");
        assert!(config.api_key.is_empty());
        assert_eq!(RuntimeConfig::new("", "").endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn empty_request_is_rejected() {
        let engine = RigEngine {
            config: RuntimeConfig::default(),
            model_id: "m".to_string(),
        };

        let result = engine.stream_chat(CompletionRequest::new(Vec::new()));
        assert!(matches!(result, Err(EngineError::EmptyMessageSet { .. })));
    }
}
