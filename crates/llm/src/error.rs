use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    #[snafu(display("model id must not be empty"))]
    MissingModelId { stage: &'static str },
    #[snafu(display("completion request has no messages"))]
    EmptyMessageSet { stage: &'static str },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("failed to finalize HTTP request body: {message}"))]
    BuildHttpRequestBody {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("runtime model endpoint returned status {status}: {body}"))]
    ModelListStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to parse runtime model list on `{stage}`: {source}"))]
    ModelListParse {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("model '{model_id}' is not served by the local runtime"))]
    ModelUnavailable {
        stage: &'static str,
        model_id: String,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
    /// Failure reported by an engine implementation outside this crate.
    #[snafu(display("{message}"))]
    Backend {
        stage: &'static str,
        message: String,
    },
}

impl EngineError {
    /// Builds a backend error from any displayable failure.
    pub fn backend(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            stage,
            message: message.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
