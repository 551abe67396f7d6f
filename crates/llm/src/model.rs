use serde::Deserialize;
use snafu::ResultExt;

use crate::error::{EngineResult, ModelListParseSnafu};

/// Model the support assistant downloads by default.
pub const DEFAULT_MODEL_ID: &str = "Hermes-3-Llama-3.2-3B-q4f16_1-MLC";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelListPayload {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    owned_by: Option<String>,
}

/// Parses an OpenAI-style `GET /models` body into sorted, deduplicated models.
pub fn parse_model_list(payload: &str) -> EngineResult<Vec<Model>> {
    let parsed: ModelListPayload = serde_json::from_str(payload).context(ModelListParseSnafu {
        stage: "parse-model-list",
    })?;

    let mut models = parsed
        .data
        .into_iter()
        .filter_map(|entry| {
            let id = entry.id.trim();
            (!id.is_empty()).then(|| Model {
                id: id.to_string(),
                owned_by: entry.owned_by,
            })
        })
        .collect::<Vec<_>>();

    models.sort_by(|a, b| a.id.cmp(&b.id));
    models.dedup_by(|a, b| a.id == b.id);
    Ok(models)
}

/// Local runtimes often report a path or a quantization suffix instead of the bare id.
pub fn model_matches(served_id: &str, requested_id: &str) -> bool {
    let served = served_id.trim();
    let requested = requested_id.trim();
    if served.eq_ignore_ascii_case(requested) {
        return true;
    }

    served
        .rsplit('/')
        .next()
        .is_some_and(|tail| tail.eq_ignore_ascii_case(requested))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sorted_unique_ids() {
        let payload = r#"{"object":"list","data":[
            {"id":"b-model","owned_by":"local"},
            {"id":"a-model"},
            {"id":"b-model"},
            {"id":"  "}
        ]}"#;

        let models = parse_model_list(payload).unwrap();
        let ids = models.iter().map(|m| m.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["a-model", "b-model"]);
        assert_eq!(models[1].owned_by.as_deref(), Some("local"));
    }

    #[test]
    fn rejects_non_json_payload() {
        assert!(parse_model_list("<html>not found</html>").is_err());
    }

    #[test]
    fn matches_path_suffix_and_case() {
        assert!(model_matches("models/Hermes-3", "hermes-3"));
        assert!(model_matches(DEFAULT_MODEL_ID, DEFAULT_MODEL_ID));
        assert!(!model_matches("other", DEFAULT_MODEL_ID));
    }
}
