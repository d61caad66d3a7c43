use crate::error::{PipelineError, StoreError};
use crate::models::{page_label, ScoredRecord, TroubleshootingAnswer};
use crate::traits::{ChatModel, Embedder};
use crate::vector_store::VectorStore;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub const TROUBLESHOOTING_QUERY: &str = "what is the page number of troubleshooting section that mentions Troubleshooting Condition/Problem Console";
pub const NOT_FOUND_OUTPUT: &str = "could not find Troubleshooting page";
pub const DEFAULT_TOP_K: usize = 5;

const SYSTEM_PROMPT: &str = concat!(
    "You are an intelligent assistant that finds a page about Troubleshooting.",
    " You will be given some documents, return the number of the page that is about the Troubleshooting Section.",
    " If you find that page, include page source as citation with page number and return them in JSON format:",
    "\n{'pageNumber': pageNumber, 'pageSource': text_from_documents_related_to_troubleshooting}",
    "\n\n If you cannot find any related page, return:",
    "\n{'output': 'could not find Troubleshooting page'}",
);

pub struct RetrievalAugmentedSearch {
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ChatModel>,
    top_k: usize,
}

impl RetrievalAugmentedSearch {
    pub fn new(embedder: Arc<dyn Embedder>, model: Arc<dyn ChatModel>) -> Self {
        Self {
            embedder,
            model,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn system_prompt() -> &'static str {
        SYSTEM_PROMPT
    }

    pub async fn find_troubleshooting_page(
        &self,
        store: &VectorStore,
    ) -> Result<TroubleshootingAnswer, PipelineError> {
        let query_vector = self.embedder.embed(TROUBLESHOOTING_QUERY).await?;
        let candidates = store.query(&query_vector, self.top_k).await?;
        info!(candidate_count = candidates.len(), "similarity search finished");

        let user_prompt = user_prompt(&candidates)?;
        let raw = self.model.complete_json(SYSTEM_PROMPT, &user_prompt).await?;
        let answer = parse_answer(&raw)?;

        if let Some(page) = answer.page_number() {
            if !candidates.iter().any(|candidate| candidate.id == page) {
                warn!(page, "model answered with a page outside the retrieved candidates");
            }
        }

        Ok(answer)
    }
}

pub fn user_prompt(candidates: &[ScoredRecord]) -> Result<String, StoreError> {
    let related_source = serde_json::to_string_pretty(&json!({ "matches": candidates }))?;
    Ok(format!(
        "Here are the documents below. Return the page number and the text related to Troubleshooting as a JSON data \n\n {related_source}"
    ))
}

/// Accepts exactly `{pageNumber, pageSource}` or `{output}`; anything else is ambiguous.
pub fn parse_answer(raw: &str) -> Result<TroubleshootingAnswer, PipelineError> {
    let value: Value = serde_json::from_str(raw).map_err(|error| {
        PipelineError::AmbiguousAnswer(format!("model output is not valid JSON: {error}"))
    })?;

    let object = value.as_object().ok_or_else(|| {
        PipelineError::AmbiguousAnswer("model output is not a JSON object".to_string())
    })?;

    if let Some(page) = object.get("pageNumber") {
        return found_answer(object, page);
    }

    match object.get("output").and_then(Value::as_str) {
        Some(output) => Ok(TroubleshootingAnswer::NotFound {
            output: output.to_string(),
        }),
        None => Err(PipelineError::AmbiguousAnswer(
            "model output has neither pageNumber nor output".to_string(),
        )),
    }
}

fn found_answer(object: &Map<String, Value>, page: &Value) -> Result<TroubleshootingAnswer, PipelineError> {
    let page_number = match page {
        Value::String(label) if label.trim().chars().all(|c| c.is_ascii_digit()) => label
            .trim()
            .parse::<u32>()
            .ok()
            .map(page_label),
        Value::String(label) => Some(label.trim().to_string()).filter(|label| !label.is_empty()),
        Value::Number(number) => number
            .as_u64()
            .and_then(|number| u32::try_from(number).ok())
            .map(page_label),
        _ => None,
    }
    .ok_or_else(|| PipelineError::AmbiguousAnswer(format!("unusable pageNumber: {page}")))?;

    let page_source = object
        .get("pageSource")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            PipelineError::AmbiguousAnswer("pageSource is missing or not a string".to_string())
        })?;

    Ok(TroubleshootingAnswer::Found {
        page_number,
        page_source: page_source.to_string(),
    })
}
