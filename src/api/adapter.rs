//! Turns request bodies into prompt batches and completions into rows.
//!
//! A body is a JSON array of objects, each carrying `text` as a string or a
//! list of strings. Lists are flattened in place, so the batch order is the
//! order prompts appear in the body.

use serde_json::Value;

use crate::api::models::ResponseRow;
use crate::error::{Result, ServeError};

pub const TEXT_FIELD: &str = "text";

pub type PromptBatch = Vec<String>;

pub fn parse(raw_body: &[u8]) -> Result<PromptBatch> {
    let body: Value = serde_json::from_slice(raw_body)
        .map_err(|e| ServeError::malformed(format!("body is not valid JSON: {e}")))?;
    parse_value(&body)
}

pub fn parse_value(body: &Value) -> Result<PromptBatch> {
    let requests = body
        .as_array()
        .ok_or_else(|| ServeError::malformed("expected a JSON array of request objects"))?;

    let mut batch = PromptBatch::new();
    for (i, request) in requests.iter().enumerate() {
        let text = request
            .as_object()
            .ok_or_else(|| ServeError::malformed(format!("element {i} is not an object")))?
            .get(TEXT_FIELD)
            .ok_or_else(|| {
                ServeError::malformed(format!("element {i} has no `{TEXT_FIELD}` field"))
            })?;

        match text {
            Value::String(prompt) => batch.push(prompt.clone()),
            Value::Array(prompts) => {
                for prompt in prompts {
                    let prompt = prompt.as_str().ok_or_else(|| {
                        ServeError::malformed(format!(
                            "element {i}: `{TEXT_FIELD}` list must contain only strings"
                        ))
                    })?;
                    batch.push(prompt.to_string());
                }
            }
            _ => {
                return Err(ServeError::malformed(format!(
                    "element {i}: `{TEXT_FIELD}` must be a string or a list of strings"
                )))
            }
        }
    }
    Ok(batch)
}

pub fn render(completions: Vec<String>) -> Vec<ResponseRow> {
    completions
        .into_iter()
        .map(|responses| ResponseRow { responses })
        .collect()
}
