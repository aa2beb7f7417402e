//! Prompt construction and response parsing shared by all agents.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::error::AgentExtractionError;
use super::traits::{FieldKind, FieldSpec};
use crate::models::{AgentKind, DocumentSpan, ExtractionSource, FieldCandidate};
use crate::pipeline::llm::first_json_object;

/// System prompt for every extraction call.
pub const EXTRACTION_SYSTEM_PROMPT: &str =
    "You are a biomedical information extractor. Output valid JSON only.";

/// Confidence assumed when the model omits one.
pub const DEFAULT_LLM_CONFIDENCE: f32 = 0.7;

fn kind_hint(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "string",
        FieldKind::Number => "number",
        FieldKind::Flag => "true|false",
        FieldKind::List => "[\"item\", ...]",
    }
}

/// Build the extraction prompt for one agent and one patient span.
pub fn build_prompt(agent: AgentKind, fields: &[FieldSpec], span: &DocumentSpan) -> String {
    let field_lines = fields
        .iter()
        .map(|f| format!("- {} ({}): {}", f.name, kind_hint(f.kind), f.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Read the case description of {label} and extract {agent} information. \
Output valid JSON.\n\n\
RULES:\n\
1. Extract ONLY what the text explicitly states about {label}.\n\
2. NEVER infer values that are not written in the text.\n\
3. Omit fields that are not mentioned.\n\
4. Ages are in years, survival in months.\n\
5. confidence is your certainty between 0 and 1.\n\
6. source_excerpt is the shortest verbatim quote supporting the value.\n\n\
FIELDS:\n\
{field_lines}\n\n\
TEXT:\n\
{text}\n\n\
OUTPUT FORMAT:\n\
```json\n\
{{\n\
  \"fields\": {{\n\
    \"<field name>\": {{\"value\": ..., \"confidence\": 0.0-1.0, \"source_excerpt\": \"...\"}}\n\
  }}\n\
}}\n\
```",
        label = span.patient_label,
        agent = agent.as_str(),
        text = span.text.trim(),
    )
}

/// Parse an LLM response into candidates, keeping only known fields.
///
/// Accepts both `{"fields": {name: {value, confidence, source_excerpt}}}` and
/// a flat `{name: value}` object.
pub fn parse_fields(
    fields: &[FieldSpec],
    response: &str,
) -> Result<BTreeMap<String, FieldCandidate>, AgentExtractionError> {
    let reply = first_json_object(response).ok_or_else(|| {
        AgentExtractionError::JsonParsing("No JSON object found in LLM response".to_string())
    })?;
    let object = match reply.get("fields").and_then(Value::as_object) {
        Some(inner) => inner,
        None => &reply,
    };

    let mut out = BTreeMap::new();
    for spec in fields {
        let Some(raw) = object.get(spec.name) else { continue };

        let (value, confidence, excerpt) = match raw {
            Value::Object(entry) if entry.contains_key("value") => (
                entry.get("value").cloned().unwrap_or(Value::Null),
                entry
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .map_or(DEFAULT_LLM_CONFIDENCE, |c| c as f32),
                entry
                    .get("source_excerpt")
                    .or_else(|| entry.get("excerpt"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
            other => (other.clone(), DEFAULT_LLM_CONFIDENCE, String::new()),
        };

        match coerce(spec.kind, value) {
            Some(value) => {
                out.insert(
                    spec.name.to_string(),
                    FieldCandidate::new(value, confidence, excerpt, ExtractionSource::Llm),
                );
            }
            None => {
                tracing::debug!(field = spec.name, "Dropping empty or ill-typed LLM value");
            }
        }
    }
    Ok(out)
}

static LEADING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid regex"));

/// Coerce a raw JSON value to the field's shape. `None` for empty or unusable values.
fn coerce(kind: FieldKind, value: Value) -> Option<Value> {
    match (kind, value) {
        (_, Value::Null) => None,
        (FieldKind::Text, Value::String(s)) => {
            let s = s.trim();
            (!s.is_empty()).then(|| Value::String(s.to_string()))
        }
        (FieldKind::Text, v @ (Value::Number(_) | Value::Bool(_))) => Some(Value::String(v.to_string())),
        (FieldKind::Number, v @ Value::Number(_)) => Some(v),
        (FieldKind::Number, Value::String(s)) => LEADING_NUMBER_RE
            .find(&s)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map(super::patterns::number_value),
        (FieldKind::Flag, v @ Value::Bool(_)) => Some(v),
        (FieldKind::Flag, Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(Value::Bool(true)),
            "false" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldKind::List, Value::Array(items)) => {
            let items: Vec<Value> = items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => Some(Value::String(s.trim().to_string())),
                    _ => None,
                })
                .collect();
            (!items.is_empty()).then_some(Value::Array(items))
        }
        (FieldKind::List, Value::String(s)) => {
            let s = s.trim();
            (!s.is_empty()).then(|| Value::Array(vec![Value::String(s.to_string())]))
        }
        _ => None,
    }
}
