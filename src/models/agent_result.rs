use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::clamp_unit;
use super::enums::{AgentKind, ExtractionSource};

/// One extracted value with its confidence and the text it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCandidate {
    pub value: serde_json::Value,
    pub confidence: f32,
    pub source_excerpt: String,
    pub source: ExtractionSource,
}

impl FieldCandidate {
    pub fn new(
        value: serde_json::Value,
        confidence: f32,
        source_excerpt: impl Into<String>,
        source: ExtractionSource,
    ) -> Self {
        Self {
            value,
            confidence: clamp_unit(confidence),
            source_excerpt: source_excerpt.into(),
            source,
        }
    }

    pub fn pattern(value: serde_json::Value, confidence: f32, excerpt: &str) -> Self {
        Self::new(value, confidence, excerpt, ExtractionSource::Pattern)
    }
}

/// What happened to the LLM half of an agent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum LlmOutcome {
    Used,
    Disabled,
    Failed(String),
    TimedOut,
}

/// Output of one agent for one span. Consumed by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent: AgentKind,
    pub fields: BTreeMap<String, FieldCandidate>,
    pub warnings: Vec<String>,
    pub llm_outcome: LlmOutcome,
}

impl AgentResult {
    pub fn empty(agent: AgentKind, llm_outcome: LlmOutcome) -> Self {
        Self {
            agent,
            fields: BTreeMap::new(),
            warnings: Vec::new(),
            llm_outcome,
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldCandidate> {
        self.fields.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
