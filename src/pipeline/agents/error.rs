//! Agent-level errors. All of them are recovered by falling back to
//! pattern-only output; none aborts a span.

use std::time::Duration;

use thiserror::Error;

use crate::pipeline::llm::LlmError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentExtractionError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("LLM call timed out after {0:?}")]
    Timeout(Duration),

    #[error("JSON parsing error: {0}")]
    JsonParsing(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_unavailable_surfaces_as_agent_error() {
        let err: AgentExtractionError = LlmError::Unavailable("no provider".into()).into();
        assert!(matches!(err, AgentExtractionError::Llm(LlmError::Unavailable(_))));
        assert!(err.to_string().contains("no provider"));
    }
}
