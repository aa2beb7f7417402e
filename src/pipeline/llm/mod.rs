//! LLM capability used by the extraction agents.
//!
//! The core only needs `generate(prompt, config)`. Every agent shares one
//! [`TokenBucket`] so that concurrent spans cannot exceed the provider quota.

pub mod ollama;
pub mod rate_limit;
pub mod response;

pub use ollama::OllamaClient;
pub use rate_limit::TokenBucket;
pub use response::{first_json_object, strip_reasoning};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("LLM provider is not reachable at {0}")]
    Connection(String),

    #[error("LLM provider returned error (status {status}): {body}")]
    Provider { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("LLM unavailable: {0}")]
    Unavailable(String),
}

/// Generation settings. Extraction always runs at temperature 0.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub model: String,
    pub system: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl GenerationConfig {
    pub fn deterministic(model: &str, system: &str) -> Self {
        Self {
            model: model.to_string(),
            system: system.to_string(),
            temperature: 0.0,
            max_tokens: None,
        }
    }
}

/// LLM client abstraction (allows mocking)
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_config_uses_zero_temperature() {
        let config = GenerationConfig::deterministic("medgemma", "Output JSON only.");
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.model, "medgemma");
        assert!(config.max_tokens.is_none());
    }

    #[test]
    fn client_trait_is_object_safe() {
        fn _assert_client(_: &dyn LlmClient) {}
    }
}
