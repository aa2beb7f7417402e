//! Pipeline configuration.
//!
//! Loaded once (JSON, every key optional), validated, then shared read-only
//! for the lifetime of the pipeline.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::AgentKind;

/// Application-level constants
pub const APP_NAME: &str = "Phenolens";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "phenolens=info"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Token bucket quota shared by every agent's LLM calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            refill_per_second: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Minimum edit-distance similarity for the fuzzy stage.
    pub fuzzy_threshold: f32,
    /// Minimum cosine similarity for the semantic stage.
    pub semantic_threshold: f32,
    /// Record fields mapped onto HPO.
    pub phenotype_fields: Vec<String>,
    /// Record fields mapped onto HGNC.
    pub gene_fields: Vec<String>,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.85,
            semantic_threshold: 0.75,
            phenotype_fields: vec!["phenotypes".into()],
            gene_fields: vec!["gene".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub model: String,
    pub llm_base_url: String,
    pub llm_request_timeout_secs: u64,
    /// Per-agent budget for the LLM half of an extraction.
    pub agent_timeout_ms: u64,
    pub rate_limit: RateLimitConfig,
    pub enabled_agents: Vec<AgentKind>,
    /// Which agent wins when several emit the same field.
    pub field_ownership: BTreeMap<String, AgentKind>,
    /// Weights for the record confidence average. Missing fields weigh 1.0.
    pub field_weights: BTreeMap<String, f32>,
    pub normalization: NormalizationConfig,
    /// Size of the document-level worker pool.
    pub max_concurrent_documents: usize,
    /// Optional wall-clock budget per document.
    pub document_deadline_ms: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: "medgemma".into(),
            llm_base_url: "http://localhost:11434".into(),
            llm_request_timeout_secs: 120,
            agent_timeout_ms: 30_000,
            rate_limit: RateLimitConfig::default(),
            enabled_agents: AgentKind::all().to_vec(),
            field_ownership: default_field_ownership(),
            field_weights: BTreeMap::new(),
            normalization: NormalizationConfig::default(),
            max_concurrent_documents: 4,
            document_deadline_ms: None,
        }
    }
}

/// Fields that more than one agent may emit, and who owns them.
pub fn default_field_ownership() -> BTreeMap<String, AgentKind> {
    [
        ("sex", AgentKind::Demographics),
        ("age", AgentKind::Demographics),
        ("age_at_onset", AgentKind::Demographics),
        ("age_at_diagnosis", AgentKind::Demographics),
        ("survival_months", AgentKind::Demographics),
        ("vital_status", AgentKind::Demographics),
        ("consanguinity", AgentKind::Demographics),
        ("gene", AgentKind::Genetics),
        ("zygosity", AgentKind::Genetics),
        ("inheritance", AgentKind::Genetics),
        ("nucleotide_change", AgentKind::Genetics),
        ("protein_change", AgentKind::Genetics),
        ("phenotypes", AgentKind::Phenotypes),
        ("treatments", AgentKind::Treatments),
        ("treatment_response", AgentKind::Treatments),
    ]
    .into_iter()
    .map(|(field, agent)| (field.to_string(), agent))
    .collect()
}

// ═══════════════════════════════════════════════════════════
// Loading & validation
// ═══════════════════════════════════════════════════════════

impl PipelineConfig {
    /// Read a JSON config file. Missing keys fall back to defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded pipeline configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = &self.normalization;
        for (name, value) in [
            ("fuzzy_threshold", n.fuzzy_threshold),
            ("semantic_threshold", n.semantic_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.agent_timeout_ms == 0 {
            return Err(ConfigError::Invalid("agent_timeout_ms must be > 0".into()));
        }
        if self.llm_request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "llm_request_timeout_secs must be > 0".into(),
            ));
        }
        if self.document_deadline_ms == Some(0) {
            return Err(ConfigError::Invalid("document_deadline_ms must be > 0".into()));
        }
        if self.max_concurrent_documents == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_documents must be > 0".into(),
            ));
        }
        if self.rate_limit.capacity == 0 {
            return Err(ConfigError::Invalid("rate_limit.capacity must be > 0".into()));
        }
        if !(self.rate_limit.refill_per_second > 0.0) {
            return Err(ConfigError::Invalid(
                "rate_limit.refill_per_second must be > 0".into(),
            ));
        }
        if let Some((field, weight)) = self.field_weights.iter().find(|(_, w)| !(**w >= 0.0)) {
            return Err(ConfigError::Invalid(format!(
                "weight for field '{field}' must be >= 0, got {weight}"
            )));
        }
        Ok(())
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }

    pub fn document_deadline(&self) -> Option<Duration> {
        self.document_deadline_ms.map(Duration::from_millis)
    }

    pub fn is_agent_enabled(&self, agent: AgentKind) -> bool {
        self.enabled_agents.contains(&agent)
    }
}
