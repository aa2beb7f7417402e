//! AgentRunner: the `extract(span) -> AgentResult` capability.
//!
//! Wraps one [`DomainAgent`] with the shared LLM client, the shared rate
//! limiter and the per-agent timeout. The LLM half is the only suspension
//! point; when it fails or runs out of time the pattern half is returned.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::error::AgentExtractionError;
use super::merge::merge_sources;
use super::prompt::EXTRACTION_SYSTEM_PROMPT;
use super::traits::DomainAgent;
use crate::models::{AgentKind, AgentResult, DocumentSpan, FieldCandidate, LlmOutcome};
use crate::pipeline::llm::{GenerationConfig, LlmClient, TokenBucket};
use crate::pipeline::stats::AgentStats;

#[derive(Clone)]
pub struct AgentRunner {
    agent: Arc<dyn DomainAgent>,
    llm: Option<Arc<dyn LlmClient>>,
    limiter: Arc<TokenBucket>,
    timeout: Duration,
    generation: GenerationConfig,
}

impl AgentRunner {
    pub fn new(
        agent: Arc<dyn DomainAgent>,
        llm: Option<Arc<dyn LlmClient>>,
        limiter: Arc<TokenBucket>,
        timeout: Duration,
        model: &str,
    ) -> Self {
        Self {
            agent,
            llm,
            limiter,
            timeout,
            generation: GenerationConfig::deterministic(model, EXTRACTION_SYSTEM_PROMPT),
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.agent.kind()
    }

    /// Extract one span. Never fails: LLM problems become warnings and
    /// the result degrades to pattern-only output.
    pub async fn extract(&self, span: &DocumentSpan, stats: &mut AgentStats) -> AgentResult {
        let kind = self.agent.kind();
        stats.runs += 1;

        let pattern_fields = self.agent.extract_patterns(span);
        stats.pattern_fields += pattern_fields.len() as u64;

        let Some(llm) = &self.llm else {
            let mut result = AgentResult::empty(kind, LlmOutcome::Disabled);
            result.fields = pattern_fields;
            return result;
        };

        stats.llm_calls += 1;
        let (llm_fields, outcome, mut warnings) = match self.call_llm(llm.as_ref(), span).await {
            Ok(fields) => {
                stats.llm_fields += fields.len() as u64;
                (fields, LlmOutcome::Used, Vec::new())
            }
            Err(AgentExtractionError::Timeout(after)) => {
                stats.llm_timeouts += 1;
                stats.pattern_only_fallbacks += 1;
                tracing::warn!(
                    agent = %kind,
                    patient = %span.patient_label,
                    timeout_ms = after.as_millis() as u64,
                    "LLM extraction timed out, using pattern results only"
                );
                (
                    BTreeMap::new(),
                    LlmOutcome::TimedOut,
                    vec![format!("{kind}: LLM extraction timed out after {after:?}, pattern-only result")],
                )
            }
            Err(e) => {
                stats.llm_failures += 1;
                stats.pattern_only_fallbacks += 1;
                tracing::warn!(
                    agent = %kind,
                    patient = %span.patient_label,
                    error = %e,
                    "LLM extraction failed, using pattern results only"
                );
                let message = e.to_string();
                (
                    BTreeMap::new(),
                    LlmOutcome::Failed(message.clone()),
                    vec![format!("{kind}: {message}, pattern-only result")],
                )
            }
        };

        let merged = merge_sources(kind, pattern_fields, llm_fields);
        stats.disagreements += merged.disagreements;
        warnings.extend(merged.warnings);

        tracing::debug!(
            agent = %kind,
            patient = %span.patient_label,
            fields = merged.fields.len(),
            "Agent extraction complete"
        );

        AgentResult {
            agent: kind,
            fields: merged.fields,
            warnings,
            llm_outcome: outcome,
        }
    }

    /// Rate-limit wait, generation and parsing all count against the timeout.
    async fn call_llm(
        &self,
        llm: &dyn LlmClient,
        span: &DocumentSpan,
    ) -> Result<BTreeMap<String, FieldCandidate>, AgentExtractionError> {
        let prompt = self.agent.build_prompt(span);
        let call = async {
            self.limiter.acquire().await;
            let raw = llm.generate(&prompt, &self.generation).await?;
            self.agent.parse_response(&raw)
        };

        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| AgentExtractionError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionSource;
    use crate::pipeline::agents::GeneticsAgent;
    use crate::pipeline::llm::LlmError;
    use async_trait::async_trait;
    use serde_json::json;

    struct CannedLlm(String);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<String, LlmError> {
            Ok(self.0.clone())
        }
    }

    struct DownLlm;

    #[async_trait]
    impl LlmClient for DownLlm {
        async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<String, LlmError> {
            Err(LlmError::Connection("http://localhost:11434".into()))
        }
    }

    struct SlowLlm;

    #[async_trait]
    impl LlmClient for SlowLlm {
        async fn generate(&self, _prompt: &str, _config: &GenerationConfig) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("{}".into())
        }
    }

    fn span() -> DocumentSpan {
        let text = "Patient 1 carried a c.845_846delCT mutation in exon 8 of SCN1A.";
        DocumentSpan {
            patient_label: "Patient 1".into(),
            text: text.into(),
            start_offset: 0,
            end_offset: text.len(),
        }
    }

    fn runner(llm: Option<Arc<dyn LlmClient>>, timeout: Duration) -> AgentRunner {
        AgentRunner::new(
            Arc::new(GeneticsAgent::new()),
            llm,
            Arc::new(TokenBucket::new(10, 10.0)),
            timeout,
            "medgemma",
        )
    }

    #[tokio::test]
    async fn without_llm_returns_pattern_fields() {
        let mut stats = AgentStats::default();
        let result = runner(None, Duration::from_secs(1)).extract(&span(), &mut stats).await;

        assert_eq!(result.llm_outcome, LlmOutcome::Disabled);
        assert_eq!(result.get("exon").unwrap().value, json!(8));
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.llm_calls, 0);
    }

    #[tokio::test]
    async fn llm_fields_merge_with_patterns() {
        let llm: Arc<dyn LlmClient> = Arc::new(CannedLlm(
            r#"{"fields": {"inheritance": {"value": "de novo", "confidence": 0.8}}}"#.into(),
        ));
        let mut stats = AgentStats::default();
        let result = runner(Some(llm), Duration::from_secs(1)).extract(&span(), &mut stats).await;

        assert_eq!(result.llm_outcome, LlmOutcome::Used);
        assert_eq!(result.get("inheritance").unwrap().source, ExtractionSource::Llm);
        assert_eq!(result.get("exon").unwrap().source, ExtractionSource::Pattern);
        assert_eq!(stats.llm_fields, 1);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_patterns() {
        let mut stats = AgentStats::default();
        let result = runner(Some(Arc::new(DownLlm)), Duration::from_secs(1))
            .extract(&span(), &mut stats)
            .await;

        assert!(matches!(result.llm_outcome, LlmOutcome::Failed(_)));
        assert_eq!(result.get("nucleotide_change").unwrap().value, json!("c.845_846delCT"));
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(stats.llm_failures, 1);
        assert_eq!(stats.pattern_only_fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn llm_timeout_falls_back_to_patterns() {
        let mut stats = AgentStats::default();
        let result = runner(Some(Arc::new(SlowLlm)), Duration::from_millis(50))
            .extract(&span(), &mut stats)
            .await;

        assert_eq!(result.llm_outcome, LlmOutcome::TimedOut);
        assert_eq!(result.get("type").unwrap().value, json!("deletion"));
        assert_eq!(stats.llm_timeouts, 1);
    }

    #[tokio::test]
    async fn unparseable_llm_output_is_recovered() {
        let llm: Arc<dyn LlmClient> = Arc::new(CannedLlm("I could not find anything.".into()));
        let mut stats = AgentStats::default();
        let result = runner(Some(llm), Duration::from_secs(1)).extract(&span(), &mut stats).await;

        assert!(matches!(result.llm_outcome, LlmOutcome::Failed(ref m) if m.contains("JSON")));
        assert!(!result.is_empty());
    }
}
