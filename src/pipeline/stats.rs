//! Caller-owned statistics accumulators.
//!
//! Agents never touch shared counters. Each agent run fills its own
//! [`AgentStats`]; the orchestrator folds them into the [`PipelineStats`]
//! the caller passed in.

use std::ops::AddAssign;

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub runs: u64,
    pub pattern_fields: u64,
    pub llm_fields: u64,
    pub llm_calls: u64,
    pub llm_failures: u64,
    pub llm_timeouts: u64,
    /// Runs where the LLM was expected but only pattern output survived.
    pub pattern_only_fallbacks: u64,
    pub disagreements: u64,
}

impl AddAssign for AgentStats {
    fn add_assign(&mut self, other: Self) {
        self.runs += other.runs;
        self.pattern_fields += other.pattern_fields;
        self.llm_fields += other.llm_fields;
        self.llm_calls += other.llm_calls;
        self.llm_failures += other.llm_failures;
        self.llm_timeouts += other.llm_timeouts;
        self.pattern_only_fallbacks += other.pattern_only_fallbacks;
        self.disagreements += other.disagreements;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub documents_processed: u64,
    pub documents_failed: u64,
    pub spans: u64,
    pub agents: AgentStats,
    /// Agent results thrown away because the document was cancelled.
    pub agent_results_discarded: u64,
    pub terms_matched: u64,
    pub terms_unmatched: u64,
    pub records_valid: u64,
    pub records_flagged: u64,
    pub records_rejected: u64,
}

impl AddAssign for PipelineStats {
    fn add_assign(&mut self, other: Self) {
        self.documents_processed += other.documents_processed;
        self.documents_failed += other.documents_failed;
        self.spans += other.spans;
        self.agents += other.agents;
        self.agent_results_discarded += other.agent_results_discarded;
        self.terms_matched += other.terms_matched;
        self.terms_unmatched += other.terms_unmatched;
        self.records_valid += other.records_valid;
        self.records_flagged += other.records_flagged;
        self.records_rejected += other.records_rejected;
    }
}
