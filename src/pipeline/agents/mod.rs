//! Domain extraction agents.
//!
//! Each agent pairs deterministic regex extraction with an LLM call over
//! the same span. [`AgentRunner`] runs both halves and merges them.

pub mod demographics;
pub mod error;
pub mod genetics;
pub mod merge;
pub mod patterns;
pub mod phenotypes;
pub mod prompt;
pub mod runner;
pub mod traits;
pub mod treatments;

pub use demographics::DemographicsAgent;
pub use error::AgentExtractionError;
pub use genetics::GeneticsAgent;
pub use merge::{merge_sources, values_equivalent, MergeOutcome};
pub use phenotypes::PhenotypesAgent;
pub use runner::AgentRunner;
pub use traits::{DomainAgent, FieldKind, FieldSpec};
pub use treatments::TreatmentsAgent;

use std::sync::Arc;

use crate::models::AgentKind;

/// The built-in agent for a kind.
pub fn agent_for(kind: AgentKind) -> Arc<dyn DomainAgent> {
    match kind {
        AgentKind::Demographics => Arc::new(DemographicsAgent::new()),
        AgentKind::Genetics => Arc::new(GeneticsAgent::new()),
        AgentKind::Phenotypes => Arc::new(PhenotypesAgent::new()),
        AgentKind::Treatments => Arc::new(TreatmentsAgent::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_matching_agent() {
        for kind in AgentKind::all() {
            let agent = agent_for(*kind);
            assert_eq!(agent.kind(), *kind);
            assert!(!agent.fields().is_empty());
        }
    }

    #[test]
    fn field_names_are_unique_per_agent() {
        for kind in AgentKind::all() {
            let fields = agent_for(*kind).fields();
            let mut names: Vec<&str> = fields.iter().map(|f| f.name).collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), fields.len(), "{kind} declares a field twice");
        }
    }
}
