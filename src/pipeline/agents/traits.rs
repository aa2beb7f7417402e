//! The capability every domain agent implements.

use std::collections::BTreeMap;

use super::error::AgentExtractionError;
use super::prompt;
use crate::models::{AgentKind, DocumentSpan, FieldCandidate};

/// Shape of a field's value, used to coerce LLM output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Flag,
    List,
}

/// A field an agent is allowed to emit.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub description: &'static str,
}

impl FieldSpec {
    pub const fn new(name: &'static str, kind: FieldKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
        }
    }
}

/// Domain-specific extraction logic.
///
/// Pattern extraction is deterministic and local. The prompt and parser
/// describe the LLM half; [`super::AgentRunner`] combines both.
pub trait DomainAgent: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Fields this agent may emit. LLM output outside this set is ignored.
    fn fields(&self) -> &'static [FieldSpec];

    /// Regex-based extraction over the span text.
    fn extract_patterns(&self, span: &DocumentSpan) -> BTreeMap<String, FieldCandidate>;

    fn build_prompt(&self, span: &DocumentSpan) -> String {
        prompt::build_prompt(self.kind(), self.fields(), span)
    }

    fn parse_response(
        &self,
        response: &str,
    ) -> Result<BTreeMap<String, FieldCandidate>, AgentExtractionError> {
        prompt::parse_fields(self.fields(), response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_trait_is_object_safe() {
        fn _assert_agent(_: &dyn DomainAgent) {}
    }
}
