use serde::{Deserialize, Serialize};

use super::clamp_unit;
use super::enums::MatchMethod;

/// One vocabulary entry. Hierarchy links are stored as id lists, never as references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OntologyTerm {
    pub id: String,
    pub canonical_name: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub parent_ids: Vec<String>,
    #[serde(default)]
    pub child_ids: Vec<String>,
    /// How often curators have used this term; drives tie-breaks.
    #[serde(default)]
    pub usage_frequency: u64,
}

/// Audit trail of one normalization attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationMatch {
    pub input_text: String,
    pub matched_term_id: Option<String>,
    pub matched_name: Option<String>,
    pub method: MatchMethod,
    pub score: f32,
}

impl NormalizationMatch {
    pub fn matched(
        input_text: &str,
        term: &OntologyTerm,
        method: MatchMethod,
        score: f32,
    ) -> Self {
        Self {
            input_text: input_text.to_string(),
            matched_term_id: Some(term.id.clone()),
            matched_name: Some(term.canonical_name.clone()),
            method,
            score: clamp_unit(score),
        }
    }

    pub fn unmatched(input_text: &str) -> Self {
        Self {
            input_text: input_text.to_string(),
            matched_term_id: None,
            matched_name: None,
            method: MatchMethod::None,
            score: 0.0,
        }
    }

    pub fn is_match(&self) -> bool {
        self.matched_term_id.is_some()
    }
}

/// Canonical term attached to a scalar record field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTerm {
    pub id: String,
    pub canonical_name: String,
}
