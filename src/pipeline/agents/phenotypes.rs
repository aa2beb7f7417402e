//! Phenotypes agent: free-text clinical features, later mapped onto HPO.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::patterns::{excerpt, push_list_items, split_list};
use super::traits::{DomainAgent, FieldKind, FieldSpec};
use crate::models::{AgentKind, DocumentSpan, FieldCandidate};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("phenotypes", FieldKind::List, "clinical features as short noun phrases"),
    FieldSpec::new("age_at_onset", FieldKind::Number, "age when the first symptoms appeared, in years"),
];

const PATTERN_CONFIDENCE: f32 = 0.6;

static CUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:presented with|presenting with|developed|manifested|exhibited|showed|displayed|suffered from|(?:clinical )?features (?:included|were)|symptoms (?:included|were)|characterized by|complained of|was noted to have)\s+([^.;:]+)",
    )
    .expect("valid regex")
});

static TRAILING_CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s(?:at|since|from|after|before|during|when|which|that|who|requiring|treated|following|until)\b|\d",
    )
    .expect("valid regex")
});

static NOT_A_PHENOTYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:normally|well|mutation|variant|c\.|p\.|gene)\b").expect("valid regex")
});

pub struct PhenotypesAgent;

impl PhenotypesAgent {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PhenotypesAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainAgent for PhenotypesAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Phenotypes
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    /// Onset age is left to the LLM; demographics owns it anyway.
    fn extract_patterns(&self, span: &DocumentSpan) -> BTreeMap<String, FieldCandidate> {
        let text = span.text.as_str();
        let mut fields = BTreeMap::new();

        for caps in CUE_RE.captures_iter(text) {
            let (Some(whole), Some(list)) = (caps.get(0), caps.get(1)) else { continue };
            let items: Vec<String> = split_list(list.as_str(), &TRAILING_CLAUSE_RE)
                .into_iter()
                .filter(|item| !NOT_A_PHENOTYPE_RE.is_match(item))
                .collect();
            push_list_items(
                &mut fields,
                "phenotypes",
                items,
                PATTERN_CONFIDENCE,
                &excerpt(text, whole.start(), whole.end()),
            );
        }

        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract(text: &str) -> BTreeMap<String, FieldCandidate> {
        let span = DocumentSpan {
            patient_label: "Patient 1".into(),
            text: text.into(),
            start_offset: 0,
            end_offset: text.len(),
        };
        PhenotypesAgent::new().extract_patterns(&span)
    }

    #[test]
    fn features_after_cue_phrase() {
        let fields = extract(
            "She presented with seizures, ataxia and global developmental delay at 2 years.",
        );
        assert_eq!(
            fields["phenotypes"].value,
            json!(["seizures", "ataxia", "global developmental delay"])
        );
        assert_eq!(fields["phenotypes"].confidence, PATTERN_CONFIDENCE);
    }

    #[test]
    fn multiple_cues_accumulate_without_duplicates() {
        let fields = extract("He developed hypotonia. Later he exhibited seizures and hypotonia.");
        assert_eq!(fields["phenotypes"].value, json!(["hypotonia", "seizures"]));
    }

    #[test]
    fn negated_and_non_clinical_items_are_dropped() {
        let fields = extract("He developed normally until 3 years. She showed no dysmorphic features.");
        assert!(!fields.contains_key("phenotypes"));
    }

    #[test]
    fn no_cue_no_field() {
        assert!(extract("Family history was unremarkable.").is_empty());
    }
}
