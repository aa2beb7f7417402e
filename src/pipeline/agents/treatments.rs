//! Treatments agent: medications, procedures and response.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::patterns::{excerpt, insert_best, push_list_items, split_list};
use super::traits::{DomainAgent, FieldKind, FieldSpec};
use crate::models::{AgentKind, DocumentSpan, FieldCandidate};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("treatments", FieldKind::List, "drugs or therapies given"),
    FieldSpec::new("procedures", FieldKind::List, "surgical or interventional procedures"),
    FieldSpec::new(
        "treatment_response",
        FieldKind::Text,
        "complete response, partial response, no response or worsened",
    ),
];

static TREATMENT_CUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:treated with|treatment with|therapy with|received|was given|were given|started on|initiated on|managed with|medications? (?:included|were)|administered)\s+([^.;:]+)",
    )
    .expect("valid regex")
});

static PROCEDURE_CUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:underwent|underwent an?|surgical)\s+([^.;:]+)").expect("valid regex")
});

static TRAILING_CLAUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s(?:for|at|since|from|after|until|due to|because|but|without|which|resulting|with)\b|\d",
    )
    .expect("valid regex")
});

static RESPONSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(seizure[- ]free|complete(?:ly)? (?:response|remission|resolved)|resolved|no improvement|no response|poor response|refractory|resistant|ineffective|partial response|good response|improved|improvement|worsened|deteriorated)\b",
    )
    .expect("valid regex")
});

pub struct TreatmentsAgent;

impl TreatmentsAgent {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TreatmentsAgent {
    fn default() -> Self {
        Self::new()
    }
}

fn response_class(phrase: &str) -> &'static str {
    let lower = phrase.to_lowercase();
    if lower.starts_with("seizure") || lower.starts_with("complete") || lower == "resolved" {
        "complete response"
    } else if lower.starts_with("no ")
        || lower.starts_with("poor")
        || matches!(lower.as_str(), "refractory" | "resistant" | "ineffective")
    {
        "no response"
    } else if matches!(lower.as_str(), "worsened" | "deteriorated") {
        "worsened"
    } else {
        "partial response"
    }
}

impl DomainAgent for TreatmentsAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Treatments
    }

    fn fields(&self) -> &'static [FieldSpec] {
        FIELDS
    }

    fn extract_patterns(&self, span: &DocumentSpan) -> BTreeMap<String, FieldCandidate> {
        let text = span.text.as_str();
        let mut fields = BTreeMap::new();

        for (re, name) in [(&*TREATMENT_CUE_RE, "treatments"), (&*PROCEDURE_CUE_RE, "procedures")] {
            for caps in re.captures_iter(text) {
                let (Some(whole), Some(list)) = (caps.get(0), caps.get(1)) else { continue };
                let items = split_list(list.as_str(), &TRAILING_CLAUSE_RE);
                push_list_items(&mut fields, name, items, 0.65, &excerpt(text, whole.start(), whole.end()));
            }
        }

        // A response without any treatment is usually the natural course.
        if fields.contains_key("treatments") {
            if let Some(m) = RESPONSE_RE.find(text) {
                insert_best(
                    &mut fields,
                    "treatment_response",
                    FieldCandidate::pattern(
                        Value::from(response_class(m.as_str())),
                        0.7,
                        &excerpt(text, m.start(), m.end()),
                    ),
                );
            }
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
        TreatmentsAgent::new().extract_patterns(&span)
    }

    #[test]
    fn drugs_and_response() {
        let fields = extract(
            "She was treated with valproate and levetiracetam for 2 years. Seizures were refractory.",
        );
        assert_eq!(fields["treatments"].value, json!(["valproate", "levetiracetam"]));
        assert_eq!(fields["treatment_response"].value, json!("no response"));
    }

    #[test]
    fn dose_is_cut_from_item() {
        let fields = extract("He was started on carbamazepine 200 mg daily.");
        assert_eq!(fields["treatments"].value, json!(["carbamazepine"]));
    }

    #[test]
    fn procedures_are_separate() {
        let fields = extract("He underwent a gastrostomy and spinal fusion.");
        assert_eq!(fields["procedures"].value, json!(["gastrostomy", "spinal fusion"]));
        assert!(!fields.contains_key("treatments"));
    }

    #[test]
    fn response_needs_a_treatment() {
        let fields = extract("Her gait improved spontaneously.");
        assert!(fields.is_empty());
    }

    #[test]
    fn response_classes() {
        assert_eq!(response_class("seizure-free"), "complete response");
        assert_eq!(response_class("no improvement"), "no response");
        assert_eq!(response_class("improved"), "partial response");
        assert_eq!(response_class("deteriorated"), "worsened");
    }
}
