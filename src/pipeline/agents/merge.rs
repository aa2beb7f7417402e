//! Per-field merge of pattern and LLM candidates inside one agent.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::models::{AgentKind, FieldCandidate};

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub fields: BTreeMap<String, FieldCandidate>,
    pub warnings: Vec<String>,
    /// Fields where both sources produced different values.
    pub disagreements: u64,
}

/// Merge the two sources of one agent.
///
/// Higher confidence wins; an exact tie keeps the pattern value. A field
/// produced by only one source is kept as is.
pub fn merge_sources(
    agent: AgentKind,
    pattern: BTreeMap<String, FieldCandidate>,
    mut llm: BTreeMap<String, FieldCandidate>,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    for (name, from_pattern) in pattern {
        let Some(from_llm) = llm.remove(&name) else {
            outcome.fields.insert(name, from_pattern);
            continue;
        };

        if !values_equivalent(&from_pattern.value, &from_llm.value) {
            outcome.disagreements += 1;
            outcome.warnings.push(format!(
                "{agent}: pattern and LLM disagree on '{name}' ({} @ {:.2} vs {} @ {:.2})",
                from_pattern.value, from_pattern.confidence, from_llm.value, from_llm.confidence
            ));
        }

        let kept = if from_llm.confidence > from_pattern.confidence {
            from_llm
        } else {
            from_pattern
        };
        outcome.fields.insert(name, kept);
    }

    outcome.fields.extend(llm);
    outcome
}

/// Loose equality used to decide whether two candidates really disagree.
///
/// Strings compare trimmed and case-insensitively, numbers by value, arrays
/// as case-insensitive sets.
pub fn values_equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.trim().eq_ignore_ascii_case(y.trim()),
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() < 1e-9,
            _ => x == y,
        },
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            match (n.as_f64(), s.trim().parse::<f64>()) {
                (Some(x), Ok(y)) => (x - y).abs() < 1e-9,
                _ => false,
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            let contains = |list: &[Value], item: &Value| list.iter().any(|v| values_equivalent(v, item));
            x.iter().all(|v| contains(y, v)) && y.iter().all(|v| contains(x, v))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionSource;
    use serde_json::json;

    fn pattern(value: Value, confidence: f32) -> FieldCandidate {
        FieldCandidate::pattern(value, confidence, "pattern excerpt")
    }

    fn llm(value: Value, confidence: f32) -> FieldCandidate {
        FieldCandidate::new(value, confidence, "llm excerpt", ExtractionSource::Llm)
    }

    fn one(name: &str, c: FieldCandidate) -> BTreeMap<String, FieldCandidate> {
        BTreeMap::from([(name.to_string(), c)])
    }

    #[test]
    fn higher_confidence_llm_value_wins() {
        let out = merge_sources(
            AgentKind::Demographics,
            one("age", pattern(json!(5), 0.6)),
            one("age", llm(json!(6), 0.9)),
        );
        assert_eq!(out.fields["age"].value, json!(6));
        assert_eq!(out.disagreements, 1);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("'age'"));
    }

    #[test]
    fn higher_confidence_pattern_value_wins() {
        let out = merge_sources(
            AgentKind::Genetics,
            one("exon", pattern(json!(8), 0.9)),
            one("exon", llm(json!(9), 0.8)),
        );
        assert_eq!(out.fields["exon"].value, json!(8));
        assert_eq!(out.fields["exon"].source, ExtractionSource::Pattern);
    }

    #[test]
    fn exact_tie_keeps_pattern() {
        let out = merge_sources(
            AgentKind::Demographics,
            one("sex", pattern(json!("male"), 0.8)),
            one("sex", llm(json!("female"), 0.8)),
        );
        assert_eq!(out.fields["sex"].value, json!("male"));
    }

    #[test]
    fn agreement_is_not_a_disagreement() {
        let out = merge_sources(
            AgentKind::Demographics,
            one("sex", pattern(json!("Male"), 0.9)),
            one("sex", llm(json!("male"), 0.7)),
        );
        assert_eq!(out.disagreements, 0);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn single_source_fields_are_kept() {
        let out = merge_sources(
            AgentKind::Genetics,
            one("gene", pattern(json!("SCN1A"), 0.85)),
            one("inheritance", llm(json!("autosomal dominant"), 0.7)),
        );
        assert_eq!(out.fields.len(), 2);
    }

    #[test]
    fn equivalence_rules() {
        assert!(values_equivalent(&json!(8), &json!(8.0)));
        assert!(values_equivalent(&json!(8), &json!("8")));
        assert!(values_equivalent(&json!(["a", "B"]), &json!(["b", "A"])));
        assert!(!values_equivalent(&json!(["a"]), &json!(["a", "b"])));
        assert!(!values_equivalent(&json!(true), &json!("true")));
    }
}
