//! ResultAggregator: merges every agent's output for one span into a record.
//!
//! Conflict resolution when two agents emit the same field:
//! 1. the owner from the domain-ownership table wins,
//! 2. otherwise a strictly higher confidence wins,
//! 3. otherwise values are concatenated (deduplicated, agent order).
//!
//! Every discarded value that differs from the kept one leaves a warning.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::models::{
    AgentKind, AgentResult, DocumentSpan, FieldCandidate, NormalizationStatus, PatientRecord,
    Provenance, RecordField, ValidationStatus,
};
use crate::pipeline::agents::values_equivalent;

pub struct ResultAggregator {
    ownership: BTreeMap<String, AgentKind>,
    weights: BTreeMap<String, f32>,
}

impl ResultAggregator {
    pub fn new(ownership: BTreeMap<String, AgentKind>, weights: BTreeMap<String, f32>) -> Self {
        Self { ownership, weights }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.field_ownership.clone(), config.field_weights.clone())
    }

    fn weight(&self, field: &str) -> f32 {
        self.weights.get(field).copied().unwrap_or(1.0)
    }

    /// Build one raw record from the agent results that completed for the span.
    pub fn aggregate(
        &self,
        span: &DocumentSpan,
        source_document_id: &str,
        mut results: Vec<AgentResult>,
    ) -> PatientRecord {
        results.sort_by_key(|r| r.agent);

        let mut warnings: Vec<String> = Vec::new();
        let mut candidates: BTreeMap<String, Vec<(AgentKind, FieldCandidate)>> = BTreeMap::new();
        for result in results {
            warnings.extend(result.warnings);
            for (name, candidate) in result.fields {
                candidates
                    .entry(name)
                    .or_default()
                    .push((result.agent, candidate));
            }
        }

        let mut fields = BTreeMap::new();
        for (name, mut options) in candidates {
            let field = if options.len() == 1 {
                let (agent, candidate) = options.remove(0);
                record_field(agent, candidate, Vec::new())
            } else {
                self.resolve(&name, options, &mut warnings)
            };
            fields.insert(name, field);
        }

        let confidence = self.record_confidence(&fields);

        tracing::debug!(
            patient = %span.patient_label,
            fields = fields.len(),
            warnings = warnings.len(),
            confidence,
            "Aggregated patient record"
        );

        PatientRecord {
            id: Uuid::new_v4(),
            patient_label: span.patient_label.clone(),
            source_document_id: source_document_id.to_string(),
            span_start: span.start_offset,
            span_end: span.end_offset,
            fields,
            confidence,
            validation_status: ValidationStatus::Pending,
            warnings,
            created_at: Utc::now(),
        }
    }

    fn resolve(
        &self,
        name: &str,
        options: Vec<(AgentKind, FieldCandidate)>,
        warnings: &mut Vec<String>,
    ) -> RecordField {
        // (a) domain ownership
        if let Some(owner) = self.ownership.get(name) {
            if let Some(pos) = options.iter().position(|(agent, _)| agent == owner) {
                return keep_one(name, options, pos, "owner", warnings);
            }
        }

        // (b) strictly higher confidence
        let top = options
            .iter()
            .map(|(_, c)| c.confidence)
            .fold(f32::MIN, f32::max);
        let at_top: Vec<usize> = options
            .iter()
            .enumerate()
            .filter(|(_, (_, c))| c.confidence == top)
            .map(|(i, _)| i)
            .collect();
        if at_top.len() == 1 {
            return keep_one(name, options, at_top[0], "higher confidence", warnings);
        }

        // All tied and saying the same thing: nothing to merge.
        let first = &options[at_top[0]].1.value;
        if options.iter().all(|(_, c)| values_equivalent(&c.value, first)) {
            return keep_one(name, options, at_top[0], "agreement", warnings);
        }

        // (c) list concatenation
        let mut items: Vec<Value> = Vec::new();
        for (_, candidate) in &options {
            let values = match &candidate.value {
                Value::Array(list) => list.clone(),
                other => vec![other.clone()],
            };
            for value in values {
                if !items.iter().any(|v| values_equivalent(v, &value)) {
                    items.push(value);
                }
            }
        }
        let agents: Vec<String> = options.iter().map(|(a, _)| a.to_string()).collect();
        warnings.push(format!(
            "Conflict on '{name}' between {} could not be resolved, values concatenated",
            agents.join(", ")
        ));

        let mut options = options;
        let (lead_agent, lead) = options.remove(0);
        let merged_from = options.into_iter().map(|(agent, _)| agent).collect();
        record_field(
            lead_agent,
            FieldCandidate {
                value: Value::Array(items),
                confidence: top,
                ..lead
            },
            merged_from,
        )
    }

    /// Weighted average of field confidences, 0 for an empty record.
    fn record_confidence(&self, fields: &BTreeMap<String, RecordField>) -> f32 {
        let (weighted, total) = fields.iter().fold((0.0f32, 0.0f32), |(sum, total), (name, f)| {
            let w = self.weight(name);
            (sum + w * f.confidence, total + w)
        });
        if total > 0.0 {
            crate::models::clamp_unit(weighted / total)
        } else {
            0.0
        }
    }
}

fn keep_one(
    name: &str,
    mut options: Vec<(AgentKind, FieldCandidate)>,
    keep: usize,
    reason: &str,
    warnings: &mut Vec<String>,
) -> RecordField {
    let (agent, kept) = options.remove(keep);
    for (other, discarded) in &options {
        if !values_equivalent(&discarded.value, &kept.value) {
            warnings.push(format!(
                "Conflict on '{name}': kept {agent} value {} ({reason}), discarded {other} value {}",
                kept.value, discarded.value
            ));
        }
    }
    record_field(agent, kept, Vec::new())
}

fn record_field(agent: AgentKind, candidate: FieldCandidate, merged_from: Vec<AgentKind>) -> RecordField {
    RecordField {
        value: candidate.value,
        confidence: candidate.confidence,
        normalized_term: None,
        normalization: Vec::new(),
        normalization_status: NormalizationStatus::NotApplicable,
        provenance: Provenance {
            agent,
            source: candidate.source,
            source_excerpt: candidate.source_excerpt,
            merged_from,
            extraction_confidence: None,
        },
    }
}
