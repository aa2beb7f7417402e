use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AgentKind, ExtractionSource, NormalizationStatus, ValidationStatus};
use super::ontology::{NormalizationMatch, NormalizedTerm};

/// Where a record field came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Agent whose value was kept.
    pub agent: AgentKind,
    pub source: ExtractionSource,
    pub source_excerpt: String,
    /// Other agents whose values were concatenated into this field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<AgentKind>,
    /// Extraction confidence kept aside when normalization zeroed the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordField {
    pub value: serde_json::Value,
    pub confidence: f32,
    pub normalized_term: Option<NormalizedTerm>,
    /// One entry per normalized value, in value order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub normalization: Vec<NormalizationMatch>,
    pub normalization_status: NormalizationStatus,
    pub provenance: Provenance,
}

impl RecordField {
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Numeric view of the value; accepts numbers and numeric strings.
    pub fn as_f64(&self) -> Option<f64> {
        match &self.value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Mean score over normalization attempts; 0 when nothing matched.
    pub fn normalization_confidence(&self) -> f32 {
        if self.normalization.is_empty() {
            return 0.0;
        }
        let total: f32 = self.normalization.iter().map(|m| m.score).sum();
        total / self.normalization.len() as f32
    }
}

/// One patient from one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: Uuid,
    pub patient_label: String,
    pub source_document_id: String,
    pub span_start: usize,
    pub span_end: usize,
    pub fields: BTreeMap<String, RecordField>,
    /// Weighted average of field confidences.
    pub confidence: f32,
    pub validation_status: ValidationStatus,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl PatientRecord {
    pub fn field(&self, name: &str) -> Option<&RecordField> {
        self.fields.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.field(name).and_then(RecordField::as_f64)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(RecordField::as_str)
    }
}

/// Read-only snapshot of a record that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord(Arc<PatientRecord>);

impl ValidatedRecord {
    pub(crate) fn seal(record: PatientRecord) -> Self {
        Self(Arc::new(record))
    }

    pub fn into_inner(self) -> Arc<PatientRecord> {
        self.0
    }
}

impl Deref for ValidatedRecord {
    type Target = PatientRecord;

    fn deref(&self) -> &PatientRecord {
        &self.0
    }
}

impl Serialize for ValidatedRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_ref().serialize(serializer)
    }
}

/// A record dropped by the schema check; its siblings are unaffected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRecord {
    pub record_id: Uuid,
    pub patient_label: String,
    pub source_document_id: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(value: serde_json::Value) -> RecordField {
        RecordField {
            value,
            confidence: 0.9,
            normalized_term: None,
            normalization: vec![],
            normalization_status: NormalizationStatus::NotApplicable,
            provenance: Provenance {
                agent: AgentKind::Demographics,
                source: ExtractionSource::Pattern,
                source_excerpt: String::new(),
                merged_from: vec![],
                extraction_confidence: None,
            },
        }
    }

    #[test]
    fn numeric_view_accepts_strings() {
        assert_eq!(field(json!(12)).as_f64(), Some(12.0));
        assert_eq!(field(json!(" 4.5 ")).as_f64(), Some(4.5));
        assert_eq!(field(json!("unknown")).as_f64(), None);
    }

    #[test]
    fn unnormalized_field_has_zero_normalization_confidence() {
        assert_eq!(field(json!("x")).normalization_confidence(), 0.0);
    }

    #[test]
    fn validated_record_serializes_like_inner() {
        let record = PatientRecord {
            id: Uuid::nil(),
            patient_label: "Patient 1".into(),
            source_document_id: "doc-1".into(),
            span_start: 0,
            span_end: 10,
            fields: BTreeMap::new(),
            confidence: 0.0,
            validation_status: ValidationStatus::Valid,
            warnings: vec![],
            created_at: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
        };
        let sealed = ValidatedRecord::seal(record.clone());
        assert_eq!(
            serde_json::to_value(&sealed).unwrap(),
            serde_json::to_value(&record).unwrap()
        );
        assert_eq!(sealed.patient_label, "Patient 1");
    }
}
