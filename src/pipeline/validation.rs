//! ValidationLayer: schema and plausibility checks, then sealing.
//!
//! A schema failure rejects only that record. Plausibility problems flag
//! the record and explain why, but the record is still returned.

use serde_json::Value;
use thiserror::Error;

use crate::models::{PatientRecord, RejectedRecord, ValidatedRecord, ValidationStatus};

/// Oldest plausible age in years.
pub const MAX_AGE_YEARS: f64 = 130.0;

pub const ZYGOSITY_VALUES: &[&str] = &[
    "homozygous",
    "heterozygous",
    "hemizygous",
    "compound heterozygous",
    "mosaic",
];

const AGE_FIELDS: &[&str] = &["age_at_onset", "age_at_diagnosis", "age"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("Required field '{0}' is missing")]
    MissingField(&'static str),
}

pub struct ValidationLayer;

impl ValidationLayer {
    pub fn new() -> Self {
        Self
    }

    /// Structural check on identity fields.
    pub fn check_schema(&self, record: &PatientRecord) -> Result<(), ValidationFailure> {
        if record.patient_label.trim().is_empty() {
            return Err(ValidationFailure::MissingField("patient_label"));
        }
        if record.source_document_id.trim().is_empty() {
            return Err(ValidationFailure::MissingField("source_document_id"));
        }
        Ok(())
    }

    /// Cross-field consistency. Returns one message per problem.
    pub fn check_plausibility(&self, record: &PatientRecord) -> Vec<String> {
        let mut problems = Vec::new();

        let mut ages: Vec<(&str, f64)> = Vec::new();
        for &name in AGE_FIELDS {
            let Some(field) = record.field(name) else { continue };
            match field.as_f64() {
                Some(years) if (0.0..=MAX_AGE_YEARS).contains(&years) => ages.push((name, years)),
                Some(years) => problems.push(format!(
                    "Implausible {name}: {years} is outside 0-{MAX_AGE_YEARS} years"
                )),
                None => problems.push(format!("{name} is not numeric: {}", field.value)),
            }
        }
        // Ordered onset <= diagnosis <= current age; check every pair present.
        for (i, (earlier, a)) in ages.iter().enumerate() {
            for (later, b) in &ages[i + 1..] {
                if a > b {
                    problems.push(format!(
                        "Inconsistent ages: {earlier} ({a}) is greater than {later} ({b})"
                    ));
                }
            }
        }

        if let Some(field) = record.field("survival_months") {
            match field.as_f64() {
                Some(months) if months >= 0.0 => {}
                Some(months) => problems.push(format!("Negative survival_months: {months}")),
                None => problems.push(format!("survival_months is not numeric: {}", field.value)),
            }
        }

        if let Some(field) = record.field("zygosity") {
            let known = field
                .as_str()
                .map(|z| z.trim().to_lowercase())
                .is_some_and(|z| ZYGOSITY_VALUES.contains(&z.as_str()));
            if !known {
                problems.push(format!(
                    "Unknown zygosity {}, expected one of: {}",
                    field.value,
                    ZYGOSITY_VALUES.join(", ")
                ));
            }
        }

        if let Some(field) = record.field("exon") {
            let exons: Vec<&Value> = match &field.value {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for exon in exons {
                let n = exon.as_f64().or_else(|| exon.as_str().and_then(|s| s.trim().parse().ok()));
                if !n.is_some_and(|n| n >= 1.0 && n.fract() == 0.0) {
                    problems.push(format!("Invalid exon number: {exon}"));
                }
            }
        }

        problems
    }

    /// Validate and seal. The returned snapshot can no longer be mutated.
    pub fn validate(&self, mut record: PatientRecord) -> Result<ValidatedRecord, RejectedRecord> {
        if let Err(failure) = self.check_schema(&record) {
            tracing::warn!(
                record_id = %record.id,
                document_id = %record.source_document_id,
                error = %failure,
                "Record rejected"
            );
            return Err(RejectedRecord {
                record_id: record.id,
                patient_label: record.patient_label,
                source_document_id: record.source_document_id,
                reason: failure.to_string(),
            });
        }

        let problems = self.check_plausibility(&record);
        if problems.is_empty() {
            record.validation_status = ValidationStatus::Valid;
        } else {
            tracing::info!(
                patient = %record.patient_label,
                document_id = %record.source_document_id,
                problems = problems.len(),
                "Record flagged"
            );
            record.validation_status = ValidationStatus::Flagged;
            record.warnings.extend(problems);
        }
        Ok(ValidatedRecord::seal(record))
    }
}

impl Default for ValidationLayer {
    fn default() -> Self {
        Self::new()
    }
}
