//! OntologyNormalizer: maps phenotype text onto HPO and gene text onto HGNC.
//!
//! Both vocabularies use the same [`NormalizationEngine`]. Engines are
//! immutable after construction and shared across concurrent documents
//! without locking (the embedding cache has its own lock).

pub mod embedding;
pub mod engine;
pub mod ontology;
#[cfg(feature = "onnx-embeddings")]
pub mod onnx;

pub use embedding::{cosine_similarity, mean_pool, Embedder, EmbeddingCache, TrigramEmbedder};
#[cfg(feature = "onnx-embeddings")]
pub use onnx::{OnnxEmbedder, ONNX_EMBEDDING_DIM};
pub use engine::NormalizationEngine;
pub use ontology::{lookup_key, OntologySnapshot, OntologyTable};

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::config::NormalizationConfig;
use crate::models::{
    NormalizationMatch, NormalizationStatus, NormalizedTerm, PatientRecord, RecordField, Vocabulary,
};
use crate::pipeline::stats::PipelineStats;

#[derive(Error, Debug)]
pub enum NormalizationError {
    #[error("No {0} ontology loaded")]
    OntologyUnavailable(Vocabulary),

    #[error("Invalid ontology snapshot: {0}")]
    Snapshot(String),

    #[error("Cannot read ontology snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed ontology snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Embedding model file not found: {0}")]
    ModelNotFound(std::path::PathBuf),

    #[error("Embedding model failed to load: {0}")]
    ModelInit(String),
}

pub struct OntologyNormalizer {
    hpo: Option<Arc<NormalizationEngine>>,
    hgnc: Option<Arc<NormalizationEngine>>,
    phenotype_fields: Vec<String>,
    gene_fields: Vec<String>,
}

impl OntologyNormalizer {
    pub fn new(
        hpo: Option<Arc<NormalizationEngine>>,
        hgnc: Option<Arc<NormalizationEngine>>,
        config: &NormalizationConfig,
    ) -> Self {
        Self {
            hpo,
            hgnc,
            phenotype_fields: config.phenotype_fields.clone(),
            gene_fields: config.gene_fields.clone(),
        }
    }

    /// Load both snapshots and build their engines.
    pub fn from_snapshots(
        hpo: Option<OntologySnapshot>,
        hgnc: Option<OntologySnapshot>,
        embedder: Option<Arc<dyn Embedder>>,
        config: &NormalizationConfig,
    ) -> Result<Self, NormalizationError> {
        let build = |snapshot: Option<OntologySnapshot>| -> Result<_, NormalizationError> {
            snapshot
                .map(|s| NormalizationEngine::from_snapshot(s, embedder.clone(), config).map(Arc::new))
                .transpose()
        };
        Ok(Self::new(build(hpo)?, build(hgnc)?, config))
    }

    pub fn engine(&self, vocabulary: Vocabulary) -> Result<&NormalizationEngine, NormalizationError> {
        let engine = match vocabulary {
            Vocabulary::Hpo => self.hpo.as_deref(),
            Vocabulary::Hgnc => self.hgnc.as_deref(),
        };
        engine.ok_or(NormalizationError::OntologyUnavailable(vocabulary))
    }

    /// Normalize the configured fields of a record in place.
    ///
    /// Original values are kept; matches are recorded next to them. A
    /// field with no match at all gets confidence 0. A missing vocabulary
    /// degrades every affected field to unmatched and adds one warning per
    /// vocabulary.
    pub fn normalize_record(&self, record: &mut PatientRecord, stats: &mut PipelineStats) {
        let targets = [
            (Vocabulary::Hpo, &self.phenotype_fields),
            (Vocabulary::Hgnc, &self.gene_fields),
        ];

        for (vocabulary, field_names) in targets {
            let engine = self.engine(vocabulary);
            let mut warned = false;

            for name in field_names {
                let Some(field) = record.fields.get_mut(name) else { continue };
                let inputs = normalizable_texts(&field.value);
                if inputs.is_empty() {
                    continue;
                }

                let matches = match &engine {
                    Ok(engine) => engine.normalize_batch(&inputs),
                    Err(e) => {
                        if !warned {
                            tracing::warn!(
                                patient = %record.patient_label,
                                document_id = %record.source_document_id,
                                error = %e,
                                "Normalization degraded to unmatched"
                            );
                            record.warnings.push(format!("{e}, '{name}' left unmatched"));
                            warned = true;
                        }
                        inputs.iter().map(|s| NormalizationMatch::unmatched(s)).collect()
                    }
                };

                let matched = matches.iter().filter(|m| m.is_match()).count();
                stats.terms_matched += matched as u64;
                stats.terms_unmatched += (matches.len() - matched) as u64;
                apply_matches(field, matches);
            }
        }
    }
}

/// Strings to normalize: the value itself, or every string in a list.
fn normalizable_texts(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn apply_matches(field: &mut RecordField, matches: Vec<NormalizationMatch>) {
    let matched = matches.iter().filter(|m| m.is_match()).count();
    field.normalization_status = if matched == 0 {
        NormalizationStatus::Unmatched
    } else if matched == matches.len() {
        NormalizationStatus::Matched
    } else {
        NormalizationStatus::Partial
    };
    // An unmatched field carries no confidence; the extraction score moves to provenance.
    if field.normalization_status == NormalizationStatus::Unmatched && field.confidence > 0.0 {
        field.provenance.extraction_confidence = Some(field.confidence);
        field.confidence = 0.0;
    }

    field.normalized_term = match (&field.value, matches.as_slice()) {
        (Value::String(_), [only]) => match (&only.matched_term_id, &only.matched_name) {
            (Some(id), Some(name)) => Some(NormalizedTerm {
                id: id.clone(),
                canonical_name: name.clone(),
            }),
            _ => None,
        },
        _ => None,
    };
    field.normalization = matches;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AgentKind, ExtractionSource, MatchMethod, OntologyTerm, Provenance, ValidationStatus,
    };
    use serde_json::json;
    use std::collections::BTreeMap;

    fn term(id: &str, name: &str, synonyms: &[&str]) -> OntologyTerm {
        OntologyTerm {
            id: id.into(),
            canonical_name: name.into(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
            parent_ids: vec![],
            child_ids: vec![],
            usage_frequency: 0,
        }
    }

    fn snapshot(vocabulary: Vocabulary, terms: Vec<OntologyTerm>) -> OntologySnapshot {
        OntologySnapshot {
            vocabulary,
            version: None,
            terms,
            embeddings: BTreeMap::new(),
        }
    }

    fn field(value: serde_json::Value, agent: AgentKind) -> RecordField {
        RecordField {
            value,
            confidence: 0.8,
            normalized_term: None,
            normalization: vec![],
            normalization_status: NormalizationStatus::NotApplicable,
            provenance: Provenance {
                agent,
                source: ExtractionSource::Pattern,
                source_excerpt: String::new(),
                merged_from: vec![],
                extraction_confidence: None,
            },
        }
    }

    fn record(fields: Vec<(&str, RecordField)>) -> PatientRecord {
        PatientRecord {
            id: uuid::Uuid::new_v4(),
            patient_label: "Patient 1".into(),
            source_document_id: "doc-1".into(),
            span_start: 0,
            span_end: 10,
            fields: fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            confidence: 0.8,
            validation_status: ValidationStatus::Pending,
            warnings: vec![],
            created_at: chrono::Utc::now(),
        }
    }

    fn normalizer(with_hgnc: bool) -> OntologyNormalizer {
        let hpo = snapshot(
            Vocabulary::Hpo,
            vec![
                term("HP:0001250", "Seizure", &["seizures"]),
                term("HP:0001251", "Ataxia", &[]),
            ],
        );
        let hgnc = with_hgnc.then(|| snapshot(Vocabulary::Hgnc, vec![term("HGNC:10585", "SCN1A", &["NAC1"])]));
        OntologyNormalizer::from_snapshots(
            Some(hpo),
            hgnc,
            Some(Arc::new(TrigramEmbedder::new())),
            &NormalizationConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn phenotype_list_is_partially_matched() {
        let mut rec = record(vec![(
            "phenotypes",
            field(json!(["seizures", "ataxia", "café-au-lait spots"]), AgentKind::Phenotypes),
        )]);
        let mut stats = PipelineStats::default();
        normalizer(true).normalize_record(&mut rec, &mut stats);

        let f = rec.field("phenotypes").unwrap();
        assert_eq!(f.normalization_status, NormalizationStatus::Partial);
        assert_eq!(f.normalization.len(), 3);
        assert_eq!(f.normalization[0].method, MatchMethod::Synonym);
        assert_eq!(f.normalization[1].method, MatchMethod::Exact);
        assert_eq!(f.normalization[2].method, MatchMethod::None);
        // Original text is untouched
        assert_eq!(f.value, json!(["seizures", "ataxia", "café-au-lait spots"]));
        assert!(f.normalized_term.is_none());
        assert_eq!((stats.terms_matched, stats.terms_unmatched), (2, 1));
    }

    #[test]
    fn unmatched_phenotypes_zero_the_field_confidence() {
        let mut rec = record(vec![(
            "phenotypes",
            field(json!(["café-au-lait spots"]), AgentKind::Phenotypes),
        )]);
        normalizer(true).normalize_record(&mut rec, &mut PipelineStats::default());

        let f = rec.field("phenotypes").unwrap();
        assert_eq!(f.normalization_status, NormalizationStatus::Unmatched);
        assert_eq!(f.confidence, 0.0);
        assert_eq!(f.provenance.extraction_confidence, Some(0.8));
        assert_eq!(f.value, json!(["café-au-lait spots"]));
    }

    #[test]
    fn partial_match_keeps_field_confidence() {
        let mut rec = record(vec![(
            "phenotypes",
            field(json!(["ataxia", "café-au-lait spots"]), AgentKind::Phenotypes),
        )]);
        normalizer(true).normalize_record(&mut rec, &mut PipelineStats::default());

        let f = rec.field("phenotypes").unwrap();
        assert_eq!(f.normalization_status, NormalizationStatus::Partial);
        assert_eq!(f.confidence, 0.8);
        assert!(f.provenance.extraction_confidence.is_none());
    }

    #[test]
    fn scalar_gene_gets_normalized_term() {
        let mut rec = record(vec![("gene", field(json!("nac1"), AgentKind::Genetics))]);
        normalizer(true).normalize_record(&mut rec, &mut PipelineStats::default());

        let f = rec.field("gene").unwrap();
        assert_eq!(f.normalization_status, NormalizationStatus::Matched);
        assert_eq!(
            f.normalized_term,
            Some(NormalizedTerm {
                id: "HGNC:10585".into(),
                canonical_name: "SCN1A".into()
            })
        );
        assert_eq!(f.value, json!("nac1"));
    }

    #[test]
    fn missing_vocabulary_degrades_with_warning() {
        let mut rec = record(vec![("gene", field(json!("SCN1A"), AgentKind::Genetics))]);
        normalizer(false).normalize_record(&mut rec, &mut PipelineStats::default());

        let f = rec.field("gene").unwrap();
        assert_eq!(f.normalization_status, NormalizationStatus::Unmatched);
        assert_eq!(f.normalization_confidence(), 0.0);
        assert_eq!(f.confidence, 0.0);
        assert_eq!(f.provenance.extraction_confidence, Some(0.8));
        assert_eq!(rec.warnings.len(), 1);
        assert!(rec.warnings[0].contains("hgnc"));
    }

    #[test]
    fn other_fields_are_not_touched() {
        let mut rec = record(vec![("sex", field(json!("male"), AgentKind::Demographics))]);
        normalizer(true).normalize_record(&mut rec, &mut PipelineStats::default());
        assert_eq!(
            rec.field("sex").unwrap().normalization_status,
            NormalizationStatus::NotApplicable
        );
    }

    #[test]
    fn unavailable_vocabulary_is_an_error() {
        let n = normalizer(false);
        assert!(n.engine(Vocabulary::Hpo).is_ok());
        assert!(matches!(
            n.engine(Vocabulary::Hgnc),
            Err(NormalizationError::OntologyUnavailable(Vocabulary::Hgnc))
        ));
    }
}
