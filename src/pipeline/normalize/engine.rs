//! One vocabulary's matching cascade: exact → synonym → fuzzy → semantic.
//!
//! The first stage that yields a candidate wins. Within a stage the best
//! candidate is chosen by score, then usage frequency (higher first), then
//! canonical name length (shorter first), then id, so the result never
//! depends on map iteration order.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::embedding::{cosine_similarity, Embedder, EmbeddingCache};
use super::ontology::{lookup_key, OntologySnapshot, OntologyTable};
use super::NormalizationError;
use crate::config::NormalizationConfig;
use crate::models::{clamp_unit, MatchMethod, NormalizationMatch, Vocabulary};

pub struct NormalizationEngine {
    table: OntologyTable,
    /// Term vectors, aligned with the table's term indices.
    vectors: Vec<Option<Arc<Vec<f32>>>>,
    cache: Option<EmbeddingCache>,
    fuzzy_threshold: f32,
    semantic_threshold: f32,
}

impl NormalizationEngine {
    /// Build an engine. Term vectors missing from `precomputed` are
    /// embedded now when an embedder is given; without one the semantic
    /// stage is skipped.
    pub fn new(
        table: OntologyTable,
        precomputed: BTreeMap<String, Vec<f32>>,
        embedder: Option<Arc<dyn Embedder>>,
        fuzzy_threshold: f32,
        semantic_threshold: f32,
    ) -> Result<Self, NormalizationError> {
        let cache = embedder.map(EmbeddingCache::new);
        let mut precomputed = precomputed;
        let mut vectors = Vec::with_capacity(table.len());
        let mut computed = 0usize;

        for term in table.terms() {
            let vector = match precomputed.remove(&term.id) {
                Some(v) => {
                    if let Some(cache) = &cache {
                        if v.len() != cache.dimension() {
                            return Err(NormalizationError::Embedding(format!(
                                "precomputed vector for {} has {} values, embedder produces {}",
                                term.id,
                                v.len(),
                                cache.dimension()
                            )));
                        }
                    }
                    Some(Arc::new(v))
                }
                None => match &cache {
                    Some(cache) => {
                        computed += 1;
                        Some(cache.embed(&lookup_key(&term.canonical_name))?)
                    }
                    None => None,
                },
            };
            vectors.push(vector);
        }

        tracing::debug!(
            vocabulary = %table.vocabulary(),
            terms = table.len(),
            computed,
            "Normalization engine ready"
        );

        Ok(Self {
            table,
            vectors,
            cache,
            fuzzy_threshold: clamp_unit(fuzzy_threshold),
            semantic_threshold: clamp_unit(semantic_threshold),
        })
    }

    pub fn from_snapshot(
        snapshot: OntologySnapshot,
        embedder: Option<Arc<dyn Embedder>>,
        config: &NormalizationConfig,
    ) -> Result<Self, NormalizationError> {
        let embeddings = snapshot.embeddings.clone();
        let table = OntologyTable::from_snapshot(snapshot)?;
        Self::new(
            table,
            embeddings,
            embedder,
            config.fuzzy_threshold,
            config.semantic_threshold,
        )
    }

    pub fn vocabulary(&self) -> Vocabulary {
        self.table.vocabulary()
    }

    pub fn table(&self) -> &OntologyTable {
        &self.table
    }

    /// Run the cascade for one input. Unmatched input keeps its text with score 0.
    pub fn normalize(&self, input: &str) -> NormalizationMatch {
        let key = lookup_key(input);
        if key.is_empty() {
            return NormalizationMatch::unmatched(input);
        }

        let found = self
            .exact(input, &key)
            .map(|hit| (MatchMethod::Exact, hit))
            .or_else(|| self.synonym(&key).map(|hit| (MatchMethod::Synonym, hit)))
            .or_else(|| self.fuzzy(&key).map(|hit| (MatchMethod::Fuzzy, hit)))
            .or_else(|| self.semantic(&key).map(|hit| (MatchMethod::Semantic, hit)));

        match found {
            Some((method, (idx, score))) => {
                let term = self.table.term_at(idx);
                tracing::debug!(
                    vocabulary = %self.vocabulary(),
                    input,
                    term_id = %term.id,
                    method = %method,
                    score,
                    "Normalized term"
                );
                NormalizationMatch::matched(input, term, method, score)
            }
            None => {
                tracing::debug!(vocabulary = %self.vocabulary(), input, "No ontology match");
                NormalizationMatch::unmatched(input)
            }
        }
    }

    /// Normalize inputs in order; output position `i` belongs to input `i`.
    pub fn normalize_batch<S: AsRef<str>>(&self, inputs: &[S]) -> Vec<NormalizationMatch> {
        inputs.iter().map(|s| self.normalize(s.as_ref())).collect()
    }

    // ── Stages ───────────────────────────────────────────────

    fn exact(&self, input: &str, key: &str) -> Option<(usize, f32)> {
        if let Some(idx) = self.table.index_of(input) {
            return Some((idx, 1.0));
        }
        self.pick(self.table.by_name(key).iter().map(|&idx| (idx, 1.0)))
    }

    fn synonym(&self, key: &str) -> Option<(usize, f32)> {
        self.pick(self.table.by_alias(key).iter().map(|&idx| (idx, 1.0)))
    }

    fn fuzzy(&self, key: &str) -> Option<(usize, f32)> {
        let scored = self.table.terms().iter().enumerate().filter_map(|(idx, term)| {
            let best = std::iter::once(&term.canonical_name)
                .chain(&term.synonyms)
                .map(|label| strsim::normalized_levenshtein(key, &lookup_key(label)) as f32)
                .fold(0.0f32, f32::max);
            (best >= self.fuzzy_threshold).then_some((idx, best))
        });
        self.pick(scored)
    }

    fn semantic(&self, key: &str) -> Option<(usize, f32)> {
        let cache = self.cache.as_ref()?;
        let query = match cache.embed(key) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(vocabulary = %self.vocabulary(), error = %e, "Embedding failed, skipping semantic stage");
                return None;
            }
        };
        let scored = self.vectors.iter().enumerate().filter_map(|(idx, vector)| {
            let score = clamp_unit(cosine_similarity(&query, vector.as_deref()?));
            (score >= self.semantic_threshold).then_some((idx, score))
        });
        self.pick(scored)
    }

    /// Best candidate under the tie-break order.
    fn pick(&self, candidates: impl Iterator<Item = (usize, f32)>) -> Option<(usize, f32)> {
        candidates.min_by(|a, b| self.rank(*a, *b))
    }

    /// `Less` means `a` is preferred.
    fn rank(&self, (ia, sa): (usize, f32), (ib, sb): (usize, f32)) -> Ordering {
        let (ta, tb) = (self.table.term_at(ia), self.table.term_at(ib));
        sb.partial_cmp(&sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| tb.usage_frequency.cmp(&ta.usage_frequency))
            .then_with(|| ta.canonical_name.len().cmp(&tb.canonical_name.len()))
            .then_with(|| ta.id.cmp(&tb.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OntologyTerm;
    use crate::pipeline::normalize::TrigramEmbedder;

    fn term(id: &str, name: &str, synonyms: &[&str], frequency: u64) -> OntologyTerm {
        OntologyTerm {
            id: id.into(),
            canonical_name: name.into(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
            parent_ids: vec![],
            child_ids: vec![],
            usage_frequency: frequency,
        }
    }

    fn hpo_terms() -> Vec<OntologyTerm> {
        vec![
            term("HP:0001250", "Seizure", &["seizures", "Epileptic seizure"], 900),
            term("HP:0001251", "Ataxia", &["Cerebellar ataxia"], 500),
            term("HP:0001252", "Hypotonia", &["Muscular hypotonia", "Low muscle tone"], 700),
            term("HP:0000252", "Microcephaly", &["Small head"], 400),
            term("HP:0001263", "Global developmental delay", &[], 800),
        ]
    }

    fn engine_with(terms: Vec<OntologyTerm>, embedder: Option<Arc<dyn Embedder>>) -> NormalizationEngine {
        let table = OntologyTable::new(Vocabulary::Hpo, None, terms).unwrap();
        NormalizationEngine::new(table, BTreeMap::new(), embedder, 0.85, 0.75).unwrap()
    }

    fn engine() -> NormalizationEngine {
        engine_with(hpo_terms(), Some(Arc::new(TrigramEmbedder::new())))
    }

    #[test]
    fn canonical_name_is_exact_and_idempotent() {
        let e = engine();
        let m = e.normalize("Seizure");
        assert_eq!(m.method, MatchMethod::Exact);
        assert_eq!(m.score, 1.0);
        assert_eq!(m.matched_term_id.as_deref(), Some("HP:0001250"));

        let again = e.normalize(m.matched_name.as_deref().unwrap());
        assert_eq!(again, NormalizationMatch { input_text: "Seizure".into(), ..m });
    }

    #[test]
    fn term_id_is_an_exact_match() {
        let m = engine().normalize("hp:0001251");
        assert_eq!(m.method, MatchMethod::Exact);
        assert_eq!(m.matched_name.as_deref(), Some("Ataxia"));
    }

    #[test]
    fn plural_synonym_matches_in_stage_two() {
        let m = engine().normalize("seizures");
        assert_eq!(m.method, MatchMethod::Synonym);
        assert_eq!(m.score, 1.0);
        assert_eq!(m.matched_term_id.as_deref(), Some("HP:0001250"));
    }

    #[test]
    fn misspelling_matches_fuzzily() {
        let m = engine().normalize("microcephally");
        assert_eq!(m.method, MatchMethod::Fuzzy);
        assert_eq!(m.matched_term_id.as_deref(), Some("HP:0000252"));
        assert!(m.score >= 0.85 && m.score < 1.0);
    }

    #[test]
    fn semantic_stage_catches_what_fuzzy_misses() {
        let e = engine_with(
            vec![term("HP:0001263", "Global developmental delay", &[], 0)],
            Some(Arc::new(TrigramEmbedder::new())),
        );
        let m = e.normalize("developmental delay, global");
        assert_eq!(m.method, MatchMethod::Semantic);
        assert!(m.score >= 0.75);
    }

    #[test]
    fn no_match_keeps_input_with_zero_score() {
        let m = engine().normalize("Café-au-lait spots");
        assert_eq!(m.method, MatchMethod::None);
        assert_eq!(m.score, 0.0);
        assert_eq!(m.input_text, "Café-au-lait spots");
        assert!(!m.is_match());
    }

    #[test]
    fn empty_input_is_unmatched() {
        assert_eq!(engine().normalize("   ").method, MatchMethod::None);
    }

    #[test]
    fn tie_break_prefers_frequency_then_shorter_name() {
        let e = engine_with(
            vec![
                term("T:3", "Long name", &["shared"], 5),
                term("T:2", "Short", &["shared"], 5),
                term("T:1", "Rare", &["shared"], 1),
            ],
            None,
        );
        assert_eq!(e.normalize("shared").matched_term_id.as_deref(), Some("T:2"));
    }

    #[test]
    fn batch_is_ordered_and_deterministic() {
        let e = engine();
        let inputs = ["ataxia", "seizures", "unknown thing", "Hypotonia"];
        let first = e.normalize_batch(&inputs);
        let second = e.normalize_batch(&inputs);
        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|m| m.input_text.as_str()).collect::<Vec<_>>(),
            inputs.to_vec()
        );
        assert_eq!(first[2].method, MatchMethod::None);
    }

    #[test]
    fn without_embedder_semantic_stage_is_skipped() {
        let e = engine_with(hpo_terms(), None);
        assert_eq!(e.normalize("developmental delay, global").method, MatchMethod::None);
    }

    #[test]
    fn mismatched_precomputed_vector_is_rejected() {
        let table = OntologyTable::new(Vocabulary::Hpo, None, hpo_terms()).unwrap();
        let precomputed = BTreeMap::from([("HP:0001250".to_string(), vec![1.0, 0.0])]);
        let result = NormalizationEngine::new(
            table,
            precomputed,
            Some(Arc::new(TrigramEmbedder::new())),
            0.85,
            0.75,
        );
        assert!(matches!(result, Err(NormalizationError::Embedding(_))));
    }
}
