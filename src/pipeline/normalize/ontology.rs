//! Ontology snapshots and the flat, id-indexed term table.
//!
//! Terms live in one `Vec`; the hierarchy is id lists resolved through
//! `by_id`. Raw vocabularies can contain parent cycles, so every traversal
//! keeps a visited set.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::NormalizationError;
use crate::models::{OntologyTerm, Vocabulary};

/// On-disk form of one vocabulary, loaded once at pipeline construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologySnapshot {
    pub vocabulary: Vocabulary,
    #[serde(default)]
    pub version: Option<String>,
    pub terms: Vec<OntologyTerm>,
    /// Precomputed term vectors keyed by term id.
    #[serde(default)]
    pub embeddings: BTreeMap<String, Vec<f32>>,
}

impl OntologySnapshot {
    pub fn from_json_file(path: &Path) -> Result<Self, NormalizationError> {
        let raw = std::fs::read_to_string(path)?;
        let snapshot: Self = serde_json::from_str(&raw)?;
        tracing::info!(
            path = %path.display(),
            vocabulary = %snapshot.vocabulary,
            terms = snapshot.terms.len(),
            embeddings = snapshot.embeddings.len(),
            "Loaded ontology snapshot"
        );
        Ok(snapshot)
    }
}

/// Lookup key: trimmed, lowercased, inner whitespace collapsed.
pub fn lookup_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug)]
pub struct OntologyTable {
    vocabulary: Vocabulary,
    version: Option<String>,
    terms: Vec<OntologyTerm>,
    by_id: HashMap<String, usize>,
    by_name: HashMap<String, Vec<usize>>,
    by_alias: HashMap<String, Vec<usize>>,
}

impl OntologyTable {
    pub fn new(
        vocabulary: Vocabulary,
        version: Option<String>,
        mut terms: Vec<OntologyTerm>,
    ) -> Result<Self, NormalizationError> {
        // Ids are matched case-insensitively, so uniqueness is too
        let mut by_id = HashMap::with_capacity(terms.len());
        for (idx, term) in terms.iter().enumerate() {
            if term.id.trim().is_empty() {
                return Err(NormalizationError::Snapshot(format!(
                    "{vocabulary} term #{idx} has an empty id"
                )));
            }
            if by_id.insert(term.id.to_uppercase(), idx).is_some() {
                return Err(NormalizationError::Snapshot(format!(
                    "{vocabulary} term id '{}' appears twice",
                    term.id
                )));
            }
        }

        // Back-fill child lists from parent lists.
        let mut dangling = 0usize;
        let links: Vec<(usize, String)> = terms
            .iter()
            .flat_map(|t| t.parent_ids.iter().map(move |p| (p.to_uppercase(), t.id.clone())))
            .filter_map(|(parent, child)| match by_id.get(&parent) {
                Some(&idx) => Some((idx, child)),
                None => {
                    dangling += 1;
                    None
                }
            })
            .collect();
        for (parent_idx, child) in links {
            let children = &mut terms[parent_idx].child_ids;
            if !children.contains(&child) {
                children.push(child);
            }
        }
        if dangling > 0 {
            tracing::warn!(vocabulary = %vocabulary, dangling, "Ontology has parent ids without a term");
        }

        let mut by_name: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_alias: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, term) in terms.iter().enumerate() {
            by_name.entry(lookup_key(&term.canonical_name)).or_default().push(idx);
            for synonym in &term.synonyms {
                let slot = by_alias.entry(lookup_key(synonym)).or_default();
                if !slot.contains(&idx) {
                    slot.push(idx);
                }
            }
        }

        Ok(Self {
            vocabulary,
            version,
            terms,
            by_id,
            by_name,
            by_alias,
        })
    }

    pub fn from_snapshot(snapshot: OntologySnapshot) -> Result<Self, NormalizationError> {
        Self::new(snapshot.vocabulary, snapshot.version, snapshot.terms)
    }

    pub fn vocabulary(&self) -> Vocabulary {
        self.vocabulary
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[OntologyTerm] {
        &self.terms
    }

    pub fn term_at(&self, idx: usize) -> &OntologyTerm {
        &self.terms[idx]
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(&id.trim().to_uppercase()).copied()
    }

    pub fn get(&self, id: &str) -> Option<&OntologyTerm> {
        self.index_of(id).map(|idx| &self.terms[idx])
    }

    /// Term indices whose canonical name equals `key`.
    pub fn by_name(&self, key: &str) -> &[usize] {
        self.by_name.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Term indices listing `key` as a synonym.
    pub fn by_alias(&self, key: &str) -> &[usize] {
        self.by_alias.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parents(&self, id: &str) -> Vec<&OntologyTerm> {
        self.get(id)
            .map(|t| t.parent_ids.iter().filter_map(|p| self.get(p)).collect())
            .unwrap_or_default()
    }

    pub fn children(&self, id: &str) -> Vec<&OntologyTerm> {
        self.get(id)
            .map(|t| t.child_ids.iter().filter_map(|c| self.get(c)).collect())
            .unwrap_or_default()
    }

    /// All ancestors, nearest first, each once. Terminates on cyclic data.
    pub fn ancestors(&self, id: &str) -> Vec<&OntologyTerm> {
        let Some(start) = self.index_of(id) else {
            return Vec::new();
        };
        let mut seen: HashSet<usize> = HashSet::from([start]);
        let mut queue: VecDeque<usize> = VecDeque::from([start]);
        let mut out = Vec::new();

        while let Some(idx) = queue.pop_front() {
            for parent in &self.terms[idx].parent_ids {
                let Some(p) = self.index_of(parent) else { continue };
                if seen.insert(p) {
                    out.push(&self.terms[p]);
                    queue.push_back(p);
                }
            }
        }
        out
    }

    pub fn is_descendant_of(&self, id: &str, ancestor_id: &str) -> bool {
        let Some(target) = self.index_of(ancestor_id) else {
            return false;
        };
        self.ancestors(id)
            .iter()
            .any(|t| self.index_of(&t.id) == Some(target))
    }
}
