//! Embedding capability for the semantic stage, plus a process-lifetime cache.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::NormalizationError;

/// Default dimension of [`TrigramEmbedder`] vectors.
pub const TRIGRAM_DIM: usize = 256;

/// Text embedding model. Implementations must be deterministic.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, NormalizationError>;
    fn dimension(&self) -> usize;
}

// ═══════════════════════════════════════════════════════════
// TrigramEmbedder
// ═══════════════════════════════════════════════════════════

/// Hashed character-trigram bag, L2-normalized.
///
/// Needs no model files and captures morphological closeness
/// ("hypotonic" vs "hypotonia"), which is what the semantic stage mostly
/// sees once exact, synonym and fuzzy matching have failed.
pub struct TrigramEmbedder {
    dimension: usize,
}

impl TrigramEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(TRIGRAM_DIM)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for TrigramEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

/// FNV-1a, stable across platforms and releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

impl Embedder for TrigramEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, NormalizationError> {
        let mut vec = vec![0.0f32; self.dimension];
        let padded: Vec<char> = format!("  {} ", text.trim().to_lowercase()).chars().collect();

        for window in padded.windows(3) {
            let trigram: String = window.iter().collect();
            let slot = (fnv1a(trigram.as_bytes()) % self.dimension as u64) as usize;
            vec[slot] += 1.0;
        }

        l2_normalize(&mut vec);
        Ok(vec)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ═══════════════════════════════════════════════════════════
// Pooling
// ═══════════════════════════════════════════════════════════

fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vec {
            *x /= norm;
        }
    }
}

/// Attention-masked mean over token states, L2-normalized.
///
/// `hidden` is the row-major `[tokens, dim]` output of a sentence encoder and
/// `mask` holds one 0/1 entry per token.
pub fn mean_pool(hidden: &[f32], mask: &[i64], dim: usize) -> Result<Vec<f32>, NormalizationError> {
    if dim == 0 || hidden.len() != mask.len() * dim {
        return Err(NormalizationError::Embedding(format!(
            "hidden state has {} values, expected {} tokens x {dim}",
            hidden.len(),
            mask.len()
        )));
    }

    let mut pooled = vec![0.0f32; dim];
    let mut mask_sum = 0.0f32;
    for (token, state) in mask.iter().zip(hidden.chunks_exact(dim)) {
        let weight = *token as f32;
        mask_sum += weight;
        for (p, h) in pooled.iter_mut().zip(state) {
            *p += h * weight;
        }
    }

    if mask_sum > 0.0 {
        for p in &mut pooled {
            *p /= mask_sum;
        }
    }
    l2_normalize(&mut pooled);
    Ok(pooled)
}

// ═══════════════════════════════════════════════════════════
// Cache
// ═══════════════════════════════════════════════════════════

/// Memoizes embeddings by input string for the life of the process.
pub struct EmbeddingCache {
    embedder: Arc<dyn Embedder>,
    entries: RwLock<HashMap<String, Arc<Vec<f32>>>>,
}

impl EmbeddingCache {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn embed(&self, text: &str) -> Result<Arc<Vec<f32>>, NormalizationError> {
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = entries.get(text) {
                return Ok(Arc::clone(hit));
            }
        }

        let vector = Arc::new(self.embedder.embed(text)?);
        if vector.len() != self.embedder.dimension() {
            return Err(NormalizationError::Embedding(format!(
                "embedder returned {} values, expected {}",
                vector.len(),
                self.embedder.dimension()
            )));
        }

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let stored = entries
            .entry(text.to_string())
            .or_insert_with(|| Arc::clone(&vector));
        Ok(Arc::clone(stored))
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cosine similarity; 0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
