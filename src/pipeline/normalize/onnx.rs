//! Sentence-encoder embeddings through ONNX Runtime.
//!
//! Built with the `onnx-embeddings` feature. The model directory holds an
//! all-MiniLM-L6-v2 style export: `model.onnx` plus a HuggingFace
//! `tokenizer.json`.

use std::path::Path;
use std::sync::Mutex;

use ndarray::Array2;
use ort::session::Session;
use ort::value::TensorRef;

use super::embedding::{mean_pool, Embedder};
use super::NormalizationError;

/// Hidden size of the supported sentence encoders.
pub const ONNX_EMBEDDING_DIM: usize = 384;

/// `Session::run` takes `&mut self`, hence the mutex behind `&self` embedding.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
}

impl OnnxEmbedder {
    pub fn load(model_dir: &Path) -> Result<Self, NormalizationError> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        for required in [&model_path, &tokenizer_path] {
            if !required.exists() {
                return Err(NormalizationError::ModelNotFound(required.clone()));
            }
        }

        let init = |e: ort::Error| NormalizationError::ModelInit(e.to_string());
        let session = Session::builder()
            .map_err(init)?
            .with_intra_threads(2)
            .map_err(init)?
            .commit_from_file(&model_path)
            .map_err(init)?;
        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| NormalizationError::ModelInit(format!("tokenizer: {e}")))?;

        tracing::info!(model_dir = %model_dir.display(), "ONNX embedder loaded");
        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }
}

fn as_row(values: &[u32]) -> Result<Array2<i64>, NormalizationError> {
    let row: Vec<i64> = values.iter().map(|&v| i64::from(v)).collect();
    Array2::from_shape_vec((1, row.len()), row)
        .map_err(|e| NormalizationError::Embedding(e.to_string()))
}

impl Embedder for OnnxEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, NormalizationError> {
        let embedding_err = |e: ort::Error| NormalizationError::Embedding(e.to_string());

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| NormalizationError::Embedding(format!("tokenization: {e}")))?;
        let ids = as_row(encoding.get_ids())?;
        let mask = as_row(encoding.get_attention_mask())?;
        let type_ids = as_row(encoding.get_type_ids())?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| NormalizationError::Embedding("ONNX session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![
                TensorRef::from_array_view(&ids).map_err(embedding_err)?,
                TensorRef::from_array_view(&mask).map_err(embedding_err)?,
                TensorRef::from_array_view(&type_ids).map_err(embedding_err)?
            ])
            .map_err(embedding_err)?;

        // [1, tokens, ONNX_EMBEDDING_DIM]
        let (shape, hidden) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(embedding_err)?;
        if shape.len() != 3 || shape[2] as usize != ONNX_EMBEDDING_DIM {
            return Err(NormalizationError::Embedding(format!(
                "unexpected encoder output shape {shape:?}"
            )));
        }

        let mask_row: Vec<i64> = mask.iter().copied().collect();
        mean_pool(hidden, &mask_row, ONNX_EMBEDDING_DIM)
    }

    fn dimension(&self) -> usize {
        ONNX_EMBEDDING_DIM
    }
}
