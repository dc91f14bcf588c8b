//! Face crop → normalized embedding.
//!
//! Preprocesses to the model's declared input contract, runs the model once,
//! checks the output length, and L2-normalizes the result.

use crate::model::EmbeddingModel;
use crate::pixel::{crop, PixelBuffer};
use crate::preprocess::{preprocess, PreprocessError};
use crate::types::{Embedding, FaceRegion};
use std::time::Instant;
use thiserror::Error;

/// FaceNet-512 output length.
pub const EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("expected {expected}-dim embedding, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    /// Every model-side failure lands here; the message is for logs only.
    #[error("inference failed: {0}")]
    InferenceFailed(String),
}

/// A normalized embedding plus the time spent inside the model.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub embedding: Embedding,
    /// Wall-clock milliseconds around the model call only.
    pub latency_ms: f64,
}

/// Runs the preprocess → infer → normalize pipeline for one model instance.
pub struct EmbeddingExtractor<M> {
    model: M,
    embedding_dim: usize,
}

impl<M: EmbeddingModel> EmbeddingExtractor<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            embedding_dim: EMBEDDING_DIM,
        }
    }

    /// Expect `dim` output values instead of [`EMBEDDING_DIM`].
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Extract an embedding from an already-cropped face image.
    pub fn extract(&mut self, buffer: &PixelBuffer<'_>) -> Result<Extraction, ExtractError> {
        let input = preprocess(
            buffer,
            self.model.input_size(),
            self.model.input_type().is_quantized(),
        )?;

        let start = Instant::now();
        let raw = self
            .model
            .invoke(&input)
            .map_err(|e| ExtractError::InferenceFailed(e.to_string()))?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        drop(input);

        let raw = check_output(raw, self.embedding_dim)?;

        let mut embedding = Embedding::from_raw(&raw);
        if let Some(version) = self.model.model_version() {
            embedding = embedding.with_model_version(version);
        }

        tracing::debug!(latency_ms, dim = embedding.dim(), "extracted embedding");

        Ok(Extraction {
            embedding,
            latency_ms,
        })
    }

    /// Crop `region` out of a full frame, then extract.
    pub fn extract_region(
        &mut self,
        frame: &PixelBuffer<'_>,
        region: &FaceRegion,
    ) -> Result<Extraction, ExtractError> {
        let face = crop(frame, region)?;
        self.extract(&face.as_buffer())
    }
}

/// Accept the raw output only if it has exactly `expected` values.
fn check_output(raw: Vec<f32>, expected: usize) -> Result<Vec<f32>, ExtractError> {
    if raw.is_empty() {
        return Err(ExtractError::InferenceFailed(
            "model produced an empty output".to_string(),
        ));
    }
    if raw.len() != expected {
        return Err(ExtractError::ShapeMismatch {
            expected,
            actual: raw.len(),
        });
    }
    Ok(raw)
}
