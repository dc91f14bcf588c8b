//! Embedding model capability seam.

use crate::preprocess::{ElementType, InputSize, Tensor};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0} (export FaceNet to ONNX and set FACEID_MODEL_PATH)")]
    ModelNotFound(String),
    #[error("unsupported model input: {0}")]
    UnsupportedInput(String),
    #[error("invocation failed: {0}")]
    Invocation(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// An inference backend that turns one `[1, H, W, 3]` tensor into one raw
/// output vector.
///
/// `invoke` is not reentrant; it takes `&mut self` so a single instance can
/// never run two inferences at once.
pub trait EmbeddingModel {
    /// Spatial size the model's input tensor declares.
    fn input_size(&self) -> InputSize;

    /// Element type the model's input tensor declares.
    fn input_type(&self) -> ElementType;

    fn invoke(&mut self, input: &Tensor) -> Result<Vec<f32>, ModelError>;

    /// Tag recorded on extracted embeddings.
    fn model_version(&self) -> Option<&str> {
        None
    }
}
