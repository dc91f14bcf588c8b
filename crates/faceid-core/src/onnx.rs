//! FaceNet embedding model via ONNX Runtime.
//!
//! Loads a FaceNet-512 export with an NHWC input of `[1, 160, 160, 3]` and a
//! single 512-float output. The input element type is read from the model:
//! `uint8` inputs take raw pixel bytes, `float32` inputs take the
//! standardized tensor.

use crate::model::{EmbeddingModel, ModelError};
use crate::preprocess::{ElementType, InputSize, Tensor};
use ort::session::Session;
use ort::value::{TensorElementType, TensorRef, ValueType};
use std::path::Path;

// --- Named constants ---
const FACENET_INPUT_SIZE: u32 = 160;
const FACENET_CHANNELS: i64 = 3;
const FACENET_MODEL_VERSION: &str = "facenet_512";

/// FaceNet embedding model backed by an `ort` session.
pub struct OnnxEmbeddingModel {
    session: Session,
    input_size: InputSize,
    input_type: ElementType,
    model_version: String,
}

impl OnnxEmbeddingModel {
    /// Load the FaceNet ONNX model from the given path.
    pub fn load(model_path: &str, intra_threads: usize) -> Result<Self, ModelError> {
        if !Path::new(model_path).exists() {
            return Err(ModelError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let (input_type, input_size) = {
            let input = session
                .inputs()
                .first()
                .ok_or_else(|| ModelError::UnsupportedInput("model declares no inputs".into()))?;
            match input.dtype() {
                ValueType::Tensor { ty, shape, .. } => {
                    (element_type(*ty)?, input_size_from_shape(shape)?)
                }
                other => {
                    return Err(ModelError::UnsupportedInput(format!(
                        "expected a tensor input, got {other:?}"
                    )))
                }
            }
        };

        let model_version = Path::new(model_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(FACENET_MODEL_VERSION)
            .to_string();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            width = input_size.width,
            height = input_size.height,
            quantized = input_type.is_quantized(),
            "loaded FaceNet model"
        );

        Ok(Self {
            session,
            input_size,
            input_type,
            model_version,
        })
    }
}

impl EmbeddingModel for OnnxEmbeddingModel {
    fn input_size(&self) -> InputSize {
        self.input_size
    }

    fn input_type(&self) -> ElementType {
        self.input_type
    }

    fn invoke(&mut self, input: &Tensor) -> Result<Vec<f32>, ModelError> {
        let outputs = match input {
            Tensor::Quantized(t) => self
                .session
                .run(ort::inputs![TensorRef::from_array_view(t.view())?])?,
            Tensor::Standardized(t) => self
                .session
                .run(ort::inputs![TensorRef::from_array_view(t.view())?])?,
        };

        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| ModelError::Invocation("model produced no outputs".into()))?;

        let (_, raw_data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Invocation(format!("embedding extraction: {e}")))?;

        Ok(raw_data.to_vec())
    }

    fn model_version(&self) -> Option<&str> {
        Some(&self.model_version)
    }
}

fn element_type(ty: TensorElementType) -> Result<ElementType, ModelError> {
    match ty {
        TensorElementType::Uint8 => Ok(ElementType::Uint8),
        TensorElementType::Float32 => Ok(ElementType::Float32),
        other => Err(ModelError::UnsupportedInput(format!(
            "input element type {other:?} (need uint8 or float32)"
        ))),
    }
}

/// Read `[1, H, W, 3]`. Dynamic spatial dimensions (reported as <= 0) fall
/// back to the FaceNet default of 160.
fn input_size_from_shape(shape: &[i64]) -> Result<InputSize, ModelError> {
    let [_, h, w, c] = shape else {
        return Err(ModelError::UnsupportedInput(format!(
            "expected a rank-4 NHWC input, got shape {shape:?}"
        )));
    };
    if *c > 0 && *c != FACENET_CHANNELS {
        return Err(ModelError::UnsupportedInput(format!(
            "expected {FACENET_CHANNELS} channels in the last dimension, got shape {shape:?}"
        )));
    }

    let dim = |d: i64| if d > 0 { d as u32 } else { FACENET_INPUT_SIZE };
    Ok(InputSize {
        width: dim(*w),
        height: dim(*h),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_model() {
        let result = OnnxEmbeddingModel::load("/nonexistent/facenet_512.onnx", 1);
        assert!(matches!(result, Err(ModelError::ModelNotFound(_))));
    }

    #[test]
    fn test_input_size_static_shape() {
        let size = input_size_from_shape(&[1, 160, 160, 3]).unwrap();
        assert_eq!(size, InputSize { width: 160, height: 160 });

        let size = input_size_from_shape(&[1, 112, 96, 3]).unwrap();
        assert_eq!(size, InputSize { width: 96, height: 112 });
    }

    #[test]
    fn test_input_size_dynamic_dims_fall_back() {
        let size = input_size_from_shape(&[-1, -1, -1, 3]).unwrap();
        assert_eq!(size, InputSize { width: 160, height: 160 });
    }

    #[test]
    fn test_input_size_rejects_nchw() {
        assert!(input_size_from_shape(&[1, 3, 160, 160]).is_err());
    }

    #[test]
    fn test_input_size_rejects_wrong_rank() {
        assert!(input_size_from_shape(&[1, 160, 160]).is_err());
        assert!(input_size_from_shape(&[]).is_err());
    }

    #[test]
    fn test_element_type_mapping() {
        assert_eq!(element_type(TensorElementType::Uint8).unwrap(), ElementType::Uint8);
        assert_eq!(element_type(TensorElementType::Float32).unwrap(), ElementType::Float32);
        assert!(element_type(TensorElementType::Int64).is_err());
    }
}
