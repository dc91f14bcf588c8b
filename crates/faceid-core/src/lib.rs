//! faceid-core — Face embedding extraction and gallery matching.
//!
//! Converts cropped face images into the FaceNet input contract, runs the
//! embedding model (ONNX Runtime by default), L2-normalizes the output, and
//! matches it against a labeled in-memory gallery by cosine similarity.

pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod onnx;
pub mod pixel;
pub mod preprocess;
pub mod types;

pub use extractor::{EmbeddingExtractor, ExtractError, Extraction, EMBEDDING_DIM};
pub use gallery::FaceGallery;
pub use matcher::{CosineMatcher, MatchError, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use model::{EmbeddingModel, ModelError};
pub use onnx::OnnxEmbeddingModel;
pub use pixel::{crop, OwnedPixelBuffer, PixelBuffer, PixelFormat};
pub use preprocess::{preprocess, ElementType, InputSize, PreprocessError, Tensor};
pub use types::{Embedding, FaceRegion, MatchResult};
