use crate::normalize::l2_normalize;
use serde::{Deserialize, Serialize};

/// Face rectangle from an external detector, in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// L2-normalized face embedding (512-dimensional for FaceNet).
///
/// Cosine similarity between two embeddings is their plain dot product, so
/// the values are only reachable through constructors that normalize or
/// that explicitly trust their input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f32>,
    /// Model that produced this embedding (e.g., "facenet_512").
    #[serde(default)]
    pub model_version: Option<String>,
}

impl Embedding {
    /// Normalize a raw model output into an embedding.
    pub fn from_raw(raw: &[f32]) -> Self {
        Self {
            values: l2_normalize(raw),
            model_version: None,
        }
    }

    /// Wrap values that are already unit length, e.g. read back from storage.
    pub fn from_normalized(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    /// Cosine similarity in [-1, 1], computed as a dot product.
    ///
    /// Returns `None` when the two embeddings differ in length.
    pub fn similarity(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| a * b)
                .sum(),
        )
    }
}

/// Outcome of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchResult {
    /// Gallery empty, or best similarity below the threshold.
    NoMatch,
    Match {
        label: String,
        /// Cosine similarity of the winning entry.
        score: f32,
    },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Match { .. })
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            MatchResult::Match { label, .. } => Some(label),
            MatchResult::NoMatch => None,
        }
    }

    pub fn score(&self) -> Option<f32> {
        match self {
            MatchResult::Match { score, .. } => Some(*score),
            MatchResult::NoMatch => None,
        }
    }
}
