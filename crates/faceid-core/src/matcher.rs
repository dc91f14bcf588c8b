//! Nearest-neighbor matching of a probe embedding against a gallery.

use crate::gallery::FaceGallery;
use crate::types::{Embedding, MatchResult};
use thiserror::Error;

/// Default cosine similarity threshold for a positive match, on [-1, 1].
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("gallery entry {label:?} has {actual} dimensions, probe has {expected}")]
    IncompatibleDimensions {
        label: String,
        expected: usize,
        actual: usize,
    },
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &FaceGallery,
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Cosine similarity matcher over unit-length embeddings.
///
/// Scans every entry (O(gallery × dim), no index). The best score is tracked
/// with a strict `>`, so on equal scores the first entry in gallery order
/// wins, i.e. the lexicographically smallest label. A single entry whose
/// length differs from the probe fails the whole call.
///
/// The running best starts below every possible score, so with a threshold
/// at or under -1.0 even an exactly opposite entry (score -1.0) is a match.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &FaceGallery,
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_label: Option<&str> = None;

        for (label, candidate) in gallery.iter() {
            let sim = probe
                .similarity(candidate)
                .ok_or_else(|| MatchError::IncompatibleDimensions {
                    label: label.to_string(),
                    expected: probe.dim(),
                    actual: candidate.dim(),
                })?;
            if sim > best_sim {
                best_sim = sim;
                best_label = Some(label);
            }
        }

        let result = match best_label {
            Some(label) if best_sim >= threshold => MatchResult::Match {
                label: label.to_string(),
                score: best_sim,
            },
            _ => MatchResult::NoMatch,
        };

        tracing::debug!(
            gallery_size = gallery.len(),
            best_similarity = ?best_label.map(|_| best_sim),
            threshold,
            matched = result.is_match(),
            "gallery comparison"
        );

        Ok(result)
    }
}
