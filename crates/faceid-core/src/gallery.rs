//! Labeled gallery of enrolled face embeddings.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity label → normalized embedding.
///
/// Iterates in ascending label order, which is what pins the matcher's
/// tie-break. The gallery does not re-normalize: callers enroll embeddings
/// produced by the extractor (or read back from storage as-is).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceGallery {
    entries: BTreeMap<String, Embedding>,
}

impl FaceGallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `embedding` under `label`, replacing any previous entry.
    ///
    /// Returns the replaced embedding, if there was one.
    pub fn enroll(&mut self, label: impl Into<String>, embedding: Embedding) -> Option<Embedding> {
        let label = label.into();

        if let Some(dim) = self.dimension() {
            let others_differ = self
                .entries
                .iter()
                .any(|(l, e)| l != &label && e.dim() != embedding.dim());
            if others_differ {
                tracing::warn!(
                    label = %label,
                    dim = embedding.dim(),
                    gallery_dim = dim,
                    "enrolled embedding dimension differs from gallery; matching will fail"
                );
            }
        }

        let replaced = self.entries.insert(label.clone(), embedding);
        tracing::debug!(label = %label, replaced = replaced.is_some(), size = self.entries.len(), "enrolled face");
        replaced
    }

    pub fn remove(&mut self, label: &str) -> Option<Embedding> {
        let removed = self.entries.remove(label);
        if removed.is_some() {
            tracing::debug!(label, size = self.entries.len(), "removed face");
        }
        removed
    }

    pub fn get(&self, label: &str) -> Option<&Embedding> {
        self.entries.get(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.contains_key(label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending label order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.entries.iter().map(|(l, e)| (l.as_str(), e))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Embedding length of the first entry, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.entries.values().next().map(Embedding::dim)
    }
}

impl FromIterator<(String, Embedding)> for FaceGallery {
    fn from_iter<I: IntoIterator<Item = (String, Embedding)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
