//! Gallery shared between the engine worker and the application.

use crate::engine::EngineError;
use faceid_core::{Embedding, FaceGallery, MatchResult, Matcher};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Clone-safe handle to one [`FaceGallery`].
///
/// Matching takes a read lock and may overlap with other matches; enrollment
/// takes the write lock and excludes everything else.
#[derive(Clone, Default)]
pub struct SharedGallery {
    inner: Arc<RwLock<FaceGallery>>,
}

impl SharedGallery {
    pub fn new(gallery: FaceGallery) -> Self {
        Self {
            inner: Arc::new(RwLock::new(gallery)),
        }
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, FaceGallery>, EngineError> {
        self.inner.read().map_err(|_| EngineError::GalleryPoisoned)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, FaceGallery>, EngineError> {
        self.inner.write().map_err(|_| EngineError::GalleryPoisoned)
    }

    /// Enroll under the write lock. Returns the replaced embedding, if any.
    pub fn enroll(
        &self,
        label: impl Into<String>,
        embedding: Embedding,
    ) -> Result<Option<Embedding>, EngineError> {
        Ok(self.write()?.enroll(label, embedding))
    }

    /// Match under the read lock.
    pub fn compare(
        &self,
        matcher: &impl Matcher,
        probe: &Embedding,
        threshold: f32,
    ) -> Result<MatchResult, EngineError> {
        let gallery = self.read()?;
        Ok(matcher.compare(probe, &gallery, threshold)?)
    }

    /// Copy of the current contents, e.g. for persisting.
    pub fn snapshot(&self) -> Result<FaceGallery, EngineError> {
        Ok(self.read()?.clone())
    }

    pub fn len(&self) -> Result<usize, EngineError> {
        Ok(self.read()?.len())
    }
}
