use crate::config::Config;
use crate::gallery::SharedGallery;
use faceid_core::{
    CosineMatcher, Embedding, EmbeddingExtractor, EmbeddingModel, ExtractError, Extraction,
    FaceRegion, MatchError, MatchResult, ModelError, OnnxEmbeddingModel, OwnedPixelBuffer,
    DEFAULT_MATCH_THRESHOLD, EMBEDDING_DIM,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),
    #[error("match failed: {0}")]
    Match(#[from] MatchError),
    #[error("gallery lock poisoned")]
    GalleryPoisoned,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Worker settings.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub match_threshold: f32,
    pub queue_depth: usize,
    pub event_capacity: usize,
    pub embedding_dim: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            queue_depth: 4,
            event_capacity: 16,
            embedding_dim: EMBEDDING_DIM,
        }
    }
}

/// One submitted image. `sequence` is assigned by the caller and echoed back.
pub struct Frame {
    pub sequence: u64,
    pub image: OwnedPixelBuffer,
    /// Face rectangle to crop first; `None` means the image is already a face.
    pub region: Option<FaceRegion>,
}

impl Frame {
    pub fn new(sequence: u64, image: OwnedPixelBuffer) -> Self {
        Self {
            sequence,
            image,
            region: None,
        }
    }

    pub fn with_region(mut self, region: FaceRegion) -> Self {
        self.region = Some(region);
        self
    }
}

/// Result of an extract request.
#[derive(Debug, Clone, Serialize)]
pub struct FrameEmbedding {
    pub sequence: u64,
    pub embedding: Embedding,
    pub latency_ms: f64,
}

/// Result of an identify request, also published to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct MatchEvent {
    pub sequence: u64,
    pub result: MatchResult,
    pub latency_ms: f64,
}

/// Result of an enroll request.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollResult {
    pub sequence: u64,
    pub label: String,
    /// An earlier embedding under the same label was overwritten.
    pub replaced: bool,
    pub embedding: Embedding,
    pub latency_ms: f64,
}

/// Messages sent from handles to the engine thread.
enum EngineRequest {
    Extract {
        frame: Frame,
        reply: oneshot::Sender<Result<FrameEmbedding, EngineError>>,
    },
    Identify {
        frame: Frame,
        reply: oneshot::Sender<Result<MatchEvent, EngineError>>,
    },
    Enroll {
        label: String,
        frame: Frame,
        reply: oneshot::Sender<Result<EnrollResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    events: broadcast::Sender<MatchEvent>,
    gallery: SharedGallery,
}

impl EngineHandle {
    /// Extract a normalized embedding without touching the gallery.
    pub async fn extract(&self, frame: Frame) -> Result<FrameEmbedding, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.request(EngineRequest::Extract { frame, reply }, rx).await
    }

    /// Extract and match against the shared gallery.
    pub async fn identify(&self, frame: Frame) -> Result<MatchEvent, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.request(EngineRequest::Identify { frame, reply }, rx).await
    }

    /// Extract and store under `label`, replacing any earlier entry.
    pub async fn enroll(
        &self,
        label: impl Into<String>,
        frame: Frame,
    ) -> Result<EnrollResult, EngineError> {
        let (reply, rx) = oneshot::channel();
        let label = label.into();
        self.request(EngineRequest::Enroll { label, frame, reply }, rx)
            .await
    }

    /// Stream of every identify result, in processing order.
    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.events.subscribe()
    }

    pub fn gallery(&self) -> &SharedGallery {
        &self.gallery
    }

    async fn request<T>(
        &self,
        req: EngineRequest,
        rx: oneshot::Receiver<Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        self.tx
            .send(req)
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Load the ONNX model named by `config` and spawn the engine over `gallery`.
///
/// Fails fast if the model cannot be loaded.
pub fn spawn_engine(config: &Config, gallery: SharedGallery) -> Result<EngineHandle, EngineError> {
    let model_path = config.model_path.to_string_lossy();
    let model = OnnxEmbeddingModel::load(&model_path, config.intra_threads)?;
    tracing::info!(path = %model_path, "FaceNet model loaded");

    spawn_engine_with(model, gallery, config.engine_options())
}

/// Spawn the engine on a dedicated OS thread that owns `model`.
///
/// Requests are processed one at a time in submission order.
pub fn spawn_engine_with<M>(
    model: M,
    gallery: SharedGallery,
    options: EngineOptions,
) -> Result<EngineHandle, EngineError>
where
    M: EmbeddingModel + Send + 'static,
{
    let mut extractor = EmbeddingExtractor::new(model).with_embedding_dim(options.embedding_dim);
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(options.queue_depth.max(1));
    let (events, _) = broadcast::channel::<MatchEvent>(options.event_capacity.max(1));

    let worker_gallery = gallery.clone();
    let worker_events = events.clone();
    let threshold = options.match_threshold;

    std::thread::Builder::new()
        .name("faceid-engine".into())
        .spawn(move || {
            tracing::info!(threshold, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { frame, reply } => {
                        let result = run_extract(&mut extractor, &frame).map(|out| FrameEmbedding {
                            sequence: frame.sequence,
                            embedding: out.embedding,
                            latency_ms: out.latency_ms,
                        });
                        let _ = reply.send(result);
                    }
                    EngineRequest::Identify { frame, reply } => {
                        let result =
                            run_identify(&mut extractor, &worker_gallery, threshold, &frame);
                        if let Ok(event) = &result {
                            // No subscribers is fine.
                            let _ = worker_events.send(event.clone());
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll {
                        label,
                        frame,
                        reply,
                    } => {
                        let result = run_enroll(&mut extractor, &worker_gallery, label, &frame);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle {
        tx,
        events,
        gallery,
    })
}

/// Crop if a region was given, then extract. Failures are logged and the
/// worker moves on to the next request.
fn run_extract<M: EmbeddingModel>(
    extractor: &mut EmbeddingExtractor<M>,
    frame: &Frame,
) -> Result<Extraction, EngineError> {
    let image = frame.image.as_buffer();
    let result = match &frame.region {
        Some(region) => extractor.extract_region(&image, region),
        None => extractor.extract(&image),
    };
    result.map_err(|e| {
        tracing::warn!(sequence = frame.sequence, error = %e, "frame extraction failed");
        EngineError::from(e)
    })
}

fn run_identify<M: EmbeddingModel>(
    extractor: &mut EmbeddingExtractor<M>,
    gallery: &SharedGallery,
    threshold: f32,
    frame: &Frame,
) -> Result<MatchEvent, EngineError> {
    let out = run_extract(extractor, frame)?;
    let result = gallery
        .compare(&CosineMatcher, &out.embedding, threshold)
        .map_err(|e| {
            tracing::warn!(sequence = frame.sequence, error = %e, "gallery match failed");
            e
        })?;

    tracing::debug!(
        sequence = frame.sequence,
        matched = result.is_match(),
        label = result.label(),
        latency_ms = out.latency_ms,
        "identify: frame processed"
    );

    Ok(MatchEvent {
        sequence: frame.sequence,
        result,
        latency_ms: out.latency_ms,
    })
}

fn run_enroll<M: EmbeddingModel>(
    extractor: &mut EmbeddingExtractor<M>,
    gallery: &SharedGallery,
    label: String,
    frame: &Frame,
) -> Result<EnrollResult, EngineError> {
    let out = run_extract(extractor, frame)?;
    let replaced = gallery
        .enroll(label.clone(), out.embedding.clone())?
        .is_some();

    tracing::info!(
        sequence = frame.sequence,
        label = %label,
        replaced,
        "enroll: embedding stored"
    );

    Ok(EnrollResult {
        sequence: frame.sequence,
        label,
        replaced,
        embedding: out.embedding,
        latency_ms: out.latency_ms,
    })
}
