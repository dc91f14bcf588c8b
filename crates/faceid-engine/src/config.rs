use crate::engine::EngineOptions;
use faceid_core::{DEFAULT_MATCH_THRESHOLD, EMBEDDING_DIM};
use std::path::PathBuf;
use std::str::FromStr;

/// Engine configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// FaceNet ONNX model file.
    pub model_path: PathBuf,
    /// JSON file holding the enrolled gallery.
    pub gallery_path: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub match_threshold: f32,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
    /// Pending requests the engine queue holds before senders wait.
    pub queue_depth: usize,
    /// Match events buffered per subscriber before the slowest one lags.
    pub event_capacity: usize,
}

impl Config {
    /// Load configuration from `FACEID_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("faceid");

        Self {
            model_path: var("FACEID_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("facenet_512.onnx")),
            gallery_path: var("FACEID_GALLERY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("gallery.json")),
            match_threshold: parse_or(&var, "FACEID_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            intra_threads: parse_or(&var, "FACEID_INTRA_THREADS", 2),
            queue_depth: parse_or(&var, "FACEID_QUEUE_DEPTH", 4),
            event_capacity: parse_or(&var, "FACEID_EVENT_CAPACITY", 16),
        }
    }

    /// Worker settings derived from this configuration.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            match_threshold: self.match_threshold,
            queue_depth: self.queue_depth,
            event_capacity: self.event_capacity,
            embedding_dim: EMBEDDING_DIM,
        }
    }
}

fn parse_or<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
