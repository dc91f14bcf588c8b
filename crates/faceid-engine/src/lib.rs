//! faceid-engine — Serialized embedding worker over a shared gallery.
//!
//! Frames are submitted through an [`EngineHandle`] from any task or thread;
//! a single dedicated OS thread owns the embedding model and processes one
//! request at a time. Identification results are also broadcast as
//! [`MatchEvent`]s for display consumers.

pub mod config;
pub mod engine;
pub mod gallery;

pub use config::Config;
pub use engine::{
    spawn_engine, spawn_engine_with, EngineError, EngineHandle, EngineOptions, EnrollResult,
    Frame, FrameEmbedding, MatchEvent,
};
pub use gallery::SharedGallery;
