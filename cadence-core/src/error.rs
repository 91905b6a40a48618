//! Error taxonomy.
//!
//! [`EngineError`] covers failures that make playback impossible and is
//! only produced at construction or start. [`MediaError`] is what the
//! container/codec collaborators report; inside the decode loops these
//! are logged and the offending packet is skipped.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Source has no decodable audio or video stream")]
    NoStreams,
    #[error("Video stream declared but decoder parts missing")]
    MissingVideoPipeline,
    #[error("Audio stream declared but decoder parts missing")]
    MissingAudioPipeline,
    #[error("Engine already started")]
    AlreadyStarted,
    #[error("Failed to spawn engine thread: {0}")]
    Spawn(String),
}

/// Failure reported by a container or codec collaborator.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Open failed: {0}")]
    Open(String),
    #[error("Read failed: {0}")]
    Read(String),
    #[error("No packet available yet")]
    Again,
    #[error("Seek failed: {0}")]
    Seek(String),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Pixel conversion failed: {0}")]
    Convert(String),
    #[error("Resample failed: {0}")]
    Resample(String),
}
