//! # Cadence Core
//!
//! Threaded media decode and A/V synchronization engine.
//!
//! Cadence pulls compressed packets from a container, fans them out to
//! per-stream decode threads through bounded queues, and keeps audio and
//! video presentation aligned against a shared clock. Container parsing
//! and bit-level codec work live behind the traits in [`source`]; this
//! crate owns the scheduling, buffering and synchronization around them.
//!
//! ```text
//! ┌──────────┐   packet queues   ┌──────────────┐   frame queues
//! │ Dispatch │──────────────────►│ Video decode │────────────────► renderer
//! │ thread   │                   ├──────────────┤
//! │          │──────────────────►│ Audio decode │────────────────► audio device
//! └──────────┘                   └──────────────┘
//!       ▲                               │
//!       │        seek / pause           ▼
//!       └────────── shared clock & control flags
//! ```

// ============================================================================
// Building blocks
// ============================================================================
pub mod clock;
pub mod error;
pub mod queue;
pub mod source;

// ============================================================================
// Engine (dispatch + decode loops)
// ============================================================================
pub mod audio;
pub mod engine;
pub mod video;

// ============================================================================
// Synthetic source (tests / demos)
// ============================================================================
pub mod synth;

pub use clock::PlaybackClock;
pub use engine::{Engine, EngineConfig, EngineStats};
pub use error::{EngineError, MediaError};
pub use queue::BoundedQueue;
pub use source::{
    AudioFrame, AudioStreamInfo, OpenSource, Packet, Rational, SourceInfo, StreamKind, VideoFrame,
    VideoStreamInfo,
};
