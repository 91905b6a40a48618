//! Container/codec collaborator seam.
//!
//! The engine never parses containers or touches bitstreams itself; it
//! drives implementations of the traits below. `Demuxer` produces
//! [`Packet`]s, the per-stream decoder traits turn packets into raw
//! library-native frames, and the converter/resampler primitives turn
//! those into presentation-ready [`VideoFrame`] / [`AudioFrame`] data.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::MediaError;

// ============================================================================
// Stream metadata
// ============================================================================

/// Exact rational, used for stream time bases and frame rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// `num/den` as a float; 0.0 when the denominator is zero.
    pub fn as_f64(self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// `den/num` as a float; 0.0 when the numerator is zero.
    pub fn inverse_f64(self) -> f64 {
        if self.num == 0 {
            0.0
        } else {
            self.den as f64 / self.num as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    /// Units of pts/dts values on this stream.
    pub time_base: Rational,
    /// Average frame rate, used to synthesize timestamps when a stream
    /// carries none.
    pub avg_frame_rate: Rational,
    /// Attached-picture stream: exactly one still image, no pts stream.
    pub cover_art: bool,
}

/// Output format the audio device expects; decoded audio is resampled
/// into this before it is queued.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioOutputSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
}

impl AudioOutputSpec {
    pub fn bytes_per_second(&self) -> f64 {
        self.sample_rate as f64 * self.channels as f64 * self.bytes_per_sample as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioStreamInfo {
    pub time_base: Rational,
    pub output: AudioOutputSpec,
}

/// Probe result for an opened source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub duration_secs: f64,
    pub video: Option<VideoStreamInfo>,
    pub audio: Option<AudioStreamInfo>,
}

// ============================================================================
// Data units
// ============================================================================

/// Compressed, container-framed unit of encoded media data.
#[derive(Debug, Clone)]
pub struct Packet {
    pub stream: StreamKind,
    /// Decode timestamp in the stream's time base, when the container
    /// carried one.
    pub dts: Option<i64>,
    pub data: Bytes,
}

/// Library-native decoded picture, prior to pixel-format conversion.
#[derive(Debug, Clone)]
pub struct RawPicture {
    /// Presentation timestamp in the stream's time base, if the codec
    /// produced one.
    pub pts: Option<i64>,
    pub data: Bytes,
}

/// Library-native decoded audio, prior to resampling.
#[derive(Debug, Clone)]
pub struct RawSamples {
    pub pts: Option<i64>,
    /// Sample count per channel in `data`.
    pub samples: usize,
    pub data: Bytes,
}

/// Presentation-ready video frame (RGBA8, tightly packed).
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// Derived presentation timestamp in the video stream's time base.
    pub pts: i64,
}

/// Presentation-ready audio frame in the device's output format.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub data: Bytes,
    /// Derived presentation timestamp in the audio stream's time base.
    pub pts: i64,
}

impl AudioFrame {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Container reader. Owned exclusively by the dispatch thread.
pub trait Demuxer: Send {
    /// Next packet in container order. `Ok(None)` is end-of-stream;
    /// [`MediaError::Again`] means no packet is available right now and
    /// the caller should retry shortly.
    fn read_packet(&mut self) -> Result<Option<Packet>, MediaError>;

    /// Seek to the nearest sync point at or before `target_secs`.
    fn seek(&mut self, target_secs: f64) -> Result<(), MediaError>;
}

/// Video codec context. One packet in, zero or one picture out.
pub trait VideoDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Option<RawPicture>, MediaError>;

    /// Discard internal buffered state (required after a seek).
    fn flush(&mut self);
}

/// Pixel-format conversion primitive (black box, owns scaler state).
pub trait PixelConverter: Send {
    /// Convert a raw picture into a freshly allocated packed RGBA8
    /// buffer of `width * height * 4` bytes.
    fn convert(&mut self, picture: &RawPicture) -> Result<Bytes, MediaError>;
}

/// Audio codec context. One packet in, zero or one sample block out.
pub trait AudioDecoder: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Option<RawSamples>, MediaError>;

    fn flush(&mut self);
}

/// Resampling primitive (black box, owns resampler state).
///
/// The estimate is an upper bound used to size the output buffer; the
/// sample count returned by [`Resampler::convert`] is the truth when
/// sizing the queued frame.
pub trait Resampler: Send {
    /// Upper-bound output sample count for `in_samples` input samples.
    fn estimate_out_samples(&self, in_samples: usize) -> usize;

    /// Byte size of a buffer holding `samples` output samples.
    fn buffer_size(&self, samples: usize) -> usize;

    /// Resample into `out`, returning the actual output sample count.
    fn convert(&mut self, input: &RawSamples, out: &mut [u8]) -> Result<usize, MediaError>;
}

// ============================================================================
// Opened source bundle
// ============================================================================

pub struct VideoPipelineParts {
    pub decoder: Box<dyn VideoDecoder>,
    pub converter: Box<dyn PixelConverter>,
}

pub struct AudioPipelineParts {
    pub decoder: Box<dyn AudioDecoder>,
    pub resampler: Box<dyn Resampler>,
}

/// Everything the collaborator hands over after open-and-probe:
/// stream metadata plus the per-stream codec state the engine will
/// schedule. Construction of this bundle (probing, decoder opening,
/// resampler allocation) is where fatal open errors surface.
pub struct OpenSource {
    pub info: SourceInfo,
    pub demuxer: Box<dyn Demuxer>,
    pub video: Option<VideoPipelineParts>,
    pub audio: Option<AudioPipelineParts>,
}
