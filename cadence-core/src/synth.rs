//! Deterministic synthetic media source.
//!
//! Implements the [`crate::source`] traits without touching a real
//! container or codec: video packets decode to a flat color pattern,
//! audio packets to a 440 Hz sine. Packet timing, stream layout and
//! seek behavior are all exact, which makes this the workhorse for the
//! integration tests and the demo player.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::error::MediaError;
use crate::source::{
    AudioDecoder, AudioOutputSpec, AudioPipelineParts, AudioStreamInfo, Demuxer, OpenSource,
    Packet, PixelConverter, RawPicture, RawSamples, Rational, Resampler, SourceInfo, StreamKind,
    VideoDecoder, VideoPipelineParts, VideoStreamInfo,
};

/// Video pts values use a millisecond time base.
const VIDEO_TIME_BASE: Rational = Rational::new(1, 1000);

#[derive(Debug, Clone)]
pub struct SynthConfig {
    pub duration_secs: f64,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per audio packet.
    pub samples_per_packet: usize,
    pub with_video: bool,
    pub with_audio: bool,
    /// Emit a single attached-picture frame instead of a video stream.
    pub cover_art: bool,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10.0,
            fps: 30,
            width: 64,
            height: 48,
            sample_rate: 44_100,
            channels: 2,
            samples_per_packet: 1024,
            with_video: true,
            with_audio: true,
            cover_art: false,
        }
    }
}

/// Test/demo hooks into the running source.
#[derive(Clone)]
pub struct SynthControl {
    flowing: Arc<AtomicBool>,
    fail_seeks: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
}

impl SynthControl {
    /// While false, `read_packet` reports [`MediaError::Again`], starving
    /// the dispatch loop without ending the stream.
    pub fn set_flowing(&self, flowing: bool) {
        self.flowing.store(flowing, Ordering::SeqCst);
    }

    /// Make every subsequent seek fail.
    pub fn set_fail_seeks(&self, fail: bool) {
        self.fail_seeks.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent read fail, as a damaged container would.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

/// Build an [`OpenSource`] over the synthetic generator. Fails like a
/// real open-and-probe would when the configuration describes an
/// unplayable source.
pub fn open(config: SynthConfig) -> Result<(OpenSource, SynthControl), MediaError> {
    if config.with_video && (config.width == 0 || config.height == 0) {
        return Err(MediaError::Open("zero video dimensions".into()));
    }
    if config.with_video && !config.cover_art && config.fps == 0 {
        return Err(MediaError::Open("zero frame rate".into()));
    }
    if config.with_audio
        && (config.sample_rate == 0 || config.channels == 0 || config.samples_per_packet == 0)
    {
        return Err(MediaError::Open("degenerate audio format".into()));
    }

    let control = SynthControl {
        flowing: Arc::new(AtomicBool::new(true)),
        fail_seeks: Arc::new(AtomicBool::new(false)),
        fail_reads: Arc::new(AtomicBool::new(false)),
    };

    let video_info = config.with_video.then(|| VideoStreamInfo {
        width: config.width,
        height: config.height,
        time_base: VIDEO_TIME_BASE,
        avg_frame_rate: Rational::new(config.fps as i32, 1),
        cover_art: config.cover_art,
    });
    let audio_info = config.with_audio.then(|| AudioStreamInfo {
        time_base: Rational::new(1, config.sample_rate as i32),
        output: AudioOutputSpec {
            sample_rate: config.sample_rate,
            channels: config.channels,
            bytes_per_sample: 2,
        },
    });

    let video = video_info.as_ref().map(|_| VideoPipelineParts {
        decoder: Box::new(SynthVideoDecoder {
            fps: config.fps,
            stamp_pts: !config.cover_art,
        }) as Box<dyn VideoDecoder>,
        converter: Box::new(SynthPixelConverter {
            width: config.width,
            height: config.height,
        }) as Box<dyn PixelConverter>,
    });
    let audio = audio_info.as_ref().map(|_| AudioPipelineParts {
        decoder: Box::new(SynthAudioDecoder {
            sample_rate: config.sample_rate,
            samples_per_packet: config.samples_per_packet,
        }) as Box<dyn AudioDecoder>,
        resampler: Box::new(SynthResampler {
            channels: config.channels,
        }) as Box<dyn Resampler>,
    });

    let demuxer = SynthDemuxer {
        config: config.clone(),
        flowing: control.flowing.clone(),
        fail_seeks: control.fail_seeks.clone(),
        fail_reads: control.fail_reads.clone(),
        next_video: 0,
        next_audio: 0,
        cover_emitted: false,
    };

    let source = OpenSource {
        info: SourceInfo {
            duration_secs: config.duration_secs,
            video: video_info,
            audio: audio_info,
        },
        demuxer: Box::new(demuxer),
        video,
        audio,
    };
    Ok((source, control))
}

// ============================================================================
// Demuxer
// ============================================================================

struct SynthDemuxer {
    config: SynthConfig,
    flowing: Arc<AtomicBool>,
    fail_seeks: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    /// Next video frame index to emit.
    next_video: u64,
    /// Next audio packet index to emit.
    next_audio: u64,
    cover_emitted: bool,
}

impl SynthDemuxer {
    fn video_packet_time(&self) -> Option<f64> {
        if !self.config.with_video {
            return None;
        }
        if self.config.cover_art {
            return (!self.cover_emitted).then_some(0.0);
        }
        let time = self.next_video as f64 / self.config.fps as f64;
        (time < self.config.duration_secs).then_some(time)
    }

    fn audio_packet_time(&self) -> Option<f64> {
        if !self.config.with_audio {
            return None;
        }
        let time = self.next_audio as f64 * self.config.samples_per_packet as f64
            / self.config.sample_rate as f64;
        (time < self.config.duration_secs).then_some(time)
    }
}

fn index_payload(index: u64) -> Bytes {
    Bytes::copy_from_slice(&index.to_le_bytes())
}

fn payload_index(data: &[u8]) -> Result<u64, MediaError> {
    let bytes: [u8; 8] = data
        .try_into()
        .map_err(|_| MediaError::Decode("malformed synthetic payload".into()))?;
    Ok(u64::from_le_bytes(bytes))
}

impl Demuxer for SynthDemuxer {
    fn read_packet(&mut self) -> Result<Option<Packet>, MediaError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MediaError::Read("synthetic read failure".into()));
        }
        if !self.flowing.load(Ordering::SeqCst) {
            return Err(MediaError::Again);
        }

        let video_time = self.video_packet_time();
        let audio_time = self.audio_packet_time();
        let take_video = match (video_time, audio_time) {
            (Some(v), Some(a)) => v <= a,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return Ok(None),
        };

        if take_video {
            let index = self.next_video;
            let dts = if self.config.cover_art {
                self.cover_emitted = true;
                None
            } else {
                self.next_video += 1;
                Some((index as f64 / self.config.fps as f64 * 1000.0).round() as i64)
            };
            Ok(Some(Packet {
                stream: StreamKind::Video,
                dts,
                data: index_payload(index),
            }))
        } else {
            let index = self.next_audio;
            self.next_audio += 1;
            Ok(Some(Packet {
                stream: StreamKind::Audio,
                dts: Some(index as i64 * self.config.samples_per_packet as i64),
                data: index_payload(index),
            }))
        }
    }

    fn seek(&mut self, target_secs: f64) -> Result<(), MediaError> {
        if self.fail_seeks.load(Ordering::SeqCst) {
            return Err(MediaError::Seek("synthetic seek failure".into()));
        }
        self.next_video = (target_secs * self.config.fps as f64).floor() as u64;
        self.next_audio = (target_secs * self.config.sample_rate as f64
            / self.config.samples_per_packet as f64)
            .floor() as u64;
        Ok(())
    }
}

// ============================================================================
// Video decode + conversion
// ============================================================================

struct SynthVideoDecoder {
    fps: u32,
    /// Cover-art pictures carry no timestamps at all.
    stamp_pts: bool,
}

impl VideoDecoder for SynthVideoDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<RawPicture>, MediaError> {
        let index = payload_index(&packet.data)?;
        let pts = self
            .stamp_pts
            .then(|| (index as f64 / self.fps as f64 * 1000.0).round() as i64);
        Ok(Some(RawPicture {
            pts,
            data: packet.data.clone(),
        }))
    }

    fn flush(&mut self) {}
}

struct SynthPixelConverter {
    width: u32,
    height: u32,
}

impl PixelConverter for SynthPixelConverter {
    fn convert(&mut self, picture: &RawPicture) -> Result<Bytes, MediaError> {
        let index = payload_index(&picture.data)
            .map_err(|_| MediaError::Convert("malformed synthetic picture".into()))?;
        let size = (self.width * self.height * 4) as usize;
        let mut rgba = vec![0u8; size];
        let shade = (index % 256) as u8;
        for pixel in rgba.chunks_exact_mut(4) {
            pixel[0] = shade;
            pixel[1] = shade.wrapping_add(85);
            pixel[2] = shade.wrapping_add(170);
            pixel[3] = 0xFF;
        }
        Ok(Bytes::from(rgba))
    }
}

// ============================================================================
// Audio decode + resampling
// ============================================================================

struct SynthAudioDecoder {
    sample_rate: u32,
    samples_per_packet: usize,
}

impl AudioDecoder for SynthAudioDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<RawSamples>, MediaError> {
        let index = payload_index(&packet.data)?;
        let first_sample = index * self.samples_per_packet as u64;

        // Mono f32 440 Hz sine, the "library-native" format.
        let mut data = Vec::with_capacity(self.samples_per_packet * 4);
        for n in 0..self.samples_per_packet {
            let t = (first_sample + n as u64) as f64 / self.sample_rate as f64;
            let sample = (t * 440.0 * std::f64::consts::TAU).sin() as f32 * 0.2;
            data.extend_from_slice(&sample.to_le_bytes());
        }

        Ok(Some(RawSamples {
            pts: Some(first_sample as i64),
            samples: self.samples_per_packet,
            data: Bytes::from(data),
        }))
    }

    fn flush(&mut self) {}
}

/// Converts mono f32 to interleaved s16 at the device channel count.
struct SynthResampler {
    channels: u16,
}

impl Resampler for SynthResampler {
    fn estimate_out_samples(&self, in_samples: usize) -> usize {
        // Padded upper bound, like a real resampler's estimate.
        in_samples + 32
    }

    fn buffer_size(&self, samples: usize) -> usize {
        samples * self.channels as usize * 2
    }

    fn convert(&mut self, input: &RawSamples, out: &mut [u8]) -> Result<usize, MediaError> {
        if input.data.len() < input.samples * 4 {
            return Err(MediaError::Resample("short input buffer".into()));
        }
        let frame_bytes = self.channels as usize * 2;
        for n in 0..input.samples {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&input.data[n * 4..n * 4 + 4]);
            let sample = (f32::from_le_bytes(raw).clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            let encoded = sample.to_le_bytes();
            for ch in 0..self.channels as usize {
                let at = n * frame_bytes + ch * 2;
                out[at..at + 2].copy_from_slice(&encoded);
            }
        }
        Ok(input.samples)
    }
}
