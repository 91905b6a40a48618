//! Engine construction, dispatch loop and transport controls.
//!
//! The dispatch thread owns the demuxer: it reads packets, routes them
//! to the per-stream packet queues, and is the single consumer of seek
//! requests. Decode threads ([`crate::video`], [`crate::audio`]) consume
//! the packet queues and fill the frame queues the presentation layer
//! pulls from.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::PlaybackClock;
use crate::error::{EngineError, MediaError};
use crate::queue::{BoundedQueue, WAIT_SLICE};
use crate::source::{
    AudioDecoder, AudioFrame, Demuxer, OpenSource, Packet, PixelConverter, Resampler, SourceInfo,
    StreamKind, VideoDecoder, VideoFrame,
};

/// Placeholder pacing rate for cover-art streams, which carry no real
/// frame rate.
pub const COVER_ART_FPS: f64 = 30.0;

/// Seeks that land past the end are pulled back this far before it.
const SEEK_EOF_EPSILON: f64 = 0.5;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Max packets buffered per stream between dispatch and decode.
    pub packet_queue_depth: usize,
    /// Max decoded video frames buffered. Small: favors low latency.
    pub video_frame_depth: usize,
    /// Max decoded audio frames buffered. Slightly deeper than video.
    pub audio_frame_depth: usize,
    /// Seek back to the start at end-of-stream instead of stopping.
    pub replay: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            packet_queue_depth: 30,
            video_frame_depth: 5,
            audio_frame_depth: 10,
            replay: false,
        }
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// Condvar-backed pause flag. Loops park here at the top of each
/// iteration instead of spinning, with bounded waits so shutdown is
/// still observed while paused.
pub(crate) struct PauseGate {
    paused: Mutex<bool>,
    cond: Condvar,
}

impl PauseGate {
    fn new() -> Self {
        Self {
            paused: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Flip the flag, waking parked loops on resume. Returns the new
    /// state.
    fn toggle(&self) -> bool {
        let mut paused = self.paused.lock();
        *paused = !*paused;
        if !*paused {
            self.cond.notify_all();
        }
        *paused
    }

    pub(crate) fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    pub(crate) fn wait_while_paused(&self, alive: impl Fn() -> bool) {
        let mut paused = self.paused.lock();
        while *paused && alive() {
            self.cond.wait_for(&mut paused, WAIT_SLICE);
        }
    }
}

/// Pending relative seek, written by any caller, consumed exactly once
/// by the dispatch loop.
struct SeekRequest {
    pending: AtomicBool,
    offset_secs: Mutex<f64>,
}

impl SeekRequest {
    fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            offset_secs: Mutex::new(0.0),
        }
    }

    fn request(&self, offset_secs: f64) {
        *self.offset_secs.lock() = offset_secs;
        self.pending.store(true, Ordering::SeqCst);
    }

    fn take(&self) -> Option<f64> {
        if self.pending.swap(false, Ordering::SeqCst) {
            Some(*self.offset_secs.lock())
        } else {
            None
        }
    }
}

/// One stream's decode pipeline: packet queue in, frame queue out, the
/// codec context behind a mutex so the seek flush can exclude a
/// concurrent decode call.
pub(crate) struct Pipeline<D: ?Sized, F> {
    pub(crate) packets: BoundedQueue<Packet>,
    pub(crate) frames: BoundedQueue<F>,
    pub(crate) codec: Mutex<Box<D>>,
    /// Cleared by the dispatch loop to request decode-thread shutdown.
    pub(crate) running: AtomicBool,
    pub(crate) started: AtomicBool,
    /// Set by the decode thread on clean exit.
    pub(crate) stopped: AtomicBool,
    pub(crate) frames_produced: AtomicU64,
}

impl<D: ?Sized, F> Pipeline<D, F> {
    fn new(codec: Box<D>, packet_depth: usize, frame_depth: usize) -> Self {
        Self {
            packets: BoundedQueue::new(packet_depth),
            frames: BoundedQueue::new(frame_depth),
            codec: Mutex::new(codec),
            running: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            frames_produced: AtomicU64::new(0),
        }
    }
}

pub(crate) struct Shared {
    pub(crate) info: SourceInfo,
    pub(crate) clock: PlaybackClock,
    pub(crate) pause: PauseGate,
    /// Dispatch-loop liveness; false requests engine shutdown.
    pub(crate) running: AtomicBool,
    /// Dispatch loop finished and everything is drained.
    pub(crate) stopped: AtomicBool,
    seek: SeekRequest,
    replay: bool,
    pub(crate) video: Option<Pipeline<dyn VideoDecoder, VideoFrame>>,
    pub(crate) audio: Option<Pipeline<dyn AudioDecoder, AudioFrame>>,
}

// ============================================================================
// Engine
// ============================================================================

/// Queue occupancy and production counters, mostly for tests and
/// diagnostics.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub video_packets_queued: usize,
    pub video_frames_queued: usize,
    pub video_frames_produced: u64,
    pub audio_packets_queued: usize,
    pub audio_frames_queued: usize,
    pub audio_frames_produced: u64,
}

pub struct Engine {
    shared: Arc<Shared>,
    started: AtomicBool,
    // Moved into their threads by start().
    demuxer: Mutex<Option<Box<dyn Demuxer>>>,
    converter: Mutex<Option<Box<dyn PixelConverter>>>,
    resampler: Mutex<Option<Box<dyn Resampler>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Wrap an opened source. Fails when the probe found no stream at
    /// all or the collaborator bundle is inconsistent.
    pub fn open(source: OpenSource, config: EngineConfig) -> Result<Self, EngineError> {
        let OpenSource {
            info,
            demuxer,
            video,
            audio,
        } = source;

        if info.video.is_none() && info.audio.is_none() {
            return Err(EngineError::NoStreams);
        }
        if info.video.is_some() != video.is_some() {
            return Err(EngineError::MissingVideoPipeline);
        }
        if info.audio.is_some() != audio.is_some() {
            return Err(EngineError::MissingAudioPipeline);
        }

        let mut converter = None;
        let video_pipeline = video.map(|parts| {
            converter = Some(parts.converter);
            Pipeline::new(
                parts.decoder,
                config.packet_queue_depth,
                config.video_frame_depth,
            )
        });
        let mut resampler = None;
        let audio_pipeline = audio.map(|parts| {
            resampler = Some(parts.resampler);
            Pipeline::new(
                parts.decoder,
                config.packet_queue_depth,
                config.audio_frame_depth,
            )
        });

        let clock = PlaybackClock::new(&info);
        Ok(Self {
            shared: Arc::new(Shared {
                info,
                clock,
                pause: PauseGate::new(),
                running: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                seek: SeekRequest::new(),
                replay: config.replay,
                video: video_pipeline,
                audio: audio_pipeline,
            }),
            started: AtomicBool::new(false),
            demuxer: Mutex::new(Some(demuxer)),
            converter: Mutex::new(converter),
            resampler: Mutex::new(resampler),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the dispatch and decode threads. May only be called once.
    pub fn start(&self) -> Result<(), EngineError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }
        let demuxer = self
            .demuxer
            .lock()
            .take()
            .ok_or(EngineError::AlreadyStarted)?;

        self.shared.running.store(true, Ordering::SeqCst);
        let mut threads = self.threads.lock();

        if self.shared.video.is_some() {
            let converter = self.converter.lock().take().expect("converter present");
            let shared = self.shared.clone();
            shared
                .video
                .as_ref()
                .expect("video pipeline")
                .running
                .store(true, Ordering::SeqCst);
            let handle = thread::Builder::new()
                .name("cadence-video".into())
                .spawn(move || crate::video::decode_loop(&shared, converter))
                .map_err(|e| EngineError::Spawn(e.to_string()))?;
            threads.push(handle);
        }
        if self.shared.audio.is_some() {
            let resampler = self.resampler.lock().take().expect("resampler present");
            let shared = self.shared.clone();
            shared
                .audio
                .as_ref()
                .expect("audio pipeline")
                .running
                .store(true, Ordering::SeqCst);
            let handle = thread::Builder::new()
                .name("cadence-audio".into())
                .spawn(move || crate::audio::decode_loop(&shared, resampler))
                .map_err(|e| EngineError::Spawn(e.to_string()))?;
            threads.push(handle);
        }

        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("cadence-dispatch".into())
            .spawn(move || dispatch_loop(&shared, demuxer))
            .map_err(|e| EngineError::Spawn(e.to_string()))?;
        threads.push(handle);
        Ok(())
    }

    /// Request shutdown. Asynchronous: completion is observable via
    /// [`Engine::is_stopped`]; `Drop` joins the threads.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// Toggle the pause flag for all three threads.
    pub fn pause(&self) {
        let paused = self.shared.pause.toggle();
        debug!(paused, "pause toggled");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.pause.is_paused()
    }

    /// True once the dispatch loop has exited and drained the queues.
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Queue a relative seek; negative offsets seek backward. Consumed
    /// by the dispatch loop on its next iteration.
    pub fn seek(&self, offset_secs: f64) {
        self.shared.seek.request(offset_secs);
    }

    // ------------------------------------------------------------------
    // Frame pull interface
    // ------------------------------------------------------------------

    /// Blocking video frame pull.
    ///
    /// Tie-break: with more than one frame queued the oldest is removed;
    /// with exactly one it is peeked and left in place, so a stalled
    /// renderer keeps redisplaying the last frame instead of stalling
    /// the decode pipeline. Whether that is the right policy under a
    /// persistently slow renderer is an open product question; the
    /// behavior is kept as-is for now.
    ///
    /// Returns `None` once the engine is shutting down with nothing
    /// queued.
    pub fn pull_video_frame(&self) -> Option<VideoFrame> {
        let pipeline = self.shared.video.as_ref()?;
        let alive = || self.shared.running.load(Ordering::SeqCst);
        if pipeline.frames.len() > 1 {
            pipeline.frames.pop_while(alive)
        } else {
            pipeline.frames.peek_while(alive)
        }
    }

    /// Blocking audio frame pull; always removes.
    pub fn pull_audio_frame(&self) -> Option<AudioFrame> {
        let pipeline = self.shared.audio.as_ref()?;
        pipeline
            .frames
            .pop_while(|| self.shared.running.load(Ordering::SeqCst))
    }

    /// Non-blocking: is at least one audio frame buffered? Lets the
    /// device callback avoid blocking when nothing is queued.
    pub fn audio_frame_ready(&self) -> bool {
        self.shared
            .audio
            .as_ref()
            .is_some_and(|p| !p.frames.is_empty())
    }

    // ------------------------------------------------------------------
    // Timing queries
    // ------------------------------------------------------------------

    pub fn info(&self) -> &SourceInfo {
        &self.shared.info
    }

    pub fn duration(&self) -> f64 {
        self.shared.info.duration_secs
    }

    /// Master playback position in seconds (audio clock when an audio
    /// stream exists).
    pub fn master_time(&self) -> f64 {
        self.shared.clock.master_time()
    }

    /// Probed frame rate; 0.0 for a cover-art stream, which has none.
    pub fn fps(&self) -> f64 {
        match &self.shared.info.video {
            Some(v) if !v.cover_art => v.avg_frame_rate.as_f64(),
            _ => 0.0,
        }
    }

    /// Nominal seconds between video frames, for presentation pacing.
    pub fn frame_interval_secs(&self) -> f64 {
        match &self.shared.info.video {
            Some(v) if !v.cover_art && v.avg_frame_rate.num > 0 => v.avg_frame_rate.inverse_f64(),
            Some(_) => 1.0 / COVER_ART_FPS,
            None => 0.0,
        }
    }

    pub fn video_dimensions(&self) -> Option<(u32, u32)> {
        self.shared.info.video.as_ref().map(|v| (v.width, v.height))
    }

    pub fn has_video(&self) -> bool {
        self.shared.info.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.shared.info.audio.is_some()
    }

    pub fn is_cover_art(&self) -> bool {
        self.shared
            .info
            .video
            .as_ref()
            .is_some_and(|v| v.cover_art)
    }

    /// Seconds by which `video_pts` leads the fine-grained audio clock.
    pub fn render_delay(&self, video_pts: i64) -> f64 {
        self.shared.clock.render_delay(video_pts)
    }

    /// Fine-grained audio pts in audio time-base units.
    pub fn audio_pts(&self) -> f64 {
        self.shared.clock.audio_pts_fine()
    }

    // ------------------------------------------------------------------
    // Audio-device callback hooks
    // ------------------------------------------------------------------

    /// The device just started playing the frame stamped `pts`.
    pub fn notify_audio_frame_started(&self, pts: i64) {
        self.shared.clock.note_audio_frame_started(pts);
    }

    /// The device consumed `bytes` of the current frame.
    pub fn notify_audio_bytes_consumed(&self, bytes: usize) {
        self.shared.clock.note_audio_bytes_consumed(bytes);
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = EngineStats::default();
        if let Some(v) = &self.shared.video {
            stats.video_packets_queued = v.packets.len();
            stats.video_frames_queued = v.frames.len();
            stats.video_frames_produced = v.frames_produced.load(Ordering::Relaxed);
        }
        if let Some(a) = &self.shared.audio {
            stats.audio_packets_queued = a.packets.len();
            stats.audio_frames_queued = a.frames.len();
            stats.audio_frames_produced = a.frames_produced.load(Ordering::Relaxed);
        }
        stats
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// Dispatch loop
// ============================================================================

fn dispatch_loop(shared: &Arc<Shared>, mut demuxer: Box<dyn Demuxer>) {
    let alive = || shared.running.load(Ordering::SeqCst);

    while alive() {
        shared.pause.wait_while_paused(alive);
        if !alive() {
            break;
        }

        if let Some(offset) = shared.seek.take() {
            handle_seek(shared, demuxer.as_mut(), offset);
        }

        match demuxer.read_packet() {
            Ok(Some(packet)) => route_packet(shared, packet),
            Ok(None) => {
                if shared.replay {
                    // Synthesize a seek back to zero and keep reading.
                    shared.seek.request(-shared.clock.master_time());
                    debug!("end of stream, replaying");
                    continue;
                }
                info!("playback finished");
                break;
            }
            Err(MediaError::Again) => thread::sleep(WAIT_SLICE),
            Err(e) => {
                warn!("packet read failed: {e}");
                break;
            }
        }
    }

    shutdown(shared);
    debug!("dispatch thread exiting");
}

/// Absolute seek target: master time plus the requested offset, clamped
/// to `[0, duration - epsilon]`.
pub(crate) fn clamp_seek_target(current: f64, offset: f64, duration: f64) -> f64 {
    let target = current + offset;
    if target >= duration {
        (duration - SEEK_EOF_EPSILON).max(0.0)
    } else {
        target.max(0.0)
    }
}

fn handle_seek(shared: &Shared, demuxer: &mut dyn Demuxer, offset: f64) {
    let target = clamp_seek_target(
        shared.clock.master_time(),
        offset,
        shared.info.duration_secs,
    );

    if let Err(e) = demuxer.seek(target) {
        // State is left exactly as before the attempt; the request is
        // already consumed so it will not be retried.
        warn!("seek to {target:.3}s failed: {e}");
        return;
    }

    if let Some(video) = &shared.video {
        let cover_art = shared
            .info
            .video
            .as_ref()
            .is_some_and(|v| v.cover_art);
        if !cover_art {
            video.packets.clear();
            video.codec.lock().flush();
            video.frames.clear();
        }
    }
    if let Some(audio) = &shared.audio {
        audio.packets.clear();
        audio.codec.lock().flush();
        audio.frames.clear();
    }
    shared.clock.reset_to(target);
    debug!(target_secs = target, "seeked");
}

fn route_packet(shared: &Shared, packet: Packet) {
    // The two pipelines have distinct codec types, so select the packet
    // queue itself rather than the pipeline.
    let queue = match packet.stream {
        StreamKind::Video => shared.video.as_ref().map(|p| &p.packets),
        StreamKind::Audio => shared.audio.as_ref().map(|p| &p.packets),
    };
    if let Some(queue) = queue {
        // Blocks while the packet queue is full, bailing out (and
        // dropping the packet) if shutdown is requested meanwhile.
        queue.push_while(packet, || shared.running.load(Ordering::SeqCst));
    }
}

fn shutdown(shared: &Shared) {
    if let Some(video) = &shared.video {
        video.running.store(false, Ordering::SeqCst);
    }
    if let Some(audio) = &shared.audio {
        audio.running.store(false, Ordering::SeqCst);
    }

    let decoders_stopped = |pipeline: Option<&AtomicBool>| {
        pipeline.map_or(true, |stopped| stopped.load(Ordering::SeqCst))
    };
    while !(decoders_stopped(shared.video.as_ref().map(|p| &p.stopped))
        && decoders_stopped(shared.audio.as_ref().map(|p| &p.stopped)))
    {
        thread::sleep(WAIT_SLICE);
    }

    if let Some(video) = &shared.video {
        video.packets.clear();
        video.frames.clear();
    }
    if let Some(audio) = &shared.audio {
        audio.packets.clear();
        audio.frames.clear();
    }

    shared.running.store(false, Ordering::SeqCst);
    shared.stopped.store(true, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{
        AudioOutputSpec, AudioStreamInfo, Rational, RawPicture, RawSamples, VideoStreamInfo,
    };
    use bytes::Bytes;

    struct NullVideoDecoder;

    impl VideoDecoder for NullVideoDecoder {
        fn decode(&mut self, _packet: &Packet) -> Result<Option<RawPicture>, MediaError> {
            Ok(None)
        }

        fn flush(&mut self) {}
    }

    struct NullAudioDecoder;

    impl AudioDecoder for NullAudioDecoder {
        fn decode(&mut self, _packet: &Packet) -> Result<Option<RawSamples>, MediaError> {
            Ok(None)
        }

        fn flush(&mut self) {}
    }

    fn shared_av() -> Shared {
        let info = SourceInfo {
            duration_secs: 10.0,
            video: Some(VideoStreamInfo {
                width: 64,
                height: 48,
                time_base: Rational::new(1, 1000),
                avg_frame_rate: Rational::new(30, 1),
                cover_art: false,
            }),
            audio: Some(AudioStreamInfo {
                time_base: Rational::new(1, 44_100),
                output: AudioOutputSpec {
                    sample_rate: 44_100,
                    channels: 2,
                    bytes_per_sample: 2,
                },
            }),
        };
        let clock = PlaybackClock::new(&info);
        Shared {
            info,
            clock,
            pause: PauseGate::new(),
            running: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            seek: SeekRequest::new(),
            replay: false,
            video: Some(Pipeline::new(
                Box::new(NullVideoDecoder) as Box<dyn VideoDecoder>,
                4,
                4,
            )),
            audio: Some(Pipeline::new(
                Box::new(NullAudioDecoder) as Box<dyn AudioDecoder>,
                4,
                4,
            )),
        }
    }

    #[test]
    fn test_route_packet_reaches_matching_queue() {
        let shared = shared_av();
        route_packet(
            &shared,
            Packet {
                stream: StreamKind::Video,
                dts: Some(0),
                data: Bytes::new(),
            },
        );
        route_packet(
            &shared,
            Packet {
                stream: StreamKind::Audio,
                dts: Some(0),
                data: Bytes::new(),
            },
        );
        route_packet(
            &shared,
            Packet {
                stream: StreamKind::Audio,
                dts: Some(1024),
                data: Bytes::new(),
            },
        );
        assert_eq!(shared.video.as_ref().unwrap().packets.len(), 1);
        assert_eq!(shared.audio.as_ref().unwrap().packets.len(), 2);
        assert!(shared.video.as_ref().unwrap().frames.is_empty());
        assert!(shared.audio.as_ref().unwrap().frames.is_empty());
    }

    #[test]
    fn test_pause_gate_is_single_source_of_truth() {
        let gate = PauseGate::new();
        assert!(!gate.is_paused());
        assert!(gate.toggle());
        assert!(gate.is_paused());
        assert!(!gate.toggle());
        assert!(!gate.is_paused());
    }

    #[test]
    fn test_seek_clamps_past_end() {
        let target = clamp_seek_target(9.8, 5.0, 10.0);
        assert_eq!(target, 9.5);
        // Exactly at duration also clamps back.
        assert_eq!(clamp_seek_target(5.0, 5.0, 10.0), 9.5);
    }

    #[test]
    fn test_seek_clamps_before_start() {
        assert_eq!(clamp_seek_target(1.0, -100.0, 10.0), 0.0);
        assert_eq!(clamp_seek_target(0.0, -0.1, 10.0), 0.0);
    }

    #[test]
    fn test_seek_within_range_unclamped() {
        let target = clamp_seek_target(2.0, 3.5, 10.0);
        assert!((target - 5.5).abs() < 1e-12);
    }

    #[test]
    fn test_short_source_clamp_never_negative() {
        assert_eq!(clamp_seek_target(0.0, 1.0, 0.2), 0.0);
    }

    #[test]
    fn test_seek_request_consumed_once() {
        let seek = SeekRequest::new();
        assert_eq!(seek.take(), None);
        seek.request(-3.0);
        assert_eq!(seek.take(), Some(-3.0));
        assert_eq!(seek.take(), None);
    }

    #[test]
    fn test_default_config_depths() {
        let config = EngineConfig::default();
        assert!(config.video_frame_depth < config.audio_frame_depth);
    }
}
