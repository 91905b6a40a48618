//! Shared playback clock.
//!
//! Audio is the master when an audio stream exists: the hardware pull
//! cadence is rigid while video render cadence is elastic. Every field
//! is read across threads, so pts values live in `AtomicI64` and
//! fractional seconds in bit-cast `AtomicU64`. The fine audio pts is the
//! one field written from outside the engine threads (the audio-device
//! callback advances it as bytes are consumed).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::source::SourceInfo;

fn load_f64(cell: &AtomicU64) -> f64 {
    f64::from_bits(cell.load(Ordering::SeqCst))
}

fn store_f64(cell: &AtomicU64, value: f64) {
    cell.store(value.to_bits(), Ordering::SeqCst);
}

fn add_f64(cell: &AtomicU64, delta: f64) {
    let _ = cell.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
        Some((f64::from_bits(bits) + delta).to_bits())
    });
}

/// Cross-thread timing state for one playback session.
pub struct PlaybackClock {
    has_audio: bool,
    video_time_base: f64,
    audio_time_base: f64,
    /// Output bytes per audio time-base unit, for sub-frame advances.
    bytes_per_pts_unit: f64,

    // Coarse pairs, each written only by its decode loop. Within one
    // playback segment these only move forward; a seek is the only
    // thing that lowers them.
    video_pts: AtomicI64,
    video_secs: AtomicU64,
    audio_pts: AtomicI64,
    audio_secs: AtomicU64,

    /// Fine-grained audio pts in audio time-base units. Set on each new
    /// frame the device starts playing, advanced per consumed byte.
    fine_audio_pts: AtomicU64,
}

impl PlaybackClock {
    pub fn new(info: &SourceInfo) -> Self {
        let video_time_base = info.video.as_ref().map_or(0.0, |v| v.time_base.as_f64());
        let (audio_time_base, bytes_per_pts_unit) = match &info.audio {
            Some(a) => {
                let tb = a.time_base.as_f64();
                (tb, a.output.bytes_per_second() * tb)
            }
            None => (0.0, 0.0),
        };
        Self {
            has_audio: info.audio.is_some(),
            video_time_base,
            audio_time_base,
            bytes_per_pts_unit,
            video_pts: AtomicI64::new(0),
            video_secs: AtomicU64::new(0f64.to_bits()),
            audio_pts: AtomicI64::new(0),
            audio_secs: AtomicU64::new(0f64.to_bits()),
            fine_audio_pts: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn set_video(&self, pts: i64, secs: f64) {
        self.video_pts.store(pts, Ordering::SeqCst);
        store_f64(&self.video_secs, secs);
    }

    pub fn set_audio(&self, pts: i64, secs: f64) {
        self.audio_pts.store(pts, Ordering::SeqCst);
        store_f64(&self.audio_secs, secs);
    }

    pub fn video_time(&self) -> f64 {
        load_f64(&self.video_secs)
    }

    pub fn audio_time(&self) -> f64 {
        load_f64(&self.audio_secs)
    }

    /// Master playback position in seconds: audio when present, else
    /// video.
    pub fn master_time(&self) -> f64 {
        if self.has_audio {
            self.audio_time()
        } else {
            self.video_time()
        }
    }

    /// Audio-device callback: a new frame with this pts just started
    /// playing.
    pub fn note_audio_frame_started(&self, pts: i64) {
        store_f64(&self.fine_audio_pts, pts as f64);
    }

    /// Audio-device callback: `bytes` of the current frame were handed
    /// to the hardware.
    pub fn note_audio_bytes_consumed(&self, bytes: usize) {
        if self.bytes_per_pts_unit > 0.0 {
            add_f64(&self.fine_audio_pts, bytes as f64 / self.bytes_per_pts_unit);
        }
    }

    /// Fine-grained audio pts in audio time-base units.
    pub fn audio_pts_fine(&self) -> f64 {
        load_f64(&self.fine_audio_pts)
    }

    /// Seconds by which a candidate video frame leads the audio clock.
    /// Positive: video is ahead, the presenter should wait. Negative:
    /// behind, show (or drop) immediately.
    pub fn render_delay(&self, video_pts: i64) -> f64 {
        video_pts as f64 * self.video_time_base - self.audio_pts_fine() * self.audio_time_base
    }

    /// Seek/flush: rewrite every field to `secs`. The only path that
    /// lowers the coarse pairs.
    pub fn reset_to(&self, secs: f64) {
        let video_pts = if self.video_time_base > 0.0 {
            (secs / self.video_time_base).round() as i64
        } else {
            0
        };
        let audio_pts = if self.audio_time_base > 0.0 {
            (secs / self.audio_time_base).round() as i64
        } else {
            0
        };
        self.set_video(video_pts, secs);
        self.set_audio(audio_pts, secs);
        store_f64(&self.fine_audio_pts, audio_pts as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AudioOutputSpec, AudioStreamInfo, Rational, SourceInfo, VideoStreamInfo};

    fn info_av() -> SourceInfo {
        SourceInfo {
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
        }
    }

    #[test]
    fn test_master_prefers_audio() {
        let clock = PlaybackClock::new(&info_av());
        clock.set_video(2000, 2.0);
        clock.set_audio(44_100, 1.0);
        assert_eq!(clock.master_time(), 1.0);

        let mut video_only = info_av();
        video_only.audio = None;
        let clock = PlaybackClock::new(&video_only);
        clock.set_video(2000, 2.0);
        assert_eq!(clock.master_time(), 2.0);
    }

    #[test]
    fn test_byte_consumption_advances_fine_pts() {
        let clock = PlaybackClock::new(&info_av());
        clock.note_audio_frame_started(44_100); // 1.0 s
        // 4 bytes per sample pair at 44.1kHz stereo s16: one pts unit.
        clock.note_audio_bytes_consumed(4);
        assert!((clock.audio_pts_fine() - 44_101.0).abs() < 1e-6);
        // Half a second of bytes.
        clock.note_audio_bytes_consumed(88_200);
        assert!((clock.audio_pts_fine() - 66_151.0).abs() < 1e-6);
    }

    #[test]
    fn test_render_delay_sign() {
        let clock = PlaybackClock::new(&info_av());
        clock.note_audio_frame_started(44_100); // audio at 1.0 s
        // Video frame stamped at 1.5 s (time base 1/1000).
        assert!((clock.render_delay(1500) - 0.5).abs() < 1e-9);
        // Video frame stamped at 0.5 s is behind.
        assert!((clock.render_delay(500) + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reset_rewrites_all_fields() {
        let clock = PlaybackClock::new(&info_av());
        clock.set_video(9000, 9.0);
        clock.set_audio(400_000, 9.07);
        clock.note_audio_frame_started(400_000);
        clock.reset_to(0.0);
        assert_eq!(clock.master_time(), 0.0);
        assert_eq!(clock.video_time(), 0.0);
        assert_eq!(clock.audio_pts_fine(), 0.0);
    }
}
