//! Audio decode thread.
//!
//! Symmetric to the video loop: decodes packets into raw samples,
//! resamples them into the device's output format and publishes frames
//! to the audio frame queue. The coarse audio clock is stamped as soon
//! as a decoded block carries a pts.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::engine::Shared;
use crate::source::{AudioFrame, Resampler};

pub(crate) fn decode_loop(shared: &Arc<Shared>, mut resampler: Box<dyn Resampler>) {
    let (Some(pipeline), Some(stream)) = (shared.audio.as_ref(), shared.info.audio.as_ref())
    else {
        return;
    };
    pipeline.started.store(true, Ordering::SeqCst);

    let time_base = stream.time_base.as_f64();
    let mut last_pts: i64 = 0;
    let alive = || pipeline.running.load(Ordering::Relaxed);

    while alive() {
        shared.pause.wait_while_paused(alive);
        let Some(packet) = pipeline.packets.pop_while(alive) else {
            break;
        };

        let decoded = pipeline.codec.lock().decode(&packet);

        let raw = match decoded {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                warn!("audio decode failed: {e}");
                continue;
            }
        };

        if let Some(pts) = raw.pts {
            last_pts = pts;
            shared.clock.set_audio(pts, pts as f64 * time_base);
        }

        // The estimate only sizes the buffer; the sample count reported
        // by the conversion is what determines the queued byte length.
        let estimated = resampler.estimate_out_samples(raw.samples);
        let mut out = vec![0u8; resampler.buffer_size(estimated)];
        let actual = match resampler.convert(&raw, &mut out) {
            Ok(actual) => actual,
            Err(e) => {
                warn!("resample failed: {e}");
                continue;
            }
        };
        out.truncate(resampler.buffer_size(actual));

        let frame = AudioFrame {
            data: Bytes::from(out),
            pts: last_pts,
        };
        if !pipeline.frames.push_while(frame, alive) {
            break;
        }
        pipeline.frames_produced.fetch_add(1, Ordering::Relaxed);
    }

    pipeline.codec.lock().flush();
    drop(resampler);
    pipeline.stopped.store(true, Ordering::SeqCst);
    debug!("audio decode thread exiting");
}
