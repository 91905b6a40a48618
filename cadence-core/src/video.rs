//! Video decode thread.
//!
//! Consumes video packets, decodes them, converts each picture to the
//! presentation pixel format and publishes frames to the video frame
//! queue, stamping the video clock along the way.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::engine::Shared;
use crate::queue::WAIT_SLICE;
use crate::source::{PixelConverter, VideoFrame};

/// Presentation timestamp fallback chain: frame pts, then packet dts
/// (both in stream time-base units), then a synthesized clock advanced
/// by one nominal frame interval per decoded frame. The synthesized
/// path keeps timestamp-less streams moving instead of stalling.
pub(crate) fn derive_timestamp(
    frame_pts: Option<i64>,
    packet_dts: Option<i64>,
    time_base: f64,
    frame_step: f64,
    fallback_secs: &mut f64,
) -> (i64, f64) {
    if let Some(pts) = frame_pts.or(packet_dts) {
        let secs = pts as f64 * time_base;
        *fallback_secs = secs;
        return (pts, secs);
    }
    *fallback_secs += frame_step;
    let pts = if time_base > 0.0 {
        (*fallback_secs / time_base).round() as i64
    } else {
        0
    };
    (pts, *fallback_secs)
}

pub(crate) fn decode_loop(shared: &Arc<Shared>, mut converter: Box<dyn PixelConverter>) {
    let (Some(pipeline), Some(stream)) = (shared.video.as_ref(), shared.info.video.as_ref())
    else {
        return;
    };
    pipeline.started.store(true, Ordering::SeqCst);

    let time_base = stream.time_base.as_f64();
    let frame_step = stream.avg_frame_rate.inverse_f64();
    let mut fallback_secs = 0.0;
    let alive = || pipeline.running.load(Ordering::Relaxed);

    'decode: while alive() {
        shared.pause.wait_while_paused(alive);
        let Some(packet) = pipeline.packets.pop_while(alive) else {
            break;
        };

        // Narrow critical section: only the decode call itself competes
        // with the dispatch thread's seek flush.
        let decoded = pipeline.codec.lock().decode(&packet);

        let picture = match decoded {
            Ok(Some(picture)) => picture,
            // A packet may legitimately yield no frame.
            Ok(None) => continue,
            Err(e) => {
                warn!("video decode failed: {e}");
                continue;
            }
        };

        let (pts, secs) = derive_timestamp(
            picture.pts,
            packet.dts,
            time_base,
            frame_step,
            &mut fallback_secs,
        );
        shared.clock.set_video(pts, secs);

        let data = match converter.convert(&picture) {
            Ok(data) => data,
            Err(e) => {
                warn!("pixel conversion failed: {e}");
                continue;
            }
        };
        let frame = VideoFrame {
            data,
            width: stream.width,
            height: stream.height,
            pts,
        };
        if !pipeline.frames.push_while(frame, alive) {
            break;
        }
        pipeline.frames_produced.fetch_add(1, Ordering::Relaxed);

        if stream.cover_art {
            // A cover is exactly one still image; nothing more to decode.
            break 'decode;
        }
    }

    // Stay alive after the single cover frame so shutdown sequencing is
    // the same for every stream type.
    if stream.cover_art {
        while alive() {
            thread::sleep(WAIT_SLICE);
        }
    }

    pipeline.codec.lock().flush();
    drop(converter);
    pipeline.stopped.store(true, Ordering::SeqCst);
    debug!("video decode thread exiting");
}
