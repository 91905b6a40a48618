//! # Cadence Player
//!
//! Demo harness: runs the engine over the synthetic source with a
//! simulated renderer and audio device, pacing video frames off the
//! shared clock the way a real presentation layer would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cadence_core::synth::{self, SynthConfig};
use cadence_core::{Engine, EngineConfig};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let (source, _control) = synth::open(SynthConfig {
        duration_secs: 4.0,
        ..Default::default()
    })?;
    info!(
        "source: {}",
        serde_json::to_string(&source.info).unwrap_or_default()
    );

    let config = EngineConfig {
        replay: false,
        ..Default::default()
    };
    let engine = Arc::new(Engine::open(source, config)?);
    engine.start()?;

    let live = Arc::new(AtomicBool::new(true));
    let renderer = spawn_renderer(engine.clone(), live.clone());
    let audio_device = spawn_audio_device(engine.clone(), live.clone());

    while !engine.is_stopped() {
        info!(
            "t={:.2}s / {:.2}s, {:?}",
            engine.master_time(),
            engine.duration(),
            engine.stats()
        );
        thread::sleep(Duration::from_millis(500));
    }

    live.store(false, Ordering::Relaxed);
    renderer.join().expect("renderer thread");
    audio_device.join().expect("audio device thread");
    info!("done");
    Ok(())
}

/// Pulls video frames and waits out the render delay against the audio
/// clock before "displaying" each one.
fn spawn_renderer(engine: Arc<Engine>, live: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut displayed = 0u64;
        while live.load(Ordering::Relaxed) {
            let Some(frame) = engine.pull_video_frame() else {
                break;
            };
            let delay = engine.render_delay(frame.pts);
            if delay > 0.0 {
                thread::sleep(Duration::from_secs_f64(delay.min(0.25)));
            }
            displayed += 1;
        }
        info!(displayed, "renderer exiting");
    })
}

/// Stand-in for a hardware pull callback: consumes audio in real time
/// and keeps the fine-grained clock current.
fn spawn_audio_device(engine: Arc<Engine>, live: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    let byte_rate = engine
        .info()
        .audio
        .as_ref()
        .map(|a| a.output.bytes_per_second())
        .unwrap_or(0.0);
    thread::spawn(move || {
        while live.load(Ordering::Relaxed) {
            let Some(frame) = engine.pull_audio_frame() else {
                break;
            };
            engine.notify_audio_frame_started(frame.pts);
            engine.notify_audio_bytes_consumed(frame.byte_len());
            if byte_rate > 0.0 {
                thread::sleep(Duration::from_secs_f64(frame.byte_len() as f64 / byte_rate));
            }
        }
        info!("audio device exiting");
    })
}
