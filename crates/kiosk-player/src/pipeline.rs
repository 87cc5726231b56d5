//! Track playback wiring: decode + output + pause/gain/cancel controls.
//!
//! [`TrackPlayback::start`] probes the track on the caller's thread and runs the
//! rest (device selection, stream, drain wait) on a dedicated thread, because
//! CPAL streams are not `Send` on every host.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::config::PlaybackConfig;
use crate::decode::{self, DecodedTrack};
use crate::device;
use crate::playback::{self, Gain, OutputControls};

/// How a playback run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// All decoded audio reached the device.
    Finished,
    /// Stopped through [`TrackPlayback::cancel`].
    Cancelled,
    /// Decoder, device or stream failure.
    Failed(String),
}

/// Where and how to play a track.
#[derive(Clone, Debug)]
pub struct TrackRequest {
    pub path: PathBuf,
    /// Output device name substring; `None` uses the host default.
    pub device: Option<String>,
    pub gain: f32,
    pub paused: bool,
}

/// Control side of one running track.
pub struct TrackPlayback {
    paused: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    gain: Arc<Gain>,
}

impl TrackPlayback {
    /// Probe the track and start playing it.
    ///
    /// `on_finish` runs exactly once on the playback thread when the run ends.
    /// Probe failures are returned directly and `on_finish` is never called.
    pub fn start<F>(request: TrackRequest, playback: &PlaybackConfig, on_finish: F) -> Result<Self>
    where
        F: FnOnce(PlaybackOutcome) + Send + 'static,
    {
        let track = decode::open_track(&request.path, playback.buffer_seconds)?;
        tracing::info!(
            path = %request.path.display(),
            rate_hz = track.spec.rate,
            channels = track.spec.channels.count(),
            duration_ms = ?track.duration_ms,
            "track opened"
        );

        let controls = OutputControls {
            paused: Arc::new(AtomicBool::new(request.paused)),
            gain: Arc::new(Gain::new(request.gain)),
            stream_error: Arc::new(Mutex::new(None)),
            refill_max_frames: playback.refill_max_frames,
        };
        let cancel = Arc::new(AtomicBool::new(false));
        let handle = Self {
            paused: controls.paused.clone(),
            cancel: cancel.clone(),
            gain: controls.gain.clone(),
        };

        let device_name = request.device.clone();
        let path = request.path.clone();
        let drain_grace = playback.drain_grace;
        thread::Builder::new()
            .name("kiosk-track".to_string())
            .spawn(move || {
                let outcome = match run_track(&track, device_name.as_deref(), controls, &cancel, drain_grace) {
                    Ok(outcome) => outcome,
                    Err(e) => PlaybackOutcome::Failed(format!("{e:#}")),
                };
                track.queue.abort();
                tracing::debug!(path = %path.display(), ?outcome, "track run ended");
                on_finish(outcome);
            })
            .context("spawn track thread")?;

        Ok(handle)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.set(gain);
    }

    /// Ask the run to stop. Idempotent and non-blocking.
    pub fn cancel(&self) {
        self.paused.store(true, Ordering::Relaxed);
        self.cancel.store(true, Ordering::Relaxed);
    }
}

fn run_track(
    track: &DecodedTrack,
    device_name: Option<&str>,
    controls: OutputControls,
    cancel: &AtomicBool,
    drain_grace: Duration,
) -> Result<PlaybackOutcome> {
    let host = cpal::default_host();
    let device = device::pick_output_device(&host, device_name)?;
    let supported = device::pick_output_config(&device, track.spec.rate)?;
    let mut stream_config: cpal::StreamConfig = supported.clone().into();
    if let Some(buf) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = buf;
    }
    if stream_config.sample_rate != track.spec.rate {
        tracing::warn!(
            source_rate_hz = track.spec.rate,
            output_rate_hz = stream_config.sample_rate,
            "device does not offer the track rate; pitch will be off"
        );
    }
    tracing::info!(
        device = %device.description()?,
        rate_hz = stream_config.sample_rate,
        channels = stream_config.channels,
        buffer_size = ?stream_config.buffer_size,
        "output stream config"
    );

    let stream_error = controls.stream_error.clone();
    let stream = playback::build_output_stream(
        &device,
        &stream_config,
        supported.sample_format(),
        &track.queue,
        controls,
    )?;
    stream.play().context("start output stream")?;

    let drained = track.queue.wait_drained_or_cancel(cancel);
    if !drained {
        return Ok(PlaybackOutcome::Cancelled);
    }
    // Let the device play out what the last callback wrote.
    thread::sleep(drain_grace);

    if let Some(message) = track.queue.failure() {
        return Ok(PlaybackOutcome::Failed(message));
    }
    if let Some(message) = stream_error.lock().ok().and_then(|slot| slot.clone()) {
        return Ok(PlaybackOutcome::Failed(message));
    }
    Ok(PlaybackOutcome::Finished)
}
