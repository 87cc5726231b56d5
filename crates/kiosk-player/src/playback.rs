//! Output stage (CPAL output stream).
//!
//! The real-time callback never blocks: it refills a small local buffer from the
//! [`SampleQueue`] when one is ready, maps channels, applies the gain and converts
//! to the device sample format. Underruns and pauses are written as silence.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::queue::SampleQueue;

/// Linear gain shared between the control side and the audio callback.
#[derive(Debug)]
pub struct Gain(AtomicU32);

impl Gain {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(clamp_gain(value).to_bits()))
    }

    pub fn set(&self, value: f32) {
        self.0.store(clamp_gain(value).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

fn clamp_gain(value: f32) -> f32 {
    if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 }
}

/// Runtime controls read by the output callback.
#[derive(Clone)]
pub struct OutputControls {
    /// When `true` the callback writes silence and leaves the queue untouched.
    pub paused: Arc<AtomicBool>,
    pub gain: Arc<Gain>,
    /// Stream errors reported by the backend; the first one is kept and the
    /// queue is aborted so the run ends.
    pub stream_error: Arc<Mutex<Option<String>>>,
    pub refill_max_frames: usize,
}

/// Build an output stream draining `queue` in the device's sample format.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    controls: OutputControls,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, controls),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, controls),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, controls),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, controls),
        other => Err(anyhow!("unsupported output sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    controls: OutputControls,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let out_channels = usize::from(config.channels).max(1);
    let queue = queue.clone();
    let mut pending = PendingFrames::new(queue.channels());
    let refill = controls.refill_max_frames.max(1);
    let paused = controls.paused.clone();
    let gain = controls.gain.clone();
    let stream_error = controls.stream_error.clone();
    let queue_for_error = queue.clone();
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if paused.load(Ordering::Relaxed) {
                data.fill(silence);
                return;
            }
            let g = gain.get();
            for frame in data.chunks_mut(out_channels) {
                if pending.is_empty() {
                    match queue.pop_available(refill) {
                        Some(samples) => pending.reset(samples),
                        None => {
                            frame.fill(silence);
                            continue;
                        }
                    }
                }
                for (ch, slot) in frame.iter_mut().enumerate() {
                    let sample = pending.sample_for(ch, out_channels) * g;
                    *slot = <T as cpal::Sample>::from_sample::<f32>(sample);
                }
                pending.advance();
            }
        },
        move |err| {
            tracing::warn!("output stream error: {err}");
            if let Ok(mut slot) = stream_error.lock() {
                slot.get_or_insert_with(|| err.to_string());
            }
            // Nothing will drain the queue anymore; unblock the waiter.
            queue_for_error.abort();
        },
        None,
    )?;
    Ok(stream)
}

/// Interleaved samples already taken from the queue but not yet written.
struct PendingFrames {
    channels: usize,
    samples: Vec<f32>,
    pos: usize,
}

impl PendingFrames {
    fn new(channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            samples: Vec::new(),
            pos: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.pos + self.channels > self.samples.len()
    }

    fn reset(&mut self, samples: Vec<f32>) {
        self.samples = samples;
        self.pos = 0;
    }

    /// Sample for output channel `ch` of the current frame.
    ///
    /// Stereo to mono averages, mono to stereo duplicates, anything else clamps
    /// to the last available source channel.
    fn sample_for(&self, ch: usize, out_channels: usize) -> f32 {
        let frame = &self.samples[self.pos..self.pos + self.channels];
        match (self.channels, out_channels) {
            (2, 1) => 0.5 * (frame[0] + frame[1]),
            (src, _) => frame[ch.min(src - 1)],
        }
    }

    fn advance(&mut self) {
        self.pos += self.channels;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_is_clamped() {
        let gain = Gain::new(1.5);
        assert_eq!(gain.get(), 1.0);
        gain.set(-0.2);
        assert_eq!(gain.get(), 0.0);
        gain.set(f32::NAN);
        assert_eq!(gain.get(), 0.0);
        gain.set(0.7);
        assert!((gain.get() - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn pending_frames_map_channels() {
        let mut stereo = PendingFrames::new(2);
        stereo.reset(vec![0.2, 0.4, 1.0, 0.0]);
        assert!((stereo.sample_for(0, 1) - 0.3).abs() < 1e-6);
        assert_eq!(stereo.sample_for(1, 2), 0.4);
        stereo.advance();
        assert_eq!(stereo.sample_for(0, 2), 1.0);
        stereo.advance();
        assert!(stereo.is_empty());

        let mut mono = PendingFrames::new(1);
        mono.reset(vec![0.5]);
        assert_eq!(mono.sample_for(0, 2), 0.5);
        assert_eq!(mono.sample_for(1, 2), 0.5);
    }
}
