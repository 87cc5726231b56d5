//! Fixed-length capture from an input device.
//!
//! Samples are converted to interleaved `i16` as they arrive, which is what the
//! loudness measurement and the WAV encoder downstream expect.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};

use crate::device;

/// Interleaved PCM captured from an input device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl CapturedAudio {
    #[cfg(test)]
    fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }
}

/// Record `duration` of audio from the device matching `needle` (or the default
/// input) and return it.
///
/// Blocks the calling thread for at least `duration`.
pub fn capture(needle: Option<&str>, duration: Duration) -> Result<CapturedAudio> {
    let host = cpal::default_host();
    let device = device::pick_input_device(&host, needle)?;
    let supported = device
        .default_input_config()
        .context("query default input config")?;
    let config: cpal::StreamConfig = supported.clone().into();
    let sample_rate = config.sample_rate;
    let channels = config.channels.max(1);

    let wanted_frames = (f64::from(sample_rate) * duration.as_secs_f64()).round() as usize;
    let wanted = wanted_frames.saturating_mul(usize::from(channels));
    let buffer = Arc::new(Mutex::new(Vec::<i16>::with_capacity(wanted)));
    let stream_error = Arc::new(Mutex::new(None::<String>));

    let stream = match supported.sample_format() {
        cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, &buffer, &stream_error, wanted),
        cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, &buffer, &stream_error, wanted),
        cpal::SampleFormat::I32 => build_input::<i32>(&device, &config, &buffer, &stream_error, wanted),
        cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, &buffer, &stream_error, wanted),
        other => Err(anyhow!("unsupported input sample format: {other:?}")),
    }?;
    stream.play().context("start input stream")?;
    tracing::debug!(
        device = %device.description()?,
        rate_hz = sample_rate,
        channels,
        duration_ms = duration.as_millis() as u64,
        "capturing"
    );
    thread::sleep(duration);
    drop(stream);

    if let Some(message) = stream_error.lock().ok().and_then(|slot| slot.clone()) {
        return Err(anyhow!("input stream error: {message}"));
    }
    let mut samples = buffer
        .lock()
        .map(|mut b| std::mem::take(&mut *b))
        .map_err(|_| anyhow!("capture buffer poisoned"))?;
    samples.truncate(wanted);
    let whole = samples.len() - samples.len() % usize::from(channels);
    samples.truncate(whole);
    if samples.is_empty() {
        return Err(anyhow!("input device delivered no samples"));
    }

    Ok(CapturedAudio {
        samples,
        sample_rate,
        channels,
    })
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    buffer: &Arc<Mutex<Vec<i16>>>,
    stream_error: &Arc<Mutex<Option<String>>>,
    limit: usize,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample,
    i16: cpal::FromSample<T>,
{
    let buffer = buffer.clone();
    let stream_error = stream_error.clone();
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _| {
            let Ok(mut out) = buffer.lock() else {
                return;
            };
            let room = limit.saturating_sub(out.len());
            out.extend(
                data.iter()
                    .take(room)
                    .map(|s| <i16 as cpal::Sample>::from_sample(*s)),
            );
        },
        move |err| {
            tracing::warn!("input stream error: {err}");
            if let Ok(mut slot) = stream_error.lock() {
                slot.get_or_insert_with(|| err.to_string());
            }
        },
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_counts_whole_frames() {
        let audio = CapturedAudio {
            samples: vec![0; 10],
            sample_rate: 44_100,
            channels: 2,
        };
        assert_eq!(audio.frames(), 5);
    }
}
