//! Fixed-duration audio probes and their loudness.

use std::io::Cursor;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::error::KioskError;

/// Interleaved signed 16-bit PCM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioBuffer {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioBuffer {
    /// Encode as a 16-bit PCM WAV file.
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: self.channels.max(1),
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).context("wav header")?;
            for sample in &self.samples {
                writer.write_sample(*sample).context("wav sample")?;
            }
            writer.finalize().context("wav finalize")?;
        }
        Ok(cursor.into_inner())
    }
}

/// Captures probes for the recognition loop.
///
/// `sample` blocks for the requested duration; it never runs on the primary loop.
pub trait AudioSampler: Send + Sync {
    fn sample(&self, duration: Duration) -> Result<AudioBuffer, KioskError>;
}

/// Root mean square of the samples; zero for an empty buffer.
pub fn loudness(buffer: &AudioBuffer) -> f64 {
    if buffer.samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = buffer
        .samples
        .iter()
        .map(|s| {
            let s = f64::from(*s);
            s * s
        })
        .sum();
    (sum / buffer.samples.len() as f64).sqrt()
}

pub fn is_silent(buffer: &AudioBuffer, threshold: f64) -> bool {
    loudness(buffer) < threshold
}

/// Sampler reading from a CPAL input device (the Bluetooth loopback capture side).
pub struct DeviceSampler {
    device: Option<String>,
}

impl DeviceSampler {
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

impl AudioSampler for DeviceSampler {
    fn sample(&self, duration: Duration) -> Result<AudioBuffer, KioskError> {
        let captured = kiosk_player::capture::capture(self.device.as_deref(), duration)
            .map_err(|e| KioskError::capture_failed(&e))?;
        Ok(AudioBuffer {
            samples: captured.samples,
            sample_rate: captured.sample_rate,
            channels: captured.channels,
        })
    }
}
