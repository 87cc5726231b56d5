//! Device discovery and stream configuration.
//!
//! Devices are selected either by case-insensitive substring match or by falling
//! back to the host default.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick an output device by name substring, or the host default.
pub fn pick_output_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    match needle.filter(|n| !n.trim().is_empty()) {
        Some(needle) => host
            .output_devices()
            .context("enumerate output devices")?
            .find(|d| device_matches(d, needle))
            .ok_or_else(|| anyhow!("no output device matched: {needle}")),
        None => host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default output device")),
    }
}

/// Pick an input (capture) device by name substring, or the host default.
pub fn pick_input_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    match needle.filter(|n| !n.trim().is_empty()) {
        Some(needle) => host
            .input_devices()
            .context("enumerate input devices")?
            .find(|d| device_matches(d, needle))
            .ok_or_else(|| anyhow!("no input device matched: {needle}")),
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("no default input device")),
    }
}

fn device_matches(device: &cpal::Device, needle: &str) -> bool {
    device
        .description()
        .map(|d| name_contains(&d.name(), needle))
        .unwrap_or(false)
}

/// Choose an output config for the source rate.
///
/// An exact rate match wins; otherwise the closest rate at or below the source,
/// then the closest above. Float formats are preferred at equal rates.
pub fn pick_output_config(
    device: &cpal::Device,
    source_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<(ConfigRank, cpal::SupportedStreamConfig)> = None;
    for range in device
        .supported_output_configs()
        .context("query output configs")?
    {
        let rate = clamp_rate(range.min_sample_rate(), range.max_sample_rate(), source_rate);
        let rank = ConfigRank::new(rate, source_rate, range.sample_format());
        if best.as_ref().is_none_or(|(current, _)| rank < *current) {
            best = Some((rank, range.with_sample_rate(rate)));
        }
    }
    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("device reports no output configs"))
}

/// Prefer the largest fixed buffer the device offers, capped to keep latency sane.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 16_384;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Print output and input devices to stdout.
pub fn list_devices(host: &cpal::Host) -> Result<()> {
    println!("output devices:");
    for (i, d) in host.output_devices().context("enumerate output devices")?.enumerate() {
        println!("  #{i}: {}", d.description()?);
    }
    println!("input devices:");
    for (i, d) in host.input_devices().context("enumerate input devices")?.enumerate() {
        println!("  #{i}: {}", d.description()?);
    }
    Ok(())
}

/// Ordering key for candidate configs; smaller is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ConfigRank {
    /// 0 = exact, 1 = below source rate, 2 = above.
    distance_class: u8,
    distance_hz: u32,
    format: u8,
}

impl ConfigRank {
    fn new(rate: u32, source_rate: u32, format: cpal::SampleFormat) -> Self {
        let distance_class = match rate.cmp(&source_rate) {
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Less => 1,
            std::cmp::Ordering::Greater => 2,
        };
        Self {
            distance_class,
            distance_hz: rate.abs_diff(source_rate),
            format: format_preference(format),
        }
    }
}

fn clamp_rate(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn format_preference(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn name_contains(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}
