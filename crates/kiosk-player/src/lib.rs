//! Audio engine behind the kiosk's pipeline handle.
//!
//! A track plays through three stages:
//! 1. **Decode**: a background thread uses Symphonia to decode the track file into interleaved `f32`.
//! 2. **Queue**: a bounded [`queue::SampleQueue`] decouples the decoder from the device.
//! 3. **Output**: the CPAL callback drains the queue, applies pause and gain, and writes to the device.
//!
//! [`capture`] provides the opposite direction: a fixed-duration snapshot from an input device.

pub mod capture;
pub mod config;
pub mod decode;
pub mod device;
pub mod pipeline;
pub mod playback;
pub mod queue;
