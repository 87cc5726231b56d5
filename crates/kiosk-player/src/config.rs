use std::time::Duration;

/// Tuning for one disc track run.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackConfig {
    /// Frames the output callback pulls from the queue per refill.
    pub refill_max_frames: usize,
    /// Decoded audio buffered ahead of the device, in seconds.
    pub buffer_seconds: f32,
    /// Time left for the device to play out its last buffer once the queue is empty.
    pub drain_grace: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            refill_max_frames: 4096,
            buffer_seconds: 2.0,
            drain_grace: Duration::from_millis(100),
        }
    }
}
