//! Pipeline handle: one controllable playback unit per disc track.
//!
//! The core only sees the [`Pipeline`] and [`PipelineFactory`] traits. Completion
//! and failure arrive through a one-shot [`PipelineNotifier`] which the factory
//! must call at most once per run, from any thread. A run stopped through
//! [`PipelineState::Stopped`] never calls it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use kiosk_player::config::PlaybackConfig;
use kiosk_player::pipeline::{PlaybackOutcome, TrackPlayback, TrackRequest};

use crate::error::KioskError;

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// Target state of a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Paused,
    Playing,
}

/// Terminal notification of a playback run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineEvent {
    EndOfStream,
    Error(String),
}

/// What to build: a disc track address plus the gain to apply before audio starts.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineDescriptor {
    /// 1-based track index on the disc.
    pub track_index: usize,
    pub uri: String,
    /// Linear gain, `0.0..=1.0`.
    pub volume: f32,
}

/// Process-wide volume in percent. Pipelines receive it as linear gain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeSetting(u8);

impl VolumeSetting {
    pub fn new(percent: u8) -> Self {
        Self(percent.min(100))
    }

    pub fn percent(self) -> u8 {
        self.0
    }

    pub fn gain(self) -> f32 {
        f32::from(self.0) / 100.0
    }
}

/// Fired exactly once with the outcome of a run.
pub type PipelineNotifier = Box<dyn FnOnce(PipelineEvent) + Send + 'static>;

/// A built playback unit.
///
/// State changes are submitted synchronously and complete asynchronously.
pub trait Pipeline: Send {
    fn set_state(&mut self, state: PipelineState);
    fn set_volume(&mut self, volume: f32);
}

/// Builds pipelines from descriptors.
pub trait PipelineFactory: Send {
    /// Construct a pipeline in the [`PipelineState::Paused`] state.
    fn build(
        &mut self,
        descriptor: &PipelineDescriptor,
        notifier: PipelineNotifier,
    ) -> Result<Box<dyn Pipeline>, KioskError>;
}

/// A built pipeline tagged with a process-unique id.
///
/// Dropping the handle tears the pipeline down.
pub struct PipelineHandle {
    id: u64,
    track_index: usize,
    pipeline: Option<Box<dyn Pipeline>>,
}

impl PipelineHandle {
    /// Allocate an id for the next build so the notifier can carry it.
    pub fn next_id() -> u64 {
        NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed)
    }

    pub fn new(id: u64, track_index: usize, pipeline: Box<dyn Pipeline>) -> Self {
        Self {
            id,
            track_index,
            pipeline: Some(pipeline),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_state(&mut self, state: PipelineState) {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };
        pipeline.set_state(state);
        if state == PipelineState::Stopped {
            self.pipeline = None;
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.set_volume(volume);
        }
    }

    /// Stop and release the pipeline. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if self.pipeline.is_some() {
            tracing::debug!(pipeline_id = self.id, track = self.track_index, "pipeline teardown");
        }
        self.set_state(PipelineState::Stopped);
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Production factory: plays extracted disc track files through `kiosk-player`.
pub struct PlayerPipelineFactory {
    output_device: Option<String>,
    playback: PlaybackConfig,
}

impl PlayerPipelineFactory {
    pub fn new(output_device: Option<String>, playback: PlaybackConfig) -> Self {
        Self {
            output_device,
            playback,
        }
    }
}

impl PipelineFactory for PlayerPipelineFactory {
    fn build(
        &mut self,
        descriptor: &PipelineDescriptor,
        notifier: PipelineNotifier,
    ) -> Result<Box<dyn Pipeline>, KioskError> {
        let request = TrackRequest {
            path: PathBuf::from(&descriptor.uri),
            device: self.output_device.clone(),
            gain: descriptor.volume,
            paused: true,
        };
        let playback = TrackPlayback::start(request, &self.playback, move |outcome| {
            match outcome {
                PlaybackOutcome::Finished => notifier(PipelineEvent::EndOfStream),
                PlaybackOutcome::Failed(message) => notifier(PipelineEvent::Error(message)),
                PlaybackOutcome::Cancelled => {}
            }
        })
        .map_err(|e| KioskError::build_failed(&e))?;
        Ok(Box::new(PlayerPipeline { playback }))
    }
}

struct PlayerPipeline {
    playback: TrackPlayback,
}

impl Pipeline for PlayerPipeline {
    fn set_state(&mut self, state: PipelineState) {
        match state {
            PipelineState::Playing => self.playback.set_paused(false),
            PipelineState::Paused => self.playback.set_paused(true),
            PipelineState::Stopped => self.playback.cancel(),
        }
    }

    fn set_volume(&mut self, volume: f32) {
        self.playback.set_gain(volume);
    }
}

impl Drop for PlayerPipeline {
    fn drop(&mut self) {
        self.playback.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePipelineFactory;

    fn descriptor() -> PipelineDescriptor {
        PipelineDescriptor {
            track_index: 1,
            uri: "/tracks/track01.wav".to_string(),
            volume: 0.5,
        }
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut factory = FakePipelineFactory::default();
        let log = factory.log.clone();
        let pipeline = factory.build(&descriptor(), Box::new(|_| {})).unwrap();
        let mut handle = PipelineHandle::new(PipelineHandle::next_id(), 1, pipeline);
        handle.set_state(PipelineState::Playing);
        handle.teardown();
        handle.teardown();
        drop(handle);

        let states = log.lock().unwrap().states.clone();
        assert_eq!(
            states,
            vec![(0, PipelineState::Playing), (0, PipelineState::Stopped)]
        );
    }

    #[test]
    fn volume_setting_clamps_and_maps_to_gain() {
        assert_eq!(VolumeSetting::new(250).percent(), 100);
        assert_eq!(VolumeSetting::new(70).gain(), 0.7);
        assert_eq!(VolumeSetting::new(0).gain(), 0.0);
    }

    #[test]
    fn ids_are_unique() {
        let a = PipelineHandle::next_id();
        let b = PipelineHandle::next_id();
        assert_ne!(a, b);
    }

    #[test]
    fn missing_track_file_is_build_failed() {
        let mut factory = PlayerPipelineFactory::new(None, PlaybackConfig::default());
        let desc = PipelineDescriptor {
            uri: "/definitely/not/here/track01.flac".to_string(),
            ..descriptor()
        };
        let err = factory.build(&desc, Box::new(|_| {})).err().unwrap();
        assert!(matches!(err, KioskError::BuildFailed(_)));
    }
}
