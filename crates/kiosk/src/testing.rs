//! In-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::disc::{DiscReader, DiscToc};
use crate::error::KioskError;
use crate::metadata::{Medium, MediumTrack, MetadataService, ReleaseMetadata};
use crate::pipeline::{
    Pipeline, PipelineDescriptor, PipelineFactory, PipelineNotifier, PipelineState,
};
use crate::radio::RadioControl;
use crate::receiver::{ReceiverControl, ReceiverTrack};
use crate::recognition::{RecognizedTrack, Recognizer};
use crate::sampler::{AudioBuffer, AudioSampler};

/// Everything the fake factory and its pipelines were asked to do.
#[derive(Default)]
pub struct FactoryLog {
    pub builds: Vec<PipelineDescriptor>,
    /// `(build index, state)` in call order.
    pub states: Vec<(usize, PipelineState)>,
    /// `(build index, gain)` in call order.
    pub volumes: Vec<(usize, f32)>,
    notifiers: Vec<Option<PipelineNotifier>>,
}

impl FactoryLog {
    pub fn take_notifier(&mut self, build: usize) -> Option<PipelineNotifier> {
        self.notifiers.get_mut(build).and_then(Option::take)
    }
}

#[derive(Default)]
pub struct FakePipelineFactory {
    pub log: Arc<Mutex<FactoryLog>>,
    pub fail_builds: bool,
}

impl PipelineFactory for FakePipelineFactory {
    fn build(
        &mut self,
        descriptor: &PipelineDescriptor,
        notifier: PipelineNotifier,
    ) -> Result<Box<dyn Pipeline>, KioskError> {
        let mut log = self.log.lock().unwrap();
        log.builds.push(descriptor.clone());
        if self.fail_builds {
            log.notifiers.push(None);
            return Err(KioskError::BuildFailed(format!("cannot open {}", descriptor.uri)));
        }
        log.notifiers.push(Some(notifier));
        Ok(Box::new(FakePipeline {
            build: log.builds.len() - 1,
            log: self.log.clone(),
        }))
    }
}

struct FakePipeline {
    build: usize,
    log: Arc<Mutex<FactoryLog>>,
}

impl Pipeline for FakePipeline {
    fn set_state(&mut self, state: PipelineState) {
        self.log.lock().unwrap().states.push((self.build, state));
    }

    fn set_volume(&mut self, volume: f32) {
        self.log.lock().unwrap().volumes.push((self.build, volume));
    }
}

pub struct FakeDisc {
    pub toc: Result<DiscToc, KioskError>,
    pub probed: Option<usize>,
    pub toc_reads: AtomicUsize,
}

impl FakeDisc {
    /// A readable disc with id `disc-1`.
    pub fn with_tracks(track_count: usize) -> Self {
        Self {
            toc: Ok(DiscToc {
                track_count,
                disc_id: Some("disc-1".to_string()),
                disc_number: 1,
            }),
            probed: None,
            toc_reads: AtomicUsize::new(0),
        }
    }

    pub fn toc_reads(&self) -> usize {
        self.toc_reads.load(Ordering::SeqCst)
    }
}

impl DiscReader for FakeDisc {
    fn read_toc(&self) -> Result<DiscToc, KioskError> {
        self.toc_reads.fetch_add(1, Ordering::SeqCst);
        self.toc.clone()
    }

    fn probe_track_count(&self) -> Option<usize> {
        self.probed
    }

    fn track_uri(&self, index: usize) -> String {
        format!("fake://track/{index}")
    }
}

/// Release `rel-1` ("Album" by "Band") with one medium matching `disc_id`.
pub fn release_with_titles(disc_id: &str, titles: &[&str]) -> ReleaseMetadata {
    ReleaseMetadata {
        release_id: Some("rel-1".to_string()),
        title: Some("Album".to_string()),
        artist: Some("Band".to_string()),
        media: vec![Medium {
            position: Some(1),
            title: None,
            disc_ids: vec![disc_id.to_string()],
            tracks: titles
                .iter()
                .map(|t| MediumTrack {
                    title: Some(t.to_string()),
                    artist: None,
                    length_ms: Some(180_000),
                })
                .collect(),
        }],
    }
}

pub struct FakeMetadata {
    release: Option<ReleaseMetadata>,
    cover: Option<Vec<u8>>,
    lookups: Mutex<Vec<String>>,
}

impl FakeMetadata {
    pub fn new(release: ReleaseMetadata) -> Self {
        Self {
            release: Some(release),
            cover: None,
            lookups: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            release: None,
            cover: None,
            lookups: Mutex::new(Vec::new()),
        }
    }

    pub fn with_cover(mut self, bytes: Vec<u8>) -> Self {
        self.cover = Some(bytes);
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

impl MetadataService for FakeMetadata {
    fn lookup(&self, disc_id: &str) -> Result<ReleaseMetadata, KioskError> {
        self.lookups.lock().unwrap().push(disc_id.to_string());
        self.release
            .clone()
            .ok_or_else(|| KioskError::LookupFailed("no release".to_string()))
    }

    fn fetch_cover(&self, _release_id: &str) -> Option<Vec<u8>> {
        self.cover.clone()
    }
}

/// One scripted capture result.
#[derive(Clone, Debug)]
pub enum Probe {
    Silent,
    Loud,
    Fail,
}

/// Sampler replaying a script; loud probes once the script runs out.
#[derive(Default)]
pub struct ScriptedSampler {
    script: Mutex<VecDeque<Probe>>,
    requested: Mutex<Vec<Duration>>,
}

impl ScriptedSampler {
    pub fn new(script: impl IntoIterator<Item = Probe>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<Duration> {
        self.requested.lock().unwrap().clone()
    }
}

impl AudioSampler for ScriptedSampler {
    fn sample(&self, duration: Duration) -> Result<AudioBuffer, KioskError> {
        self.requested.lock().unwrap().push(duration);
        let probe = self.script.lock().unwrap().pop_front().unwrap_or(Probe::Loud);
        let level = match probe {
            Probe::Silent => 10,
            Probe::Loud => 8_000,
            Probe::Fail => return Err(KioskError::CaptureFailed("device busy".to_string())),
        };
        Ok(AudioBuffer {
            samples: [level, -level].repeat(64),
            sample_rate: 44_100,
            channels: 2,
        })
    }
}

/// Recognizer replaying scripted ids; `None` entries mean "no match".
#[derive(Default)]
pub struct ScriptedRecognizer {
    script: Mutex<VecDeque<Option<String>>>,
    calls: Mutex<usize>,
}

impl ScriptedRecognizer {
    pub fn new(ids: impl IntoIterator<Item = Option<&'static str>>) -> Self {
        Self {
            script: Mutex::new(ids.into_iter().map(|id| id.map(str::to_string)).collect()),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl Recognizer for ScriptedRecognizer {
    fn identify(&self, _probe: &AudioBuffer) -> Result<Option<RecognizedTrack>, KioskError> {
        *self.calls.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front().flatten();
        Ok(next.map(|id| RecognizedTrack {
            title: format!("Song {id}"),
            artist: "Artist".to_string(),
            album: "Record".to_string(),
            cover: None,
            id,
        }))
    }
}

/// Records receiver and radio calls in order.
#[derive(Default)]
pub struct ServiceLog {
    calls: Mutex<Vec<String>>,
}

impl ServiceLog {
    fn push(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

pub struct FakeReceiver {
    pub log: Arc<ServiceLog>,
    pub track: Mutex<Option<ReceiverTrack>>,
}

impl FakeReceiver {
    pub fn new(log: Arc<ServiceLog>) -> Self {
        Self {
            log,
            track: Mutex::new(None),
        }
    }
}

impl ReceiverControl for FakeReceiver {
    fn start(&self) -> Result<(), KioskError> {
        self.log.push("receiver start");
        Ok(())
    }

    fn stop(&self) -> Result<(), KioskError> {
        self.log.push("receiver stop");
        Ok(())
    }

    fn now_playing(&self) -> Result<Option<ReceiverTrack>, KioskError> {
        Ok(self.track.lock().unwrap().clone())
    }
}

/// Radio whose power-off always fails, to prove teardown continues.
pub struct FakeRadio {
    pub log: Arc<ServiceLog>,
}

impl RadioControl for FakeRadio {
    fn power(&self, on: bool) -> Result<(), KioskError> {
        if on {
            self.log.push("radio on");
            Ok(())
        } else {
            self.log.push("radio off");
            Err(KioskError::ExternalProcessUnavailable(
                "bluetoothctl missing".to_string(),
            ))
        }
    }

    fn ensure_loopback(&self) -> Result<(), KioskError> {
        self.log.push("loopback");
        Ok(())
    }
}
