//! Ambient recognition loop for the Bluetooth source.
//!
//! A background thread alternates short silence probes with longer probes
//! submitted to a recognition service. [`RecognitionMachine`] holds the phase
//! and the debounce id; [`RecognitionLoop`] runs it and posts reports to the
//! primary loop tagged with the run id, so reports from a stopped run can be
//! told apart from the current one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use crossbeam_channel::Sender;
use serde::Deserialize;

use crate::error::KioskError;
use crate::orchestrator::KioskMessage;
use crate::sampler::{self, AudioBuffer, AudioSampler};

const STOP_POLL: Duration = Duration::from_millis(50);
const MAX_RESPONSE_BYTES: u64 = 1_000_000;

/// A track identified from a probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecognizedTrack {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Cover image URL.
    pub cover: Option<String>,
}

/// Fingerprinting collaborator. `Ok(None)` means the service found no match.
pub trait Recognizer: Send + Sync {
    fn identify(&self, probe: &AudioBuffer) -> Result<Option<RecognizedTrack>, KioskError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenPhase {
    AwaitingFirstSignal,
    Silence,
    ActiveListening,
}

/// Probe lengths and waits. Injected so tests run without real-time sleeps.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecognitionTimings {
    pub short_probe: Duration,
    pub long_probe: Duration,
    pub silence_cooldown: Duration,
    pub iteration_delay: Duration,
    /// RMS below which a short probe is silent.
    pub silence_threshold: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecognitionReport {
    /// A new track; never repeated for the same id.
    TrackIdentified(RecognizedTrack),
    /// Sound came back after silence but nothing was recognized.
    Idle,
}

/// Result of one iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub report: Option<RecognitionReport>,
    /// How long to wait before the next iteration.
    pub wait: Duration,
}

/// Phase and debounce state of one loop run.
pub struct RecognitionMachine {
    phase: ListenPhase,
    last_identified_id: Option<String>,
    timings: RecognitionTimings,
}

impl RecognitionMachine {
    pub fn new(timings: RecognitionTimings) -> Self {
        Self {
            phase: ListenPhase::AwaitingFirstSignal,
            last_identified_id: None,
            timings,
        }
    }

    pub fn phase(&self) -> ListenPhase {
        self.phase
    }

    pub fn last_identified_id(&self) -> Option<&str> {
        self.last_identified_id.as_deref()
    }

    /// Run one iteration: short probe, then a long probe and identification
    /// when sound follows silence or nothing has been identified yet.
    pub fn step(&mut self, sampler: &dyn AudioSampler, recognizer: &dyn Recognizer) -> Step {
        let delay = self.timings.iteration_delay;
        let probe = match sampler.sample(self.timings.short_probe) {
            Ok(probe) => probe,
            Err(e) => {
                tracing::warn!(error = %e, "short probe failed; retrying");
                return Step { report: None, wait: delay };
            }
        };

        if sampler::is_silent(&probe, self.timings.silence_threshold) {
            if self.phase != ListenPhase::Silence {
                tracing::info!("silence");
            }
            self.phase = ListenPhase::Silence;
            return Step {
                report: None,
                wait: self.timings.silence_cooldown + delay,
            };
        }

        let from = self.phase;
        if from == ListenPhase::ActiveListening {
            return Step { report: None, wait: delay };
        }

        tracing::info!(?from, "signal; identifying");
        let probe = match sampler.sample(self.timings.long_probe) {
            Ok(probe) => probe,
            Err(e) => {
                tracing::warn!(error = %e, "long probe failed; retrying");
                return Step { report: None, wait: delay };
            }
        };
        let identified = match recognizer.identify(&probe) {
            Ok(track) => track.filter(|t| !t.id.is_empty()),
            Err(e) => {
                tracing::warn!(error = %e, "recognition failed");
                None
            }
        };

        let report = match identified {
            None if from == ListenPhase::Silence => Some(RecognitionReport::Idle),
            None => None,
            Some(track) if self.last_identified_id.as_deref() == Some(track.id.as_str()) => {
                tracing::debug!(id = %track.id, "same track; not announced");
                None
            }
            Some(track) => {
                tracing::info!(id = %track.id, title = %track.title, artist = %track.artist, "track identified");
                self.last_identified_id = Some(track.id.clone());
                Some(RecognitionReport::TrackIdentified(track))
            }
        };
        self.phase = if self.last_identified_id.is_some() {
            ListenPhase::ActiveListening
        } else {
            ListenPhase::AwaitingFirstSignal
        };
        Step { report, wait: delay }
    }
}

struct LoopRun {
    id: u64,
    stop: Arc<AtomicBool>,
}

/// Owner of the background recognition thread. Lives on the primary loop.
pub struct RecognitionLoop {
    sampler: Arc<dyn AudioSampler>,
    recognizer: Arc<dyn Recognizer>,
    timings: RecognitionTimings,
    running: Option<LoopRun>,
    next_run_id: u64,
}

impl RecognitionLoop {
    pub fn new(
        sampler: Arc<dyn AudioSampler>,
        recognizer: Arc<dyn Recognizer>,
        timings: RecognitionTimings,
    ) -> Self {
        Self {
            sampler,
            recognizer,
            timings,
            running: None,
            next_run_id: 1,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Id of the current run, if any.
    pub fn run_id(&self) -> Option<u64> {
        self.running.as_ref().map(|run| run.id)
    }

    /// Start a run with a fresh debounce state. No-op while one is running.
    pub fn start(&mut self, mailbox: Sender<KioskMessage>) -> Result<u64> {
        if let Some(run) = self.running.as_ref() {
            return Ok(run.id);
        }
        let run_id = self.next_run_id;
        self.next_run_id += 1;
        let stop = Arc::new(AtomicBool::new(false));

        let sampler = self.sampler.clone();
        let recognizer = self.recognizer.clone();
        let timings = self.timings;
        let stop_flag = stop.clone();
        thread::Builder::new()
            .name(format!("kiosk-recognition-{run_id}"))
            .spawn(move || {
                run_loop(run_id, timings, sampler.as_ref(), recognizer.as_ref(), &stop_flag, &mailbox)
            })
            .context("spawn recognition thread")?;

        tracing::info!(run_id, "recognition loop started");
        self.running = Some(LoopRun { id: run_id, stop });
        Ok(run_id)
    }

    /// Ask the current run to end after its in-flight iteration. Returns immediately.
    pub fn stop(&mut self) {
        if let Some(run) = self.running.take() {
            run.stop.store(true, Ordering::Relaxed);
            tracing::info!(run_id = run.id, "recognition loop stopping");
        }
    }
}

impl Drop for RecognitionLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    run_id: u64,
    timings: RecognitionTimings,
    sampler: &dyn AudioSampler,
    recognizer: &dyn Recognizer,
    stop: &AtomicBool,
    mailbox: &Sender<KioskMessage>,
) {
    let mut machine = RecognitionMachine::new(timings);
    while !stop.load(Ordering::Relaxed) {
        let step = machine.step(sampler, recognizer);
        if let Some(report) = step.report {
            if mailbox.send(KioskMessage::Recognition { run_id, report }).is_err() {
                break;
            }
        }
        wait_unless_stopped(step.wait, stop);
    }
    tracing::debug!(run_id, "recognition loop exited");
}

fn wait_unless_stopped(wait: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + wait;
    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(STOP_POLL));
    }
}

/// Recognizer posting the probe as WAV to an HTTP endpoint that answers with
/// Shazam-shaped JSON.
pub struct HttpRecognizer {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpRecognizer {
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            agent: ureq::Agent::new_with_defaults(),
        }
    }

    fn submit(&self, probe: &AudioBuffer) -> Result<Option<RecognizedTrack>> {
        let wav = probe.to_wav()?;
        let resp = match self
            .agent
            .post(&self.endpoint)
            .config()
            .http_status_as_error(false)
            .build()
            .header("Content-Type", "audio/wav")
            .send(&wav[..])
        {
            Ok(resp) => resp,
            Err(err) => bail!("recognition request failed (transport) url={}: {err}", self.endpoint),
        };
        let code = resp.status();
        if code.as_u16() >= 400 {
            bail!("recognition request failed (status {code}) url={}", self.endpoint);
        }
        let body = resp
            .into_body()
            .with_config()
            .limit(MAX_RESPONSE_BYTES)
            .read_to_string()
            .context("recognition response read failed")?;
        parse_recognition(&body)
    }
}

impl Recognizer for HttpRecognizer {
    fn identify(&self, probe: &AudioBuffer) -> Result<Option<RecognizedTrack>, KioskError> {
        self.submit(probe).map_err(|e| KioskError::lookup_failed(&e))
    }
}

/// No endpoint configured: every probe is "no match".
pub struct DisabledRecognizer;

impl Recognizer for DisabledRecognizer {
    fn identify(&self, _probe: &AudioBuffer) -> Result<Option<RecognizedTrack>, KioskError> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct RecognitionResponse {
    track: Option<ShazamTrack>,
}

#[derive(Debug, Deserialize)]
struct ShazamTrack {
    key: Option<String>,
    title: Option<String>,
    subtitle: Option<String>,
    images: Option<ShazamImages>,
    #[serde(default)]
    sections: Vec<ShazamSection>,
}

#[derive(Debug, Deserialize)]
struct ShazamImages {
    coverart: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShazamSection {
    #[serde(default)]
    metadata: Vec<ShazamMetadata>,
}

#[derive(Debug, Deserialize)]
struct ShazamMetadata {
    text: Option<String>,
}

fn parse_recognition(body: &str) -> Result<Option<RecognizedTrack>> {
    let parsed: RecognitionResponse =
        serde_json::from_str(body).context("recognition response parse failed")?;
    let Some(track) = parsed.track else {
        return Ok(None);
    };
    let Some(id) = track.key.filter(|k| !k.is_empty()) else {
        return Ok(None);
    };
    let album = track
        .sections
        .first()
        .and_then(|section| section.metadata.first())
        .and_then(|meta| meta.text.clone());
    Ok(Some(RecognizedTrack {
        id,
        title: track.title.unwrap_or_else(|| "Unknown".to_string()),
        artist: track.subtitle.unwrap_or_else(|| "Unknown".to_string()),
        album: album.unwrap_or_else(|| "Unknown".to_string()),
        cover: track.images.and_then(|images| images.coverart),
    }))
}
