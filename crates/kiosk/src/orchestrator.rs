//! Source orchestrator: the primary loop.
//!
//! One thread owns the active source, the disc sequencer, the recognition loop
//! and the receiver watch. Everything else (HTTP handlers, the Ctrl-C hook,
//! pipeline notifiers, disc loaders, background loops) talks to it by posting
//! a [`KioskMessage`] into its mailbox.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use kiosk_types::{NowPlaying, PlaybackStatus, Source};

use crate::events::UiEvents;
use crate::pipeline::{PipelineEvent, VolumeSetting};
use crate::radio::RadioControl;
use crate::receiver::{ReceiverControl, ReceiverUpdate, SessionWatch};
use crate::recognition::{RecognitionLoop, RecognitionReport};
use crate::sequencer::{DiscLoad, DiscSequencer, SequencerState};

pub const BLUETOOTH_PLACEHOLDER: &str = "Bluetooth speaker mode";
pub const DISC_PLACEHOLDER: &str = "Loading disc…";
pub const RECEIVER_PLACEHOLDER: &str = "Spotify Connect";

/// User-facing commands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KioskCommand {
    Select(Source),
    Next,
    Previous,
    TogglePlayPause,
    SetVolume(u8),
    Shutdown,
}

/// Everything the primary loop consumes.
#[derive(Debug)]
pub enum KioskMessage {
    Command(KioskCommand),
    Pipeline { pipeline_id: u64, event: PipelineEvent },
    DiscLoaded { generation: u64, load: DiscLoad },
    Recognition { run_id: u64, report: RecognitionReport },
    Receiver { watch_id: u64, update: ReceiverUpdate },
}

/// External services torn down on every source switch.
pub struct Services {
    pub radio: Arc<dyn RadioControl>,
    pub receiver: Arc<dyn ReceiverControl>,
    /// Load the ALSA loopback module before powering the radio.
    pub load_loopback: bool,
}

pub struct Orchestrator {
    active_source: Option<Source>,
    sequencer: DiscSequencer,
    recognition: RecognitionLoop,
    watch: SessionWatch,
    services: Services,
    mailbox: Sender<KioskMessage>,
    ui: UiEvents,
}

impl Orchestrator {
    pub fn new(
        sequencer: DiscSequencer,
        recognition: RecognitionLoop,
        watch: SessionWatch,
        services: Services,
        mailbox: Sender<KioskMessage>,
        ui: UiEvents,
    ) -> Self {
        Self {
            active_source: None,
            sequencer,
            recognition,
            watch,
            services,
            mailbox,
            ui,
        }
    }

    pub fn active_source(&self) -> Option<Source> {
        self.active_source
    }

    pub fn sequencer(&self) -> &DiscSequencer {
        &self.sequencer
    }

    pub fn volume(&self) -> VolumeSetting {
        self.sequencer.volume()
    }

    /// Switch to `source`. Reselecting the active source tears it down and starts it again.
    pub fn select(&mut self, source: Source) {
        tracing::info!(from = ?self.active_source, to = %source, "select source");
        self.stop_background();
        self.sequencer.teardown();
        self.stop_services();
        self.active_source = Some(source);

        match source {
            Source::Disc => self.start_disc(),
            Source::StreamingReceiver => self.start_receiver(),
            Source::BluetoothSink => self.start_bluetooth(),
        }
    }

    /// A superseded load still reads the disc but never reaches playback.
    fn start_disc(&mut self) {
        self.sequencer.load();
        if self.sequencer.state() == SequencerState::Loading {
            self.ui.now_playing(NowPlaying::placeholder(DISC_PLACEHOLDER));
        }
    }

    fn start_receiver(&mut self) {
        self.ui.state(Source::StreamingReceiver, PlaybackStatus::Waiting);
        self.ui.now_playing(NowPlaying::placeholder(RECEIVER_PLACEHOLDER));
        if let Err(e) = self.services.receiver.start() {
            tracing::warn!(error = %e, "receiver start failed; watching anyway");
        }
        if let Err(e) = self.watch.start(self.mailbox.clone()) {
            tracing::error!(error = %e, "receiver watch not started");
        }
    }

    fn start_bluetooth(&mut self) {
        if self.services.load_loopback {
            if let Err(e) = self.services.radio.ensure_loopback() {
                tracing::warn!(error = %e, "loopback module unavailable");
            }
        }
        if let Err(e) = self.services.radio.power(true) {
            tracing::warn!(error = %e, "bluetooth power on failed");
        }
        self.ui.state(Source::BluetoothSink, PlaybackStatus::Listening);
        self.ui.now_playing(NowPlaying::placeholder(BLUETOOTH_PLACEHOLDER));
        if let Err(e) = self.recognition.start(self.mailbox.clone()) {
            tracing::error!(error = %e, "recognition loop not started");
        }
    }

    fn stop_background(&mut self) {
        self.recognition.stop();
        self.watch.stop();
    }

    /// Best effort: every step runs even when an earlier one fails.
    fn stop_services(&self) {
        if let Err(e) = self.services.radio.power(false) {
            tracing::warn!(error = %e, "bluetooth power off failed");
        }
        if let Err(e) = self.services.receiver.stop() {
            tracing::warn!(error = %e, "receiver stop failed");
        }
    }

    pub fn set_volume(&mut self, percent: u8) {
        let volume = VolumeSetting::new(percent);
        self.sequencer.set_volume(volume);
        tracing::info!(volume = volume.percent(), "volume");
        self.ui.volume(volume.percent());
    }

    /// Tear everything down and power off external services.
    pub fn shutdown(&mut self) {
        tracing::info!(source = ?self.active_source, "shutting down");
        self.stop_background();
        self.sequencer.teardown();
        self.stop_services();
        self.active_source = None;
    }

    /// Apply one message. Returns `false` once the loop should exit.
    pub fn handle(&mut self, message: KioskMessage) -> bool {
        match message {
            KioskMessage::Command(command) => return self.handle_command(command),
            KioskMessage::Pipeline { pipeline_id, event } => {
                self.sequencer.on_pipeline_event(pipeline_id, event);
            }
            KioskMessage::DiscLoaded { generation, load } => {
                self.sequencer.on_disc_loaded(generation, load);
            }
            KioskMessage::Recognition { run_id, report } => self.on_recognition(run_id, report),
            KioskMessage::Receiver { watch_id, update } => self.on_receiver(watch_id, update),
        }
        true
    }

    fn handle_command(&mut self, command: KioskCommand) -> bool {
        tracing::debug!(?command, "command");
        match command {
            KioskCommand::Select(source) => self.select(source),
            KioskCommand::Next => self.sequencer.next(),
            KioskCommand::Previous => self.sequencer.previous(),
            KioskCommand::TogglePlayPause => self.sequencer.toggle_play_pause(),
            KioskCommand::SetVolume(percent) => self.set_volume(percent),
            KioskCommand::Shutdown => {
                self.shutdown();
                return false;
            }
        }
        true
    }

    fn on_recognition(&mut self, run_id: u64, report: RecognitionReport) {
        if self.active_source != Some(Source::BluetoothSink) || self.recognition.run_id() != Some(run_id) {
            tracing::debug!(run_id, "stale recognition report ignored");
            return;
        }
        let now_playing = match report {
            RecognitionReport::TrackIdentified(track) => NowPlaying {
                title: track.title,
                artist: track.artist,
                album: track.album,
                cover: track.cover,
                ..NowPlaying::default()
            },
            RecognitionReport::Idle => NowPlaying::placeholder(BLUETOOTH_PLACEHOLDER),
        };
        self.ui.now_playing(now_playing);
    }

    fn on_receiver(&mut self, watch_id: u64, update: ReceiverUpdate) {
        if self.active_source != Some(Source::StreamingReceiver) || self.watch.watch_id() != Some(watch_id) {
            tracing::debug!(watch_id, "stale receiver update ignored");
            return;
        }
        match update {
            ReceiverUpdate::Track(track) => {
                tracing::info!(track_id = %track.track_id, title = %track.title, "receiver track");
                self.ui.state(Source::StreamingReceiver, PlaybackStatus::Playing);
                self.ui.now_playing(track.now_playing());
            }
            ReceiverUpdate::Waiting(reason) => {
                tracing::info!(%reason, "receiver waiting");
                self.ui.state(Source::StreamingReceiver, PlaybackStatus::Waiting);
                self.ui.now_playing(NowPlaying::placeholder(format!(
                    "Waiting for connection: {reason}"
                )));
            }
        }
    }

    /// Consume the mailbox until shutdown or until every sender is gone.
    pub fn run(mut self, inbox: Receiver<KioskMessage>) {
        tracing::info!("kiosk loop started");
        loop {
            let Ok(message) = inbox.recv() else {
                self.shutdown();
                break;
            };
            if !self.handle(message) {
                break;
            }
        }
        tracing::info!("kiosk loop stopped");
    }
}
