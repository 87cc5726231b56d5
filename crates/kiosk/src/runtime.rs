//! Kiosk runtime: wires production collaborators and runs the primary loop.

use std::sync::Arc;

use anyhow::Result;

use kiosk_types::Source;

use crate::config::Settings;
use crate::disc::CdromReader;
use crate::events::UiEvents;
use crate::http_api::{self, AppState};
use crate::metadata::{MetadataService, MusicBrainzClient};
use crate::orchestrator::{KioskCommand, KioskMessage, Orchestrator, Services};
use crate::pipeline::{PlayerPipelineFactory, VolumeSetting};
use crate::radio::BluetoothctlRadio;
use crate::receiver::{ReceiverControl, SessionWatch, SpotifydReceiver};
use crate::recognition::{
    DisabledRecognizer, HttpRecognizer, RecognitionLoop, RecognitionTimings, Recognizer,
};
use crate::sampler::DeviceSampler;
use crate::sequencer::DiscSequencer;
use crate::status;

/// List input and output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    kiosk_player::device::list_devices(&host)
}

/// Run the kiosk until Ctrl-C or a shutdown command.
pub fn run(settings: Settings, initial_source: Option<Source>, install_ctrlc: bool) -> Result<()> {
    let (mailbox, inbox) = crossbeam_channel::unbounded::<KioskMessage>();
    let (ui_tx, ui_rx) = crossbeam_channel::unbounded();
    let ui = UiEvents::new(ui_tx);

    let status = status::shared(settings.initial_volume);
    let presenter = status::spawn_presenter(ui_rx, status.clone());

    let orchestrator = build_orchestrator(&settings, mailbox.clone(), ui);

    if install_ctrlc {
        let mailbox = mailbox.clone();
        let _ = ctrlc::set_handler(move || {
            tracing::info!("interrupt received");
            if mailbox.send(KioskMessage::Command(KioskCommand::Shutdown)).is_err() {
                std::process::exit(130);
            }
        });
    }

    let _http = http_api::spawn_http_server(
        settings.http_bind,
        AppState {
            mailbox: mailbox.clone(),
            status,
        },
    );

    if let Some(source) = initial_source {
        let _ = mailbox.send(KioskMessage::Command(KioskCommand::Select(source)));
    }
    drop(mailbox);

    orchestrator.run(inbox);
    let _ = presenter.join();
    Ok(())
}

fn build_orchestrator(
    settings: &Settings,
    mailbox: crossbeam_channel::Sender<KioskMessage>,
    ui: UiEvents,
) -> Orchestrator {
    let disc = Arc::new(CdromReader::new(
        settings.disc.device.clone(),
        settings.disc.tracks_dir.clone(),
        settings.disc.track_pattern.clone(),
    ));
    let metadata = MusicBrainzClient::new(&settings.metadata)
        .map(|client| Arc::new(client) as Arc<dyn MetadataService>);
    if metadata.is_none() {
        tracing::info!("metadata lookup disabled");
    }
    let factory = PlayerPipelineFactory::new(settings.output_device.clone(), settings.playback.clone());
    let sequencer = DiscSequencer::new(
        Box::new(factory),
        disc,
        metadata,
        VolumeSetting::new(settings.initial_volume),
        mailbox.clone(),
        ui.clone(),
    );

    let recognizer: Arc<dyn Recognizer> = match settings.recognition.endpoint.clone() {
        Some(endpoint) => {
            tracing::info!(endpoint = %endpoint, "recognition endpoint");
            Arc::new(HttpRecognizer::new(endpoint))
        }
        None => {
            tracing::info!("no recognition endpoint; bluetooth titles stay generic");
            Arc::new(DisabledRecognizer)
        }
    };
    let timings = RecognitionTimings {
        short_probe: settings.recognition.short_probe,
        long_probe: settings.recognition.long_probe,
        silence_cooldown: settings.recognition.silence_cooldown,
        iteration_delay: settings.recognition.iteration_delay,
        silence_threshold: settings.recognition.silence_threshold,
    };
    let recognition = RecognitionLoop::new(
        Arc::new(DeviceSampler::new(settings.capture_device.clone())),
        recognizer,
        timings,
    );

    let receiver: Arc<dyn ReceiverControl> = Arc::new(SpotifydReceiver::new(settings.receiver.clone()));
    let watch = SessionWatch::new(receiver.clone(), settings.receiver.poll_interval);
    let services = Services {
        radio: Arc::new(BluetoothctlRadio),
        receiver,
        load_loopback: settings.load_loopback,
    };

    Orchestrator::new(sequencer, recognition, watch, services, mailbox, ui)
}
