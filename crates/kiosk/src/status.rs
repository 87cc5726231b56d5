use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::Receiver;

use kiosk_types::{KioskStatus, UiEvent};

pub type SharedStatus = Arc<Mutex<KioskStatus>>;

pub fn shared(volume: u8) -> SharedStatus {
    Arc::new(Mutex::new(KioskStatus {
        volume,
        ..KioskStatus::default()
    }))
}

/// Fold every UI event into `status` until the event stream closes.
pub fn spawn_presenter(events: Receiver<UiEvent>, status: SharedStatus) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in events.iter() {
            log_event(&event);
            if let Ok(mut status) = status.lock() {
                status.apply(&event);
            }
        }
        tracing::debug!("presenter stopped");
    })
}

fn log_event(event: &UiEvent) {
    match event {
        UiEvent::NowPlayingChanged(np) => {
            tracing::info!(title = %np.title, artist = %np.artist, album = %np.album, "now playing");
        }
        UiEvent::PlaybackStateChanged { source, status } => {
            tracing::info!(%source, ?status, "playback state");
        }
        UiEvent::VolumeChanged { volume } => tracing::debug!(volume, "volume changed"),
        UiEvent::Error { message } => tracing::warn!(%message, "error shown"),
    }
}
