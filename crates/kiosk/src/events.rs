//! Outgoing events toward the presentation layer.

use crossbeam_channel::Sender;

use kiosk_types::{NowPlaying, PlaybackStatus, Source, UiEvent};

/// Sender side of the UI event stream.
///
/// A closed stream is not an error for the core: the kiosk keeps playing even
/// when no presenter is attached.
#[derive(Clone)]
pub struct UiEvents {
    tx: Sender<UiEvent>,
}

impl UiEvents {
    pub fn new(tx: Sender<UiEvent>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("ui event dropped: presenter gone");
        }
    }

    pub fn now_playing(&self, now_playing: NowPlaying) {
        self.emit(UiEvent::NowPlayingChanged(now_playing));
    }

    pub fn state(&self, source: Source, status: PlaybackStatus) {
        self.emit(UiEvent::PlaybackStateChanged { source, status });
    }

    pub fn volume(&self, volume: u8) {
        self.emit(UiEvent::VolumeChanged { volume });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(UiEvent::Error {
            message: message.into(),
        });
    }
}
