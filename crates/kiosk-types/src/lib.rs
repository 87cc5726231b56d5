use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the mutually exclusive audio inputs of the kiosk.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Optical disc transport.
    Disc,
    /// Network-streaming receiver (Spotify Connect).
    StreamingReceiver,
    /// Bluetooth sink listener.
    BluetoothSink,
}

impl Source {
    /// Short label used in logs and placeholder text.
    pub fn label(self) -> &'static str {
        match self {
            Source::Disc => "CD",
            Source::StreamingReceiver => "Spotify",
            Source::BluetoothSink => "Bluetooth",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "disc" | "cd" => Ok(Source::Disc),
            "receiver" | "streaming_receiver" | "spotify" => Ok(Source::StreamingReceiver),
            "bluetooth" | "bluetooth_sink" | "bt" => Ok(Source::BluetoothSink),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// Coarse playback status reported alongside the active source.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Playing,
    Paused,
    /// Last disc track finished; terminal until the source is reselected.
    EndOfDisc,
    /// Waiting for the streaming receiver to report a session.
    Waiting,
    /// Bluetooth sink is up and the recognition loop is listening.
    Listening,
    Error,
}

impl PlaybackStatus {
    /// Statuses a source enters right after being (re)selected.
    pub fn is_startup(self) -> bool {
        matches!(
            self,
            PlaybackStatus::Loading | PlaybackStatus::Waiting | PlaybackStatus::Listening
        )
    }
}

/// One entry of the disc track list (1-based).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackEntry {
    pub index: usize,
    pub title: String,
    pub performer: String,
    /// `m:ss`, or `"unknown"` when metadata has no length.
    pub duration_formatted: String,
}

/// What the display should show as "now playing".
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NowPlaying {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Cover reference: an `http(s)` URL or a `data:` URI.
    pub cover: Option<String>,
    pub duration: Option<String>,
    pub track_number: Option<usize>,
    pub track_count: Option<usize>,
}

impl NowPlaying {
    /// A title-only placeholder with every other field empty.
    pub fn placeholder(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Events produced by the core toward the presentation layer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiEvent {
    NowPlayingChanged(NowPlaying),
    PlaybackStateChanged {
        source: Source,
        status: PlaybackStatus,
    },
    VolumeChanged {
        volume: u8,
    },
    Error {
        message: String,
    },
}

/// Snapshot of the kiosk served to front ends.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KioskStatus {
    pub active_source: Option<Source>,
    pub status: Option<PlaybackStatus>,
    pub now_playing: Option<NowPlaying>,
    pub volume: u8,
    /// Last user-visible error; cleared when a source is (re)selected.
    pub last_error: Option<String>,
}

impl KioskStatus {
    /// Fold one UI event into the snapshot.
    pub fn apply(&mut self, event: &UiEvent) {
        match event {
            UiEvent::NowPlayingChanged(now_playing) => {
                self.now_playing = Some(now_playing.clone());
            }
            UiEvent::PlaybackStateChanged { source, status } => {
                if self.active_source != Some(*source) {
                    self.now_playing = None;
                }
                if self.active_source != Some(*source) || status.is_startup() {
                    self.last_error = None;
                }
                self.active_source = Some(*source);
                self.status = Some(*status);
            }
            UiEvent::VolumeChanged { volume } => {
                self.volume = *volume;
            }
            UiEvent::Error { message } => {
                self.last_error = Some(message.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_parses_aliases() {
        assert_eq!("CD".parse::<Source>(), Ok(Source::Disc));
        assert_eq!(" spotify ".parse::<Source>(), Ok(Source::StreamingReceiver));
        assert_eq!("bt".parse::<Source>(), Ok(Source::BluetoothSink));
        assert!("tape".parse::<Source>().is_err());
    }

    #[test]
    fn ui_event_serializes_with_kind_tag() {
        let event = UiEvent::PlaybackStateChanged {
            source: Source::BluetoothSink,
            status: PlaybackStatus::Listening,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "playback_state_changed");
        assert_eq!(json["source"], "bluetooth_sink");
        assert_eq!(json["status"], "listening");
    }

    #[test]
    fn status_clears_error_when_source_changes() {
        let mut status = KioskStatus::default();
        status.apply(&UiEvent::PlaybackStateChanged {
            source: Source::Disc,
            status: PlaybackStatus::Loading,
        });
        status.apply(&UiEvent::Error {
            message: "boom".to_string(),
        });
        assert_eq!(status.last_error.as_deref(), Some("boom"));

        status.apply(&UiEvent::PlaybackStateChanged {
            source: Source::Disc,
            status: PlaybackStatus::Error,
        });
        assert_eq!(status.last_error.as_deref(), Some("boom"));

        status.apply(&UiEvent::PlaybackStateChanged {
            source: Source::StreamingReceiver,
            status: PlaybackStatus::Waiting,
        });
        assert!(status.last_error.is_none());
        assert_eq!(status.active_source, Some(Source::StreamingReceiver));
    }

    #[test]
    fn placeholder_only_sets_title() {
        let np = NowPlaying::placeholder("Loading disc");
        assert_eq!(np.title, "Loading disc");
        assert!(np.artist.is_empty());
        assert!(np.cover.is_none());
    }
}
