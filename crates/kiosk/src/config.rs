//! Configuration loading and parsing.
//!
//! The TOML schema mirrors the resolved [`Settings`]: every field is optional in
//! the file and falls back to a kiosk default.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use kiosk_player::config::PlaybackConfig;

const DEFAULT_HTTP_BIND: &str = "0.0.0.0:5580";
const DEFAULT_VOLUME: u8 = 40;
const DEFAULT_USER_AGENT: &str = "MusicKiosk/0.1 (kiosk@example.com)";
const DEFAULT_MUSICBRAINZ_URL: &str = "https://musicbrainz.org/ws/2";
const DEFAULT_COVER_ART_URL: &str = "https://coverartarchive.org/release";
/// File looked up next to the executable when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "kiosk.toml";

/// Top-level kiosk configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KioskConfig {
    /// HTTP API bind address (host:port).
    pub http_bind: Option<String>,
    /// Volume applied at startup, 0-100.
    pub initial_volume: Option<u8>,
    #[serde(default)]
    pub disc: DiscConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub receiver: ReceiverConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub bluetooth: BluetoothConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscConfig {
    /// Optical drive device node.
    pub device: Option<String>,
    /// Directory exposing one audio file per disc track.
    pub tracks_dir: Option<String>,
    /// Track file name; `{nn}` is the zero-padded index, `{n}` the plain one.
    pub track_pattern: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioConfig {
    /// Output device name substring; host default when unset.
    pub output_device: Option<String>,
    /// Capture device for the Bluetooth loopback; host default when unset.
    pub capture_device: Option<String>,
    pub buffer_seconds: Option<f32>,
    pub refill_max_frames: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecognitionConfig {
    /// Endpoint accepting a WAV probe and answering Shazam-shaped JSON.
    pub endpoint: Option<String>,
    pub short_probe_secs: Option<f32>,
    pub long_probe_secs: Option<f32>,
    /// RMS of 16-bit samples under which a probe counts as silent.
    pub silence_threshold: Option<f64>,
    pub silence_cooldown_secs: Option<f32>,
    pub iteration_delay_secs: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceiverConfig {
    pub binary: Option<String>,
    pub config_path: Option<String>,
    /// MPRIS player name passed to `playerctl --player`.
    pub player: Option<String>,
    pub poll_interval_secs: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataConfig {
    pub enabled: Option<bool>,
    /// User-Agent string required by MusicBrainz (include contact info).
    pub user_agent: Option<String>,
    pub base_url: Option<String>,
    pub cover_art_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BluetoothConfig {
    /// Load `snd-aloop` before powering the radio on.
    pub load_loopback: Option<bool>,
}

/// Fully resolved settings.
#[derive(Clone, Debug)]
pub struct Settings {
    pub http_bind: SocketAddr,
    pub initial_volume: u8,
    pub disc: DiscSettings,
    pub output_device: Option<String>,
    pub capture_device: Option<String>,
    pub playback: PlaybackConfig,
    pub recognition: RecognitionSettings,
    pub receiver: ReceiverSettings,
    pub metadata: MetadataSettings,
    pub load_loopback: bool,
}

#[derive(Clone, Debug)]
pub struct DiscSettings {
    pub device: String,
    pub tracks_dir: PathBuf,
    pub track_pattern: String,
}

#[derive(Clone, Debug)]
pub struct RecognitionSettings {
    pub endpoint: Option<String>,
    pub short_probe: Duration,
    pub long_probe: Duration,
    pub silence_threshold: f64,
    pub silence_cooldown: Duration,
    pub iteration_delay: Duration,
}

#[derive(Clone, Debug)]
pub struct ReceiverSettings {
    pub binary: String,
    pub config_path: String,
    pub player: String,
    pub poll_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct MetadataSettings {
    pub enabled: bool,
    pub user_agent: String,
    pub base_url: String,
    pub cover_art_url: String,
}

impl KioskConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        toml::from_str::<KioskConfig>(&raw).with_context(|| format!("parse config {:?}", path))
    }

    /// Load `path`, else `kiosk.toml` next to the executable, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let beside_exe = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_CONFIG_FILE)));
        match beside_exe {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                tracing::info!("no config file found; using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Apply defaults and validate.
    pub fn resolve(self) -> Result<Settings> {
        let http_bind = self
            .http_bind
            .as_deref()
            .unwrap_or(DEFAULT_HTTP_BIND)
            .parse()
            .with_context(|| format!("parse http_bind {:?}", self.http_bind))?;
        let playback_defaults = PlaybackConfig::default();
        Ok(Settings {
            http_bind,
            initial_volume: self.initial_volume.unwrap_or(DEFAULT_VOLUME).min(100),
            disc: DiscSettings {
                device: non_empty(self.disc.device).unwrap_or_else(|| "/dev/cdrom".to_string()),
                tracks_dir: non_empty(self.disc.tracks_dir)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/mnt/cdda")),
                track_pattern: non_empty(self.disc.track_pattern)
                    .unwrap_or_else(|| "track{nn}.wav".to_string()),
            },
            output_device: non_empty(self.audio.output_device),
            capture_device: non_empty(self.audio.capture_device),
            playback: PlaybackConfig {
                refill_max_frames: self
                    .audio
                    .refill_max_frames
                    .unwrap_or(playback_defaults.refill_max_frames),
                buffer_seconds: self
                    .audio
                    .buffer_seconds
                    .unwrap_or(playback_defaults.buffer_seconds),
                drain_grace: playback_defaults.drain_grace,
            },
            recognition: RecognitionSettings {
                endpoint: non_empty(self.recognition.endpoint),
                short_probe: seconds(self.recognition.short_probe_secs, 2.0),
                long_probe: seconds(self.recognition.long_probe_secs, 8.0),
                silence_threshold: self.recognition.silence_threshold.unwrap_or(500.0),
                silence_cooldown: seconds(self.recognition.silence_cooldown_secs, 5.0),
                iteration_delay: seconds(self.recognition.iteration_delay_secs, 1.0),
            },
            receiver: ReceiverSettings {
                binary: non_empty(self.receiver.binary)
                    .unwrap_or_else(|| "/usr/local/bin/spotifyd".to_string()),
                config_path: non_empty(self.receiver.config_path)
                    .unwrap_or_else(|| "/etc/spotifyd.conf".to_string()),
                player: non_empty(self.receiver.player).unwrap_or_else(|| "spotifyd".to_string()),
                poll_interval: seconds(self.receiver.poll_interval_secs, 1.0),
            },
            metadata: MetadataSettings {
                enabled: self.metadata.enabled.unwrap_or(true),
                user_agent: non_empty(self.metadata.user_agent)
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
                base_url: non_empty(self.metadata.base_url)
                    .unwrap_or_else(|| DEFAULT_MUSICBRAINZ_URL.to_string()),
                cover_art_url: non_empty(self.metadata.cover_art_url)
                    .unwrap_or_else(|| DEFAULT_COVER_ART_URL.to_string()),
            },
            load_loopback: self.bluetooth.load_loopback.unwrap_or(true),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Seconds from config, falling back for missing, negative, non-finite or
/// out-of-range values.
fn seconds(value: Option<f32>, default: f32) -> Duration {
    value
        .and_then(|v| Duration::try_from_secs_f32(v).ok())
        .unwrap_or_else(|| Duration::from_secs_f32(default))
}
