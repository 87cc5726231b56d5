//! Streaming receiver: the `spotifyd` daemon and its MPRIS session watch.

use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::Sender;

use kiosk_types::NowPlaying;

use crate::command;
use crate::config::ReceiverSettings;
use crate::error::KioskError;
use crate::orchestrator::KioskMessage;

const STOP_POLL: Duration = Duration::from_millis(50);
/// How long the daemon gets to exit after SIGTERM before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(3);
const PLAYERCTL_FORMAT: &str =
    "{{mpris:trackid}}\t{{xesam:title}}\t{{xesam:artist}}\t{{xesam:album}}\t{{mpris:artUrl}}";

/// Track reported by the receiver's MPRIS interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiverTrack {
    pub track_id: String,
    pub title: String,
    pub artists: String,
    pub album: String,
    pub art_url: Option<String>,
}

impl ReceiverTrack {
    pub fn now_playing(&self) -> NowPlaying {
        NowPlaying {
            title: self.title.clone(),
            artist: self.artists.clone(),
            album: self.album.clone(),
            cover: self.art_url.clone(),
            ..NowPlaying::default()
        }
    }
}

/// Receiver process supervision and session introspection.
pub trait ReceiverControl: Send + Sync {
    fn start(&self) -> Result<(), KioskError>;
    fn stop(&self) -> Result<(), KioskError>;
    /// Current track; `Ok(None)` while no session is active.
    fn now_playing(&self) -> Result<Option<ReceiverTrack>, KioskError>;
}

pub struct SpotifydReceiver {
    settings: ReceiverSettings,
    child: Mutex<Option<Child>>,
    stop_grace: Duration,
}

impl SpotifydReceiver {
    pub fn new(settings: ReceiverSettings) -> Self {
        Self {
            settings,
            child: Mutex::new(None),
            stop_grace: STOP_GRACE,
        }
    }

    fn spawn(&self) -> Result<Child> {
        Command::new(&self.settings.binary)
            .args(["--no-daemon", "--config-path", &self.settings.config_path])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn {}", self.settings.binary))
    }
}

impl ReceiverControl for SpotifydReceiver {
    fn start(&self) -> Result<(), KioskError> {
        let mut guard = self
            .child
            .lock()
            .map_err(|_| KioskError::ExternalProcessUnavailable("receiver lock poisoned".into()))?;
        if let Some(child) = guard.as_mut() {
            match child.try_wait() {
                Ok(None) => {
                    tracing::debug!(pid = child.id(), "receiver already running");
                    return Ok(());
                }
                Ok(Some(status)) => tracing::warn!(%status, "receiver exited; restarting"),
                Err(e) => tracing::warn!(error = %e, "receiver status unknown; restarting"),
            }
        }
        let child = self.spawn().map_err(|e| KioskError::external(&e))?;
        tracing::info!(pid = child.id(), binary = %self.settings.binary, "receiver started");
        *guard = Some(child);
        Ok(())
    }

    fn stop(&self) -> Result<(), KioskError> {
        let mut guard = self
            .child
            .lock()
            .map_err(|_| KioskError::ExternalProcessUnavailable("receiver lock poisoned".into()))?;
        let Some(mut child) = guard.take() else {
            return Ok(());
        };
        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }
        let pid = child.id();
        // SIGTERM lets the daemon release the audio device and its session.
        if let Err(e) = command::run("kill", &["-TERM", &pid.to_string()]) {
            tracing::warn!(pid, error = %format!("{e:#}"), "receiver SIGTERM failed");
        }
        if exited_within(&mut child, self.stop_grace) {
            tracing::info!(pid, "receiver stopped");
            return Ok(());
        }
        tracing::warn!(pid, grace = ?self.stop_grace, "receiver ignored SIGTERM; killing");
        child
            .kill()
            .context("kill receiver")
            .map_err(|e| KioskError::external(&e))?;
        let _ = child.wait();
        tracing::info!(pid, "receiver killed");
        Ok(())
    }

    fn now_playing(&self) -> Result<Option<ReceiverTrack>, KioskError> {
        let player = format!("--player={}", self.settings.player);
        let out = command::run("playerctl", &[&player, "metadata", "--format", PLAYERCTL_FORMAT])
            .map_err(|e| KioskError::external(&e))?;
        Ok(parse_playerctl_line(&out))
    }
}

/// Poll `child` until it exits or `grace` elapses.
fn exited_within(child: &mut Child, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "receiver status unknown");
                return false;
            }
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(STOP_POLL.min(deadline - now));
    }
}

/// Parse one `playerctl metadata --format` line produced with [`PLAYERCTL_FORMAT`].
fn parse_playerctl_line(line: &str) -> Option<ReceiverTrack> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = line.split('\t');
    let track_id = fields.next()?.trim();
    if track_id.is_empty() {
        return None;
    }
    let mut next = || fields.next().map(str::trim).unwrap_or_default().to_string();
    let title = next();
    let artists = next();
    let album = next();
    let art_url = Some(next()).filter(|url| !url.is_empty());
    Some(ReceiverTrack {
        track_id: track_id.to_string(),
        title: if title.is_empty() { "Unknown".to_string() } else { title },
        artists,
        album,
        art_url,
    })
}

/// What the watch reports to the primary loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiverUpdate {
    Track(ReceiverTrack),
    /// Receiver unreachable or idle; the reason is shown as the title.
    Waiting(String),
}

/// Turns successive polls into updates: one per track change, one per outage.
#[derive(Default)]
pub struct SessionTracker {
    last_track_id: Option<String>,
    waiting: bool,
}

impl SessionTracker {
    pub fn observe(
        &mut self,
        polled: Result<Option<ReceiverTrack>, KioskError>,
    ) -> Option<ReceiverUpdate> {
        match polled {
            Ok(Some(track)) => {
                self.waiting = false;
                if self.last_track_id.as_deref() == Some(track.track_id.as_str()) {
                    return None;
                }
                self.last_track_id = Some(track.track_id.clone());
                Some(ReceiverUpdate::Track(track))
            }
            Ok(None) => self.outage("no active session".to_string()),
            Err(e) => self.outage(e.to_string()),
        }
    }

    fn outage(&mut self, reason: String) -> Option<ReceiverUpdate> {
        // The display was replaced by the waiting text; re-announce on recovery.
        self.last_track_id = None;
        if self.waiting {
            return None;
        }
        self.waiting = true;
        Some(ReceiverUpdate::Waiting(reason))
    }
}

struct WatchRun {
    id: u64,
    stop: Arc<AtomicBool>,
}

/// Background poller of [`ReceiverControl::now_playing`].
pub struct SessionWatch {
    receiver: Arc<dyn ReceiverControl>,
    interval: Duration,
    running: Option<WatchRun>,
    next_watch_id: u64,
}

impl SessionWatch {
    pub fn new(receiver: Arc<dyn ReceiverControl>, interval: Duration) -> Self {
        Self {
            receiver,
            interval,
            running: None,
            next_watch_id: 1,
        }
    }

    pub fn watch_id(&self) -> Option<u64> {
        self.running.as_ref().map(|run| run.id)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn start(&mut self, mailbox: Sender<KioskMessage>) -> Result<u64> {
        if let Some(run) = self.running.as_ref() {
            return Ok(run.id);
        }
        let watch_id = self.next_watch_id;
        self.next_watch_id += 1;
        let stop = Arc::new(AtomicBool::new(false));

        let receiver = self.receiver.clone();
        let interval = self.interval;
        let stop_flag = stop.clone();
        thread::Builder::new()
            .name(format!("kiosk-receiver-watch-{watch_id}"))
            .spawn(move || {
                let mut tracker = SessionTracker::default();
                while !stop_flag.load(Ordering::Relaxed) {
                    if let Some(update) = tracker.observe(receiver.now_playing()) {
                        if mailbox.send(KioskMessage::Receiver { watch_id, update }).is_err() {
                            break;
                        }
                    }
                    sleep_unless_stopped(interval, &stop_flag);
                }
                tracing::debug!(watch_id, "receiver watch exited");
            })
            .context("spawn receiver watch")?;

        tracing::info!(watch_id, interval_ms = interval.as_millis() as u64, "receiver watch started");
        self.running = Some(WatchRun { id: watch_id, stop });
        Ok(watch_id)
    }

    pub fn stop(&mut self) {
        if let Some(run) = self.running.take() {
            run.stop.store(true, Ordering::Relaxed);
            tracing::info!(watch_id = run.id, "receiver watch stopping");
        }
    }
}

impl Drop for SessionWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sleep_unless_stopped(wait: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + wait;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(STOP_POLL));
    }
}
