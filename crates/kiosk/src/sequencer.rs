//! Disc playback sequencer.
//!
//! Owns the track list of the inserted disc, the current index and the single
//! active [`PipelineHandle`]. Runs on the primary loop; the disc load and the
//! pipeline notifications come back as [`KioskMessage`]s.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;

use kiosk_types::{NowPlaying, PlaybackStatus, Source, TrackEntry};

use crate::disc::DiscReader;
use crate::events::UiEvents;
use crate::metadata::{MetadataService, cover_data_uri};
use crate::orchestrator::KioskMessage;
use crate::pipeline::{
    PipelineDescriptor, PipelineEvent, PipelineFactory, PipelineHandle, PipelineNotifier,
    PipelineState, VolumeSetting,
};
use crate::tracklist::{self, AlbumInfo, UNKNOWN_DURATION};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Loading,
    Playing,
    Paused,
    /// Last track finished; terminal until the disc source is reselected.
    EndOfDisc,
    /// Build or pipeline failure; terminal until the disc source is reselected.
    Error,
}

/// Result of the background disc load.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscLoad {
    pub tracks: Vec<TrackEntry>,
    pub album: AlbumInfo,
    /// `data:` URI of the front cover.
    pub cover: Option<String>,
}

struct PlaybackSession {
    tracks: Vec<TrackEntry>,
    current_index: usize,
    pipeline: Option<PipelineHandle>,
    album: AlbumInfo,
    cover: Option<String>,
}

impl PlaybackSession {
    fn now_playing(&self) -> NowPlaying {
        let track = self.tracks.get(self.current_index.saturating_sub(1));
        NowPlaying {
            title: track.map(|t| t.title.clone()).unwrap_or_default(),
            artist: track
                .map(|t| t.performer.clone())
                .unwrap_or_else(|| self.album.artist.clone()),
            album: self.album.title.clone(),
            cover: self.cover.clone(),
            duration: track
                .map(|t| t.duration_formatted.clone())
                .filter(|d| d != UNKNOWN_DURATION),
            track_number: Some(self.current_index),
            track_count: Some(self.tracks.len()),
        }
    }

    fn stop_pipeline(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.teardown();
        }
    }
}

pub struct DiscSequencer {
    state: SequencerState,
    session: Option<PlaybackSession>,
    /// Bumped on every load and teardown; disc loads from older generations are dropped.
    generation: u64,
    volume: VolumeSetting,
    factory: Box<dyn PipelineFactory>,
    disc: Arc<dyn DiscReader>,
    metadata: Option<Arc<dyn MetadataService>>,
    mailbox: Sender<KioskMessage>,
    ui: UiEvents,
}

impl DiscSequencer {
    pub fn new(
        factory: Box<dyn PipelineFactory>,
        disc: Arc<dyn DiscReader>,
        metadata: Option<Arc<dyn MetadataService>>,
        volume: VolumeSetting,
        mailbox: Sender<KioskMessage>,
        ui: UiEvents,
    ) -> Self {
        Self {
            state: SequencerState::Idle,
            session: None,
            generation: 0,
            volume,
            factory,
            disc,
            metadata,
            mailbox,
            ui,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn current_index(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.current_index)
    }

    pub fn track_list(&self) -> &[TrackEntry] {
        self.session.as_ref().map(|s| s.tracks.as_slice()).unwrap_or_default()
    }

    pub fn volume(&self) -> VolumeSetting {
        self.volume
    }

    pub fn active_pipeline_id(&self) -> Option<u64> {
        self.session
            .as_ref()
            .and_then(|s| s.pipeline.as_ref())
            .map(|p| p.id())
    }

    /// Start reading the disc in the background.
    pub fn load(&mut self) {
        self.teardown();
        let generation = self.generation;
        self.set_state(SequencerState::Loading);

        let disc = self.disc.clone();
        let metadata = self.metadata.clone();
        let mailbox = self.mailbox.clone();
        let spawned = thread::Builder::new()
            .name("kiosk-disc-load".to_string())
            .spawn(move || {
                let load = load_disc(disc.as_ref(), metadata.as_deref());
                if mailbox.send(KioskMessage::DiscLoaded { generation, load }).is_err() {
                    tracing::debug!(generation, "disc load finished after shutdown");
                }
            });
        if let Err(e) = spawned {
            self.fail(format!("spawn disc loader: {e}"));
        }
    }

    /// Apply a finished disc load and start track 1.
    pub fn on_disc_loaded(&mut self, generation: u64, load: DiscLoad) {
        if generation != self.generation || self.state != SequencerState::Loading {
            tracing::debug!(generation, current = self.generation, "stale disc load ignored");
            return;
        }
        if load.tracks.is_empty() {
            self.fail("disc has no tracks".to_string());
            return;
        }
        tracing::info!(
            album = %load.album.title,
            artist = %load.album.artist,
            tracks = load.tracks.len(),
            cover = load.cover.is_some(),
            "disc loaded"
        );
        self.session = Some(PlaybackSession {
            tracks: load.tracks,
            current_index: 1,
            pipeline: None,
            album: load.album,
            cover: load.cover,
        });
        self.play_track(1);
    }

    pub fn next(&mut self) {
        self.skip(true);
    }

    pub fn previous(&mut self) {
        self.skip(false);
    }

    fn skip(&mut self, forward: bool) {
        if !matches!(self.state, SequencerState::Playing | SequencerState::Paused) {
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let current = session.current_index;
        let target = if forward { current + 1 } else { current - 1 };
        if target < 1 || target > session.tracks.len() {
            tracing::debug!(current, target, "track change out of range ignored");
            return;
        }
        self.play_track(target);
    }

    pub fn toggle_play_pause(&mut self) {
        let (pipeline_state, next) = match self.state {
            SequencerState::Playing => (PipelineState::Paused, SequencerState::Paused),
            SequencerState::Paused => (PipelineState::Playing, SequencerState::Playing),
            _ => return,
        };
        if let Some(pipeline) = self.session.as_mut().and_then(|s| s.pipeline.as_mut()) {
            pipeline.set_state(pipeline_state);
        }
        self.set_state(next);
    }

    /// Handle a notification; events from anything but the active pipeline are ignored.
    pub fn on_pipeline_event(&mut self, pipeline_id: u64, event: PipelineEvent) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!(pipeline_id, "pipeline event without session ignored");
            return;
        };
        if session.pipeline.as_ref().map(|p| p.id()) != Some(pipeline_id) {
            tracing::debug!(pipeline_id, ?event, "stale pipeline event ignored");
            return;
        }
        match event {
            PipelineEvent::EndOfStream if session.current_index < session.tracks.len() => {
                let next = session.current_index + 1;
                self.play_track(next);
            }
            PipelineEvent::EndOfStream => {
                session.stop_pipeline();
                tracing::info!(tracks = session.tracks.len(), "end of disc");
                self.set_state(SequencerState::EndOfDisc);
            }
            PipelineEvent::Error(message) => self.fail(message),
        }
    }

    /// Store the volume and apply it to the active pipeline, if any.
    pub fn set_volume(&mut self, volume: VolumeSetting) {
        self.volume = volume;
        if let Some(pipeline) = self.session.as_mut().and_then(|s| s.pipeline.as_mut()) {
            pipeline.set_volume(volume.gain());
        }
    }

    /// Stop the pipeline, drop the session and invalidate any disc load in flight.
    pub fn teardown(&mut self) {
        self.generation += 1;
        if let Some(mut session) = self.session.take() {
            session.stop_pipeline();
        }
        self.state = SequencerState::Idle;
    }

    fn play_track(&mut self, index: usize) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.stop_pipeline();
        session.current_index = index;

        let descriptor = PipelineDescriptor {
            track_index: index,
            uri: self.disc.track_uri(index),
            volume: self.volume.gain(),
        };
        let pipeline_id = PipelineHandle::next_id();
        let mailbox = self.mailbox.clone();
        let notifier: PipelineNotifier = Box::new(move |event| {
            let _ = mailbox.send(KioskMessage::Pipeline { pipeline_id, event });
        });

        match self.factory.build(&descriptor, notifier) {
            Ok(pipeline) => {
                let mut handle = PipelineHandle::new(pipeline_id, index, pipeline);
                handle.set_state(PipelineState::Playing);
                session.pipeline = Some(handle);
                tracing::info!(track = index, pipeline_id, uri = %descriptor.uri, "track started");
                let now_playing = session.now_playing();
                self.ui.now_playing(now_playing);
                self.set_state(SequencerState::Playing);
            }
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn fail(&mut self, message: String) {
        tracing::error!(error = %message, "disc playback failed");
        if let Some(mut session) = self.session.take() {
            session.stop_pipeline();
        }
        self.ui.error(message);
        self.set_state(SequencerState::Error);
    }

    fn set_state(&mut self, state: SequencerState) {
        self.state = state;
        let status = match state {
            SequencerState::Idle => PlaybackStatus::Idle,
            SequencerState::Loading => PlaybackStatus::Loading,
            SequencerState::Playing => PlaybackStatus::Playing,
            SequencerState::Paused => PlaybackStatus::Paused,
            SequencerState::EndOfDisc => PlaybackStatus::EndOfDisc,
            SequencerState::Error => PlaybackStatus::Error,
        };
        self.ui.state(Source::Disc, status);
    }
}

/// Read the TOC, look up metadata and fetch the cover. Never fails: every
/// missing piece degrades to synthetic data.
pub fn load_disc(disc: &dyn DiscReader, metadata: Option<&dyn MetadataService>) -> DiscLoad {
    let (track_count, disc_id, disc_number) = match disc.read_toc() {
        Ok(toc) if toc.track_count > 0 => (toc.track_count, toc.disc_id, toc.disc_number),
        Ok(_) => (fallback_track_count(disc), None, 1),
        Err(e) => {
            tracing::warn!(error = %e, "disc toc unavailable; using synthetic track list");
            (fallback_track_count(disc), None, 1)
        }
    };

    let release = match (metadata, disc_id.as_deref()) {
        (Some(service), Some(id)) => service
            .lookup(id)
            .inspect_err(|e| tracing::warn!(disc_id = id, error = %e, "keeping synthetic names"))
            .ok(),
        _ => None,
    };

    let (tracks, album) =
        tracklist::build_track_list(track_count, release.as_ref(), disc_id.as_deref(), disc_number);
    let cover = match (metadata, album.release_id.as_deref()) {
        (Some(service), Some(release_id)) => service
            .fetch_cover(release_id)
            .map(|bytes| cover_data_uri(&bytes)),
        _ => None,
    };
    DiscLoad {
        tracks,
        album,
        cover,
    }
}

fn fallback_track_count(disc: &dyn DiscReader) -> usize {
    disc.probe_track_count().filter(|n| *n > 0).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::Receiver;
    use kiosk_types::UiEvent;

    use super::*;
    use crate::error::KioskError;
    use crate::testing::{FactoryLog, FakeDisc, FakeMetadata, FakePipelineFactory, release_with_titles};

    const WAIT: Duration = Duration::from_secs(5);

    struct Harness {
        seq: DiscSequencer,
        inbox: Receiver<KioskMessage>,
        ui: Receiver<UiEvent>,
        log: Arc<std::sync::Mutex<FactoryLog>>,
    }

    fn harness_with(disc: FakeDisc, metadata: Option<FakeMetadata>, fail_builds: bool) -> Harness {
        let (tx, inbox) = crossbeam_channel::unbounded();
        let (ui_tx, ui) = crossbeam_channel::unbounded();
        let factory = FakePipelineFactory {
            fail_builds,
            ..FakePipelineFactory::default()
        };
        let log = factory.log.clone();
        let metadata = metadata.map(|m| Arc::new(m) as Arc<dyn MetadataService>);
        let seq = DiscSequencer::new(
            Box::new(factory),
            Arc::new(disc),
            metadata,
            VolumeSetting::new(40),
            tx,
            UiEvents::new(ui_tx),
        );
        Harness { seq, inbox, ui, log }
    }

    fn harness(track_count: usize) -> Harness {
        harness_with(FakeDisc::with_tracks(track_count), None, false)
    }

    impl Harness {
        fn load(&mut self) {
            self.seq.load();
            match self.inbox.recv_timeout(WAIT).unwrap() {
                KioskMessage::DiscLoaded { generation, load } => {
                    self.seq.on_disc_loaded(generation, load)
                }
                _ => panic!("expected disc load"),
            }
        }

        /// Fire the notifier of build `build` and route the message back.
        fn notify(&mut self, build: usize, event: PipelineEvent) {
            let notifier = self.log.lock().unwrap().take_notifier(build).unwrap();
            notifier(event);
            match self.inbox.recv_timeout(WAIT).unwrap() {
                KioskMessage::Pipeline { pipeline_id, event } => {
                    self.seq.on_pipeline_event(pipeline_id, event)
                }
                _ => panic!("expected pipeline notice"),
            }
        }

        fn builds(&self) -> Vec<usize> {
            self.log.lock().unwrap().builds.iter().map(|d| d.track_index).collect()
        }

        fn statuses(&self) -> Vec<PlaybackStatus> {
            self.ui
                .try_iter()
                .filter_map(|e| match e {
                    UiEvent::PlaybackStateChanged { status, .. } => Some(status),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn load_pads_metadata_and_starts_track_one() {
        let metadata = FakeMetadata::new(release_with_titles("disc-1", &["One", "Two"]));
        let mut h = harness_with(FakeDisc::with_tracks(3), Some(metadata), false);
        h.load();

        assert_eq!(h.seq.state(), SequencerState::Playing);
        assert_eq!(h.seq.current_index(), Some(1));
        let tracks = h.seq.track_list();
        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[0].title, "One");
        assert_eq!(tracks[2].title, "Track 3");
        assert_eq!(tracks[2].duration_formatted, "unknown");

        let log = h.log.lock().unwrap();
        assert_eq!(log.builds.len(), 1);
        assert_eq!(log.builds[0].uri, "fake://track/1");
        assert_eq!(log.builds[0].volume, 0.4);
        assert_eq!(log.states, vec![(0, PipelineState::Playing)]);
    }

    #[test]
    fn load_emits_now_playing_with_cover() {
        let metadata = FakeMetadata::new(release_with_titles("disc-1", &["One"]))
            .with_cover(vec![0xFF, 0xD8, 0xFF]);
        let mut h = harness_with(FakeDisc::with_tracks(1), Some(metadata), false);
        h.load();

        let now_playing: Vec<NowPlaying> = h
            .ui
            .try_iter()
            .filter_map(|e| match e {
                UiEvent::NowPlayingChanged(np) => Some(np),
                _ => None,
            })
            .collect();
        assert_eq!(now_playing.len(), 1);
        assert_eq!(now_playing[0].title, "One");
        assert_eq!(now_playing[0].album, "Album");
        assert_eq!(now_playing[0].track_number, Some(1));
        assert_eq!(now_playing[0].track_count, Some(1));
        assert!(now_playing[0].cover.as_deref().unwrap().starts_with("data:image/jpeg"));
    }

    #[test]
    fn boundaries_are_no_ops() {
        let mut h = harness(2);
        h.load();
        h.seq.previous();
        assert_eq!(h.seq.current_index(), Some(1));
        assert_eq!(h.builds(), vec![1]);

        h.seq.next();
        assert_eq!(h.seq.current_index(), Some(2));
        h.seq.next();
        assert_eq!(h.seq.current_index(), Some(2));
        assert_eq!(h.builds(), vec![1, 2]);

        h.seq.previous();
        assert_eq!(h.seq.current_index(), Some(1));
        assert_eq!(h.builds(), vec![1, 2, 1]);
    }

    #[test]
    fn skipping_stops_previous_pipeline() {
        let mut h = harness(3);
        h.load();
        h.seq.next();
        let states = h.log.lock().unwrap().states.clone();
        assert_eq!(
            states,
            vec![
                (0, PipelineState::Playing),
                (0, PipelineState::Stopped),
                (1, PipelineState::Playing),
            ]
        );
    }

    #[test]
    fn paused_skip_resumes_playing() {
        let mut h = harness(3);
        h.load();
        h.seq.toggle_play_pause();
        assert_eq!(h.seq.state(), SequencerState::Paused);
        h.seq.next();
        assert_eq!(h.seq.state(), SequencerState::Playing);
        assert_eq!(h.seq.current_index(), Some(2));
    }

    #[test]
    fn end_of_stream_advances_then_ends_disc_once() {
        let mut h = harness(2);
        h.load();
        h.notify(0, PipelineEvent::EndOfStream);
        assert_eq!(h.seq.current_index(), Some(2));
        assert_eq!(h.seq.state(), SequencerState::Playing);

        let last_id = h.seq.active_pipeline_id().unwrap();
        h.notify(1, PipelineEvent::EndOfStream);
        assert_eq!(h.seq.state(), SequencerState::EndOfDisc);
        assert_eq!(h.builds(), vec![1, 2]);

        h.seq.on_pipeline_event(last_id, PipelineEvent::EndOfStream);
        h.seq.next();
        assert_eq!(h.builds(), vec![1, 2]);
        let end_events = h
            .statuses()
            .into_iter()
            .filter(|s| *s == PlaybackStatus::EndOfDisc)
            .count();
        assert_eq!(end_events, 1);
    }

    #[test]
    fn stale_pipeline_events_are_ignored() {
        let mut h = harness(3);
        h.load();
        h.seq.next();
        // Build 0 was torn down; its late error must not affect track 2.
        h.notify(0, PipelineEvent::Error("late".to_string()));
        assert_eq!(h.seq.state(), SequencerState::Playing);
        assert_eq!(h.seq.current_index(), Some(2));
    }

    #[test]
    fn pipeline_error_discards_session() {
        let mut h = harness(3);
        h.load();
        h.notify(0, PipelineEvent::Error("device lost".to_string()));
        assert_eq!(h.seq.state(), SequencerState::Error);
        assert!(h.seq.current_index().is_none());
        let errors: Vec<String> = h
            .ui
            .try_iter()
            .filter_map(|e| match e {
                UiEvent::Error { message } => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(errors, vec!["device lost".to_string()]);
    }

    #[test]
    fn build_failure_enters_error() {
        let mut h = harness_with(FakeDisc::with_tracks(2), None, true);
        h.load();
        assert_eq!(h.seq.state(), SequencerState::Error);
        assert!(h.seq.track_list().is_empty());
        assert_eq!(h.statuses().last(), Some(&PlaybackStatus::Error));
    }

    #[test]
    fn teardown_invalidates_pending_load() {
        let mut h = harness(2);
        h.seq.load();
        h.seq.teardown();
        let KioskMessage::DiscLoaded { generation, load } = h.inbox.recv_timeout(WAIT).unwrap()
        else {
            panic!("expected disc load");
        };
        h.seq.on_disc_loaded(generation, load);
        assert_eq!(h.seq.state(), SequencerState::Idle);
        assert!(h.builds().is_empty());
    }

    #[test]
    fn toggle_is_no_op_outside_playback() {
        let mut h = harness(1);
        h.seq.toggle_play_pause();
        assert_eq!(h.seq.state(), SequencerState::Idle);

        h.load();
        h.seq.toggle_play_pause();
        h.seq.toggle_play_pause();
        let states = h.log.lock().unwrap().states.clone();
        assert_eq!(
            states,
            vec![
                (0, PipelineState::Playing),
                (0, PipelineState::Paused),
                (0, PipelineState::Playing),
            ]
        );
    }

    #[test]
    fn volume_reaches_active_and_future_pipelines() {
        let mut h = harness(2);
        h.seq.set_volume(VolumeSetting::new(10));
        h.load();
        h.seq.set_volume(VolumeSetting::new(55));
        h.seq.next();

        let log = h.log.lock().unwrap();
        assert_eq!(log.builds[0].volume, 0.1);
        assert_eq!(log.volumes, vec![(0, 0.55_f32)]);
        assert_eq!(log.builds[1].volume, 0.55);
    }

    #[test]
    fn unreadable_toc_falls_back_to_probe_then_single_track() {
        let disc = FakeDisc {
            toc: Err(KioskError::DiscUnavailable("no disc".to_string())),
            probed: Some(5),
            ..FakeDisc::with_tracks(0)
        };
        let metadata = FakeMetadata::new(release_with_titles("disc-1", &["One"]));
        let load = load_disc(&disc, Some(&metadata));
        assert_eq!(load.tracks.len(), 5);
        assert_eq!(load.tracks[0].title, "Track 1");
        assert!(metadata.lookups().is_empty());

        let disc = FakeDisc {
            toc: Err(KioskError::DiscUnavailable("no disc".to_string())),
            probed: None,
            ..FakeDisc::with_tracks(0)
        };
        let load = load_disc(&disc, None);
        assert_eq!(load.tracks.len(), 1);
    }

    #[test]
    fn failed_lookup_keeps_synthetic_names() {
        let metadata = FakeMetadata::failing();
        let load = load_disc(&FakeDisc::with_tracks(2), Some(&metadata));
        assert_eq!(metadata.lookups(), vec!["disc-1".to_string()]);
        assert_eq!(load.tracks[1].title, "Track 2");
        assert_eq!(load.album, AlbumInfo::unknown());
        assert!(load.cover.is_none());
    }
}
